//! Plugin registry with dependency resolution and lifecycle events.
//!
//! Each plugin walks `Registered -> Loading -> Loaded`. `Loading` doubles as
//! the in-progress marker of the depth-first dependency walk, so reaching a
//! plugin that is still `Loading` means the graph has a cycle. A failing
//! config leaves the plugin `Failed`, which may be retried with another
//! `load`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use nvframe_core::{CallbackError, Value};

use crate::events::{EventBus, names};
use crate::loader::{LoadOptions, ModuleLoader};
use crate::types::{RegistryError, RegistryResult};

/// A plugin's configuration function.
pub type ConfigFn = Rc<dyn Fn() -> Result<(), CallbackError>>;

/// Declarative description of a plugin.
///
/// `event`, `cmd` and `ft` are lazy-load triggers for the host's plugin
/// manager; the registry stores them but never acts on them.
#[derive(Clone, Default, Serialize)]
pub struct PluginDescriptor {
    pub dependencies: Vec<String>,
    #[serde(skip)]
    pub config: Option<ConfigFn>,
    /// Lua module to load (with `setup()`) before `config` runs.
    pub module: Option<String>,
    pub lazy: bool,
    pub event: Vec<String>,
    pub cmd: Vec<String>,
    pub ft: Vec<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub url: Option<String>,
}

impl PluginDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_config<F>(mut self, config: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + 'static,
    {
        self.config = Some(Rc::new(config));
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn on_event(mut self, event: impl Into<String>) -> Self {
        self.event.push(event.into());
        self
    }

    pub fn on_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd.push(cmd.into());
        self
    }

    pub fn on_ft(mut self, ft: impl Into<String>) -> Self {
        self.ft.push(ft.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("dependencies", &self.dependencies)
            .field("config", &self.config.as_ref().map(|_| "<fn>"))
            .field("module", &self.module)
            .field("lazy", &self.lazy)
            .field("event", &self.event)
            .field("cmd", &self.cmd)
            .field("ft", &self.ft)
            .field("description", &self.description)
            .field("author", &self.author)
            .field("version", &self.version)
            .field("url", &self.url)
            .finish()
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Registered,
    Loading,
    Loaded,
    Failed,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a registered plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub descriptor: PluginDescriptor,
    pub state: PluginState,
}

impl PluginInfo {
    pub fn is_loaded(&self) -> bool {
        self.state == PluginState::Loaded
    }
}

/// Filter for [`PluginRegistry::list`]. `None` matches either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginFilter {
    pub loaded: Option<bool>,
    pub lazy: Option<bool>,
}

impl PluginFilter {
    fn matches(&self, entry: &PluginEntry) -> bool {
        self.loaded
            .is_none_or(|loaded| (entry.state == PluginState::Loaded) == loaded)
            && self.lazy.is_none_or(|lazy| entry.descriptor.lazy == lazy)
    }
}

/// Outcome of [`PluginRegistry::load_eager`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    /// Plugin name and rendered error.
    pub failed: Vec<(String, String)>,
}

struct PluginEntry {
    descriptor: PluginDescriptor,
    state: PluginState,
}

/// Named registry of plugin descriptors.
pub struct PluginRegistry {
    plugins: RefCell<IndexMap<String, PluginEntry>>,
    events: Rc<EventBus>,
    loader: Option<Rc<ModuleLoader>>,
}

impl PluginRegistry {
    pub fn new(events: Rc<EventBus>) -> Self {
        Self {
            plugins: RefCell::new(IndexMap::new()),
            events,
            loader: None,
        }
    }

    /// Attach a module loader for descriptors that name a `module`.
    pub fn with_loader(mut self, loader: Rc<ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    /// Register a plugin under `name`.
    pub fn register(&self, name: &str, descriptor: PluginDescriptor) -> RegistryResult<()> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut plugins = self.plugins.borrow_mut();
        if plugins.contains_key(name) {
            warn!(plugin = name, "plugin already registered");
            return Err(RegistryError::AlreadyRegistered {
                name: name.to_string(),
            });
        }

        debug!(
            plugin = name,
            dependencies = ?descriptor.dependencies,
            lazy = descriptor.lazy,
            "registered plugin"
        );
        plugins.insert(
            name.to_string(),
            PluginEntry {
                descriptor,
                state: PluginState::Registered,
            },
        );
        Ok(())
    }

    /// Load `name` and, depth-first, everything it depends on.
    ///
    /// Loading an already loaded plugin is a no-op; a config function runs
    /// at most once per successful load.
    pub fn load(&self, name: &str) -> RegistryResult<()> {
        let mut chain = Vec::new();
        self.load_inner(name, &mut chain)
    }

    fn load_inner(&self, name: &str, chain: &mut Vec<String>) -> RegistryResult<()> {
        let descriptor = {
            let mut plugins = self.plugins.borrow_mut();
            let entry = plugins
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotRegistered {
                    name: name.to_string(),
                })?;
            match entry.state {
                PluginState::Loaded => return Ok(()),
                PluginState::Loading => return Err(cycle(chain, name)),
                PluginState::Registered | PluginState::Failed => {}
            }
            entry.state = PluginState::Loading;
            entry.descriptor.clone()
        };

        chain.push(name.to_string());
        let result = self.run_load(name, &descriptor, chain);
        chain.pop();
        result
    }

    fn run_load(
        &self,
        name: &str,
        descriptor: &PluginDescriptor,
        chain: &mut Vec<String>,
    ) -> RegistryResult<()> {
        self.events.emit(names::PLUGIN_BEFORE_LOAD, payload(name));

        for dependency in &descriptor.dependencies {
            if let Err(err) = self.load_inner(dependency, chain) {
                self.set_state(name, PluginState::Registered);
                return Err(match err {
                    RegistryError::NotRegistered { .. } => RegistryError::MissingDependency {
                        plugin: name.to_string(),
                        dependency: dependency.clone(),
                    },
                    err @ RegistryError::Cycle { .. } => err,
                    err => RegistryError::DependencyFailed {
                        plugin: name.to_string(),
                        dependency: dependency.clone(),
                        source: Box::new(err),
                    },
                });
            }
        }

        if let Some(module) = &descriptor.module {
            let Some(loader) = &self.loader else {
                self.set_state(name, PluginState::Registered);
                return Err(RegistryError::LoaderUnavailable {
                    name: name.to_string(),
                    module: module.clone(),
                });
            };
            if let Err(source) = loader.load(module, LoadOptions::default().with_setup()) {
                self.fail(name, &source.to_string());
                return Err(RegistryError::Module {
                    name: name.to_string(),
                    source,
                });
            }
        }

        if let Some(config) = &descriptor.config
            && let Err(err) = config()
        {
            let message = err.to_string();
            self.fail(name, &message);
            return Err(RegistryError::ConfigFailed {
                name: name.to_string(),
                message,
            });
        }

        self.set_state(name, PluginState::Loaded);
        info!(plugin = name, "plugin loaded");
        self.events.emit(names::PLUGIN_LOADED, payload(name));
        if descriptor.has_config() {
            self.events.emit(names::PLUGIN_CONFIGURED, payload(name));
        }
        Ok(())
    }

    fn fail(&self, name: &str, message: &str) {
        error!(plugin = name, error = message, "plugin failed to load");
        self.set_state(name, PluginState::Failed);
        self.events.emit(
            names::PLUGIN_ERROR,
            Value::from_pairs([("name", name), ("error", message)]),
        );
    }

    fn set_state(&self, name: &str, state: PluginState) {
        if let Some(entry) = self.plugins.borrow_mut().get_mut(name) {
            entry.state = state;
        }
    }

    /// Load every non-lazy plugin in registration order.
    ///
    /// One plugin failing does not stop the others.
    pub fn load_eager(&self) -> LoadSummary {
        let eager: Vec<String> = self
            .plugins
            .borrow()
            .iter()
            .filter(|(_, entry)| !entry.descriptor.lazy)
            .map(|(name, _)| name.clone())
            .collect();

        let mut summary = LoadSummary::default();
        for name in eager {
            match self.load(&name) {
                Ok(()) => summary.loaded.push(name),
                Err(err) => {
                    error!(plugin = %name, error = %err, "eager load failed");
                    summary.failed.push((name, err.to_string()));
                }
            }
        }
        summary
    }

    /// Copy of the plugin's descriptor and state.
    pub fn get(&self, name: &str) -> Option<PluginInfo> {
        self.plugins.borrow().get(name).map(|entry| PluginInfo {
            name: name.to_string(),
            descriptor: entry.descriptor.clone(),
            state: entry.state,
        })
    }

    /// Registered plugins matching `filter`, in registration order.
    pub fn list(&self, filter: PluginFilter) -> Vec<PluginInfo> {
        self.plugins
            .borrow()
            .iter()
            .filter(|(_, entry)| filter.matches(entry))
            .map(|(name, entry)| PluginInfo {
                name: name.clone(),
                descriptor: entry.descriptor.clone(),
                state: entry.state,
            })
            .collect()
    }

    /// Remove a plugin that is not loaded.
    pub fn unregister(&self, name: &str) -> RegistryResult<()> {
        let mut plugins = self.plugins.borrow_mut();
        let state = plugins
            .get(name)
            .map(|entry| entry.state)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })?;
        match state {
            PluginState::Loaded => {
                warn!(plugin = name, "refusing to unregister loaded plugin");
                Err(RegistryError::StillLoaded {
                    name: name.to_string(),
                })
            }
            PluginState::Loading => Err(RegistryError::Busy {
                name: name.to_string(),
            }),
            PluginState::Registered | PluginState::Failed => {
                plugins.shift_remove(name);
                debug!(plugin = name, "unregistered plugin");
                Ok(())
            }
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state(name) == Some(PluginState::Loaded)
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins.borrow().get(name).map(|entry| entry.state)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.plugins.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.borrow().is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.borrow().keys().collect::<Vec<_>>())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

fn payload(name: &str) -> Value {
    Value::from_pairs([("name", name)])
}

/// Cycle error for reaching `name` again while it is still loading.
fn cycle(chain: &[String], name: &str) -> RegistryError {
    let start = chain.iter().position(|n| n == name).unwrap_or(0);
    let mut looped: Vec<String> = chain[start..].to_vec();
    looped.push(name.to_string());
    RegistryError::Cycle { chain: looped }
}
