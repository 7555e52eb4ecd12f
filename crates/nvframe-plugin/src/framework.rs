//! The framework context: one of each component, wired together.

use std::rc::Rc;

use serde::Serialize;
use tracing::{info, warn};

use nvframe_core::{FrameworkConfig, SchemaRegistry};

use crate::events::EventBus;
use crate::loader::{LoadOptions, ModuleLoader};
use crate::lua;
use crate::registry::{LoadSummary, PluginRegistry};
use crate::types::ModuleResult;

/// Outcome of [`Framework::boot`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootReport {
    /// Entry module that was loaded.
    pub entry: String,
    /// Result of loading eager plugins, if that step ran.
    pub plugins: Option<LoadSummary>,
    /// Modules loaded through the loader, in load order.
    pub modules: Vec<String>,
}

/// Schema registry, event bus, module loader and plugin registry sharing
/// one Lua state.
pub struct Framework {
    schemas: Rc<SchemaRegistry>,
    events: Rc<EventBus>,
    loader: Rc<ModuleLoader>,
    plugins: Rc<PluginRegistry>,
    load_eager: bool,
}

impl Framework {
    /// Create a framework with a fresh Lua state.
    pub fn new() -> Self {
        let events = Rc::new(EventBus::new());
        let loader = Rc::new(ModuleLoader::new().with_events(Rc::clone(&events)));
        let plugins =
            Rc::new(PluginRegistry::new(Rc::clone(&events)).with_loader(Rc::clone(&loader)));

        Self {
            schemas: Rc::new(SchemaRegistry::new()),
            events,
            loader,
            plugins,
            load_eager: true,
        }
    }

    /// Create a framework that searches the configured Lua roots.
    pub fn from_config(config: &FrameworkConfig) -> ModuleResult<Self> {
        let mut framework = Self::new();
        framework.load_eager = config.load_eager;
        // Prepending reverses the order, so add the lowest priority first.
        for dir in config.lua_paths().iter().rev() {
            if !dir.is_dir() {
                warn!(dir = %dir.display(), "Lua search path does not exist");
            }
            framework.loader.add_search_path(dir)?;
        }
        Ok(framework)
    }

    pub fn schemas(&self) -> &Rc<SchemaRegistry> {
        &self.schemas
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    pub fn loader(&self) -> &Rc<ModuleLoader> {
        &self.loader
    }

    pub fn plugins(&self) -> &Rc<PluginRegistry> {
        &self.plugins
    }

    /// Make the `nvim.core.*` modules requirable from Lua.
    pub fn install_lua_api(&self) -> ModuleResult<()> {
        lua::install(&self.schemas, &self.events, &self.loader, &self.plugins)
    }

    /// Load the entry module (calling its `setup`), then every eager plugin.
    pub fn boot(&self, entry: &str) -> ModuleResult<BootReport> {
        info!(entry, "booting configuration");
        self.loader.load(entry, LoadOptions::default().with_setup())?;

        let plugins = self.load_eager.then(|| self.plugins.load_eager());
        if let Some(summary) = &plugins {
            info!(
                loaded = summary.loaded.len(),
                failed = summary.failed.len(),
                "eager plugins loaded"
            );
        }

        Ok(BootReport {
            entry: entry.to_string(),
            plugins,
            modules: self.loader.get_loaded_modules(None)?,
        })
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::new()
    }
}
