//! Module loader over Lua's `require`.
//!
//! Resolution, caching and search-path handling are left to Lua itself:
//! `package.loaded` is the cache, `package.path` and `package.preload` decide
//! where modules come from. The loader adds error classification, forced
//! reloads and a record of which modules were loaded through it.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use globset::Glob;
use indexmap::IndexSet;
use mlua::{Function, Lua, Table, Value as LuaValue};
use tracing::{debug, info};

use nvframe_core::Value;

use crate::events::{EventBus, names};
use crate::lua::convert::error_message;
use crate::types::{ModuleError, ModuleResult};

/// Options for [`ModuleLoader::load`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Evict any cached value and execute the module again.
    pub force: bool,
    /// Call the module's `setup()` if it returns a table that has one.
    pub call_setup: bool,
}

impl LoadOptions {
    pub fn force() -> Self {
        Self {
            force: true,
            call_setup: false,
        }
    }

    pub fn with_setup(mut self) -> Self {
        self.call_setup = true;
        self
    }
}

/// Loads Lua modules by dotted name and remembers what it loaded.
pub struct ModuleLoader {
    lua: Lua,
    touched: RefCell<IndexSet<String>>,
    events: Option<Rc<EventBus>>,
}

impl ModuleLoader {
    /// Create a loader with a fresh Lua state.
    pub fn new() -> Self {
        Self::with_lua(Lua::new())
    }

    /// Create a loader over an existing Lua state.
    pub fn with_lua(lua: Lua) -> Self {
        Self {
            lua,
            touched: RefCell::new(IndexSet::new()),
            events: None,
        }
    }

    /// Announce `module:loaded` and `module:reloaded` on this bus.
    pub fn with_events(mut self, events: Rc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// The Lua state modules execute in.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn package_table(&self, field: &str) -> ModuleResult<Table> {
        let package: Table = self.lua.globals().get("package")?;
        Ok(package.get(field)?)
    }

    /// Prepend `dir/?.lua` and `dir/?/init.lua` to `package.path`.
    pub fn add_search_path(&self, dir: &Path) -> ModuleResult<()> {
        let package: Table = self.lua.globals().get("package")?;
        let current: String = package.get("path")?;
        let dir = dir.display();
        let path = format!("{dir}/?.lua;{dir}/?/init.lua;{current}");
        package.set("path", path)?;
        debug!(dir = %dir, "added module search path");
        Ok(())
    }

    /// Make `name` resolvable from in-memory source.
    pub fn preload(&self, name: &str, source: impl Into<String>) -> ModuleResult<()> {
        if name.is_empty() {
            return Err(ModuleError::InvalidName);
        }
        let source = source.into();
        let chunk_name = format!("={name}");
        let loader = self.lua.create_function(move |lua, _: mlua::MultiValue| {
            lua.load(source.as_str())
                .set_name(chunk_name.as_str())
                .eval::<LuaValue>()
        })?;
        self.preload_function(name, loader)
    }

    /// Register a native loader function under `package.preload[name]`.
    pub fn preload_function(&self, name: &str, loader: Function) -> ModuleResult<()> {
        if name.is_empty() {
            return Err(ModuleError::InvalidName);
        }
        self.package_table("preload")?.set(name, loader)?;
        Ok(())
    }

    /// Load a module, returning its cached value when already loaded.
    pub fn load(&self, name: &str, opts: LoadOptions) -> ModuleResult<LuaValue> {
        if name.is_empty() {
            return Err(ModuleError::InvalidName);
        }

        let loaded = self.package_table("loaded")?;
        if opts.force {
            loaded.set(name, LuaValue::Nil)?;
        }

        let cached: LuaValue = loaded.get(name)?;
        let module = if cached.is_nil() {
            let module = self.require(name)?;
            debug!(module = name, "loaded module");
            self.touched.borrow_mut().insert(name.to_string());
            self.announce(names::MODULE_LOADED, name);
            module
        } else {
            // May have been required directly from Lua.
            self.touched.borrow_mut().insert(name.to_string());
            cached
        };

        if opts.call_setup {
            call_setup(name, &module)?;
        }
        Ok(module)
    }

    fn require(&self, name: &str) -> ModuleResult<LuaValue> {
        let require: Function = self.lua.globals().get("require")?;
        require.call::<LuaValue>(name).map_err(|err| {
            let message = error_message(&err);
            if message.contains(&format!("module '{name}' not found")) {
                ModuleError::NotFound {
                    name: name.to_string(),
                    message,
                }
            } else {
                ModuleError::LoadFailed {
                    name: name.to_string(),
                    message,
                }
            }
        })
    }

    /// Evict `name` from the cache and load it again.
    pub fn reload(&self, name: &str) -> ModuleResult<LuaValue> {
        if name.is_empty() {
            return Err(ModuleError::InvalidName);
        }
        info!(module = name, "reloading module");
        let module = self.load(name, LoadOptions::force())?;
        self.announce(names::MODULE_RELOADED, name);
        Ok(module)
    }

    /// Evict `name` from the cache. Returns whether it was loaded.
    pub fn unload(&self, name: &str) -> ModuleResult<bool> {
        if name.is_empty() {
            return Err(ModuleError::InvalidName);
        }
        let loaded = self.package_table("loaded")?;
        let was_loaded = !loaded.get::<LuaValue>(name)?.is_nil();
        loaded.set(name, LuaValue::Nil)?;
        Ok(was_loaded)
    }

    /// Whether `name` currently has a cached value.
    pub fn is_loaded(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        self.package_table("loaded")
            .and_then(|loaded| Ok(loaded.get::<LuaValue>(name)?))
            .map(|value| !value.is_nil())
            .unwrap_or(false)
    }

    /// Names of modules requested through this loader, in first-request order,
    /// optionally filtered by a glob such as `plugins.*`.
    pub fn get_loaded_modules(&self, pattern: Option<&str>) -> ModuleResult<Vec<String>> {
        let touched = self.touched.borrow();
        let Some(pattern) = pattern else {
            return Ok(touched.iter().cloned().collect());
        };

        let matcher = Glob::new(pattern)
            .map_err(|source| ModuleError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?
            .compile_matcher();
        Ok(touched
            .iter()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect())
    }

    fn announce(&self, event: &str, name: &str) {
        if let Some(events) = &self.events {
            events.emit(event, Value::from_pairs([("name", name)]));
        }
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn call_setup(name: &str, module: &LuaValue) -> ModuleResult<()> {
    let LuaValue::Table(table) = module else {
        return Ok(());
    };
    let LuaValue::Function(setup) = table.get::<LuaValue>("setup")? else {
        return Ok(());
    };
    setup
        .call::<()>(())
        .map_err(|err| ModuleError::SetupFailed {
            name: name.to_string(),
            message: error_message(&err),
        })
}
