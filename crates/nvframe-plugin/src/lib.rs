//! Runtime half of nvframe: the pieces that need a Lua host.
//!
//! This crate provides the in-process event bus, the module loader built on
//! Lua's `require`, the plugin registry with dependency resolution, and the
//! Lua bridge that exposes all of them to a configuration tree as
//! `nvim.core.*` modules.
//!
//! # Architecture
//!
//! Everything is single-threaded. Components are shared as `Rc` and use
//! interior mutability; no borrow is held while user code runs, so event
//! callbacks, plugin configs and Lua modules may call back into any
//! component.
//!
//! # Example
//!
//! ```ignore
//! use nvframe_plugin::{Framework, PluginDescriptor};
//!
//! let fw = Framework::new();
//! fw.install_lua_api()?;
//! fw.plugins().register("plenary", PluginDescriptor::new())?;
//! fw.plugins().register("telescope", PluginDescriptor::new().depends_on("plenary"))?;
//! fw.plugins().load("telescope")?;
//! ```

pub mod events;
mod framework;
mod loader;
pub mod lua;
mod registry;
mod types;

pub use events::{
    EmitReport, EventBus, EventCallback, SubscribeOptions, SubscriberInfo, SubscriptionId,
    Unsubscribe,
};
pub use framework::{BootReport, Framework};
pub use loader::{LoadOptions, ModuleLoader};
pub use registry::{
    ConfigFn, LoadSummary, PluginDescriptor, PluginFilter, PluginInfo, PluginRegistry, PluginState,
};
pub use types::{ModuleError, ModuleResult, RegistryError, RegistryResult};
