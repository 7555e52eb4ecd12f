//! Lua side of the framework.
//!
//! [`convert`] moves values across the boundary; [`install`] registers the
//! `nvim.core.*` modules a configuration tree requires.

mod bindings;
pub mod convert;

pub use bindings::{
    CONFIG_SCHEMA_MODULE, EVENTS_MODULE, MODULE_LOADER_MODULE, PLUGIN_MODULE, UTILS_MODULE,
    install,
};
