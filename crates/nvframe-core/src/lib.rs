//! Core types for nvframe.
//!
//! This crate provides the pieces of the framework that do not need a Lua
//! host: the dynamic [`Value`] tree configurations are made of, deep merging,
//! the named config-schema registry, and the framework's own settings.

mod config;
mod error;
pub mod merge;
pub mod schema;
mod value;

pub use config::{FrameworkConfig, FrameworkConfigBuilder};
pub use error::{ConfigError, SchemaError, SchemaResult};
pub use merge::{deep_merge, deep_merge_into};
pub use schema::{
    FieldError, FieldSpec, FieldType, Fields, SchemaRegistry, ValidationErrors, Validator, fields,
};
pub use value::{CallbackError, FunctionRef, Object, Value};
