//! Error types for schemas and framework settings.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for schema definition.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while defining a schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Schema name was empty.
    #[error("Schema name must be a non-empty string")]
    EmptyName,

    /// A schema with this name exists already.
    #[error("Schema '{name}' is already defined")]
    AlreadyDefined { name: String },

    /// A field definition could not be interpreted.
    #[error("Invalid field '{field}' in schema '{schema}': {message}")]
    InvalidField {
        schema: String,
        field: String,
        message: String,
    },
}

/// Errors raised while loading framework settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML or has the wrong shape.
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings parsed but failed validation.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}
