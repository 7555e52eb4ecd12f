//! Error types for the module loader and plugin registry.

use thiserror::Error;

/// Result type for module loader operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Result type for plugin registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised while resolving Lua modules.
///
/// "Not found" and "failed to load" share this one type so callers need a
/// single error path, but stay distinguishable by variant and message.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Module name was empty.
    #[error("Module name must be a non-empty string")]
    InvalidName,

    /// No searcher could find the module.
    #[error("module '{name}' not found: {message}")]
    NotFound { name: String, message: String },

    /// The module was found but its body failed (syntax or runtime error).
    #[error("module '{name}' failed to load: {message}")]
    LoadFailed { name: String, message: String },

    /// The module loaded but its `setup` function raised.
    #[error("module '{name}' setup failed: {message}")]
    SetupFailed { name: String, message: String },

    /// Filter pattern was not a valid glob.
    #[error("Invalid module pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The Lua host itself failed (missing `package` table, ...).
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

impl ModuleError {
    /// Whether the module body failed to parse.
    pub fn is_syntax_error(&self) -> bool {
        match self {
            Self::LoadFailed { message, .. } => {
                message.contains("syntax error") || message.contains("error loading module")
            }
            _ => false,
        }
    }

    /// Whether the module could not be found at all.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by the plugin registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Plugin name was empty.
    #[error("Plugin name must be a non-empty string")]
    EmptyName,

    /// A plugin with this name is registered already.
    #[error("Plugin '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// No plugin with this name is registered.
    #[error("Plugin '{name}' is not registered")]
    NotRegistered { name: String },

    /// A declared dependency is not registered.
    #[error("Plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    /// A dependency failed to load.
    #[error("Plugin '{plugin}' could not load dependency '{dependency}': {source}")]
    DependencyFailed {
        plugin: String,
        dependency: String,
        #[source]
        source: Box<RegistryError>,
    },

    /// The dependency graph loops back on itself.
    #[error("Dependency cycle detected: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    /// The plugin's config function raised.
    #[error("Plugin '{name}' config failed: {message}")]
    ConfigFailed { name: String, message: String },

    /// The plugin's backing module could not be loaded.
    #[error("Plugin '{name}' module failed: {source}")]
    Module {
        name: String,
        #[source]
        source: ModuleError,
    },

    /// The plugin names a backing module but the registry has no loader.
    #[error("Plugin '{name}' names module '{module}' but no module loader is attached")]
    LoaderUnavailable { name: String, module: String },

    /// Loaded plugins cannot be unregistered.
    #[error("Plugin '{name}' is loaded and cannot be unregistered")]
    StillLoaded { name: String },

    /// The plugin is in the middle of loading.
    #[error("Plugin '{name}' is currently loading")]
    Busy { name: String },
}

impl RegistryError {
    /// Whether this failure (or the dependency failure it wraps) is a cycle.
    pub fn is_cycle(&self) -> bool {
        match self {
            Self::Cycle { .. } => true,
            Self::DependencyFailed { source, .. } => source.is_cycle(),
            _ => false,
        }
    }
}
