//! Framework settings.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings for booting a configuration tree.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct FrameworkConfig {
    /// Root of the configuration tree (Neovim's `stdpath("config")`).
    #[builder(default = "default_config_dir()")]
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Extra Lua search roots. `config_dir/lua` is always searched last.
    #[builder(default)]
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Module required first during boot.
    #[builder(default = "default_entry()")]
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Load every non-lazy plugin after the entry module ran.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub load_eager: bool,

    /// Default log filter when `RUST_LOG` is unset.
    #[builder(default = "default_log_level()")]
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nvim")
}

fn default_entry() -> String {
    "init".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FrameworkConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref entry) = self.entry {
            if entry.trim().is_empty() {
                return Err("Entry module cannot be empty".to_string());
            }
        }
        if let Some(ref level) = self.log_level {
            if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                return Err(format!(
                    "Invalid log level: {level}. Valid values are: {LOG_LEVELS:?}"
                ));
            }
        }
        Ok(())
    }
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            search_paths: Vec::new(),
            entry: default_entry(),
            load_eager: true,
            log_level: default_log_level(),
        }
    }
}

impl FrameworkConfig {
    /// Create a new config builder.
    pub fn builder() -> FrameworkConfigBuilder {
        FrameworkConfigBuilder::default()
    }

    /// Config rooted at `dir`, everything else default.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Lua search roots in lookup order.
    pub fn lua_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.search_paths.clone();
        let runtime = self.config_dir.join("lua");
        if !paths.contains(&runtime) {
            paths.push(runtime);
        }
        paths
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.entry.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "entry module cannot be empty".to_string(),
            });
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid {
                message: format!("invalid log level '{}'", self.log_level),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = FrameworkConfig::builder()
            .config_dir("/tmp/nvim")
            .build()
            .unwrap();
        assert_eq!(config.entry, "init");
        assert!(config.load_eager);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.lua_paths(), vec![PathBuf::from("/tmp/nvim/lua")]);
    }

    #[test]
    fn test_builder_rejects_bad_level() {
        let err = FrameworkConfig::builder().log_level("loud").build();
        assert!(err.is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = FrameworkConfig::from_toml_str(
            r#"
            config_dir = "/home/me/.config/nvim"
            search_paths = ["/opt/shared/lua"]
            entry = "nvim"
            load_eager = false
            "#,
        )
        .unwrap();
        assert_eq!(config.entry, "nvim");
        assert!(!config.load_eager);
        assert_eq!(
            config.lua_paths(),
            vec![
                PathBuf::from("/opt/shared/lua"),
                PathBuf::from("/home/me/.config/nvim/lua")
            ]
        );
    }

    #[test]
    fn test_from_toml_rejects_empty_entry() {
        assert!(matches!(
            FrameworkConfig::from_toml_str("entry = \"  \""),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            FrameworkConfig::from_toml_str("entry = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
