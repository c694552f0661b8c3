//! Engine configuration.
//!
//! Loaded from TOML. Every key is optional:
//!
//! ```toml
//! text_size_ceiling = 4000
//! binary_size_ceiling = 8000
//! default_list_capacity = 256
//! entry_cache_capacity = 10000
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{MapError, MapResult};
use crate::params::SizeLimits;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "ROWFORGE_CONFIG";

/// Tunables for parameter binding and the caches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Largest string (in characters) that still gets the small size bucket.
    pub text_size_ceiling: usize,

    /// Largest blob (in bytes) that still gets the small size bucket.
    pub binary_size_ceiling: usize,

    /// List pre-size when no previous row count is known.
    pub default_list_capacity: usize,

    /// Upper bound on parked convenience-API entries per connection. Unbounded when unset.
    pub entry_cache_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            text_size_ceiling: 4000,
            binary_size_ceiling: 8000,
            default_list_capacity: 256,
            entry_cache_capacity: None,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn from_toml_str(source: &str) -> MapResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| MapError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> MapResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| MapError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Load from `$ROWFORGE_CONFIG`, else the user config dir, else defaults.
    pub fn load() -> MapResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            debug!("Loading engine config from {}", path);
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!("Loading engine config from {}", path.display());
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/rowforge/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rowforge").join("config.toml"))
    }

    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            text: self.text_size_ceiling,
            binary: self.binary_size_ceiling,
        }
    }

    fn validate(&self) -> MapResult<()> {
        if self.text_size_ceiling == 0 || self.binary_size_ceiling == 0 {
            return Err(MapError::config("size ceilings must be positive"));
        }
        if self.entry_cache_capacity == Some(0) {
            return Err(MapError::config("entry_cache_capacity must be positive"));
        }
        Ok(())
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn text_size_ceiling(mut self, chars: usize) -> Self {
        self.config.text_size_ceiling = chars;
        self
    }

    pub fn binary_size_ceiling(mut self, bytes: usize) -> Self {
        self.config.binary_size_ceiling = bytes;
        self
    }

    pub fn default_list_capacity(mut self, rows: usize) -> Self {
        self.config.default_list_capacity = rows;
        self
    }

    pub fn entry_cache_capacity(mut self, entries: usize) -> Self {
        self.config.entry_cache_capacity = Some(entries);
        self
    }

    /// Build the configuration
    pub fn build(self) -> MapResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.size_limits(), SizeLimits::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str("default_list_capacity = 16\nentry_cache_capacity = 2")
            .unwrap();
        assert_eq!(config.default_list_capacity, 16);
        assert_eq!(config.entry_cache_capacity, Some(2));
        assert_eq!(config.text_size_ceiling, 4000);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EngineConfig::from_toml_str("text_size_ceiling = 0"),
            Err(MapError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("unknown_key = 1"),
            Err(MapError::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .text_size_ceiling(10)
            .entry_cache_capacity(5)
            .build()
            .unwrap();
        assert_eq!(config.size_limits().text, 10);
        assert_eq!(config.entry_cache_capacity, Some(5));
    }
}
