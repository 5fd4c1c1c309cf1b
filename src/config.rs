//! relq configuration
//!
//! Read from `relq.toml` in the working directory, falling back to
//! `<config dir>/relq/config.toml`.
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! schema_path = "schema.json"
//! page_size = 50
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RelqError, RelqResult};
use crate::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "relq.toml";

/// Main relq configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelqConfig {
    /// Database connection URL
    pub database_url: Option<String>,

    /// Path to the schema file (JSON or TOML)
    pub schema_path: Option<PathBuf>,

    /// Default page size
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Pool size for the PostgreSQL transport
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_max_connections() -> u32 {
    5
}

impl Default for RelqConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            schema_path: None,
            page_size: default_page_size(),
            max_connections: default_max_connections(),
        }
    }
}

impl RelqConfig {
    /// Create a new configuration builder
    pub fn builder() -> RelqConfigBuilder {
        RelqConfigBuilder::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(input: &str) -> RelqResult<Self> {
        let config: RelqConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RelqResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// First config file found, or defaults when there is none.
    pub fn load() -> RelqResult<Self> {
        match Self::locate() {
            Some(path) => Self::from_file(&path),
            None => {
                tracing::debug!("No {} found, using defaults", CONFIG_FILE);
                Ok(Self::default())
            }
        }
    }

    fn locate() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("relq").join("config.toml"))
            .filter(|path| path.is_file())
    }

    pub fn validate(&self) -> RelqResult<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(RelqError::Config(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if self.max_connections == 0 {
            return Err(RelqError::Config("max_connections must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder for RelqConfig
#[derive(Debug, Default)]
pub struct RelqConfigBuilder {
    config: RelqConfig,
}

impl RelqConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Set the schema path
    pub fn schema(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.schema_path = Some(path.into());
        self
    }

    pub fn page_size(mut self, size: u64) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RelqResult<RelqConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_toml_defaults() {
        let config = RelqConfig::from_toml(r#"database_url = "postgres://localhost/app""#).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_builder_validates() {
        let config = RelqConfig::builder().schema("schema.json").page_size(50).build().unwrap();
        assert_eq!(config.schema_path, Some(PathBuf::from("schema.json")));
        assert!(RelqConfig::builder().page_size(0).build().is_err());
        assert!(matches!(
            RelqConfig::from_toml("page_size = 5000"),
            Err(RelqError::Config(_))
        ));
    }
}
