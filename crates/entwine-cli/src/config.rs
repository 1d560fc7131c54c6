//! CLI configuration

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::output::OutputFormat;
use entwine_core::limits::MAX_PAGE_LIMIT;

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("entwine")
}

/// Location of `config.toml`, unless overridden with `--config`
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("entwine")
            .join("config.toml"),
    }
}

/// Configuration for the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Preset name or path to a schema file
    pub schema: String,

    /// Page size for `entity page` when `--limit` is not given
    pub page_size: i64,

    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            schema: "school".to_string(),
            page_size: 20,
            format: "table".to_string(),
        }
    }
}

const KEYS: &[&str] = &["data_dir", "schema", "page_size", "format"];

impl Config {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn keys() -> &'static [&'static str] {
        KEYS
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "data_dir" => Some(
                self.data_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string()),
            ),
            "schema" => Some(self.schema.clone()),
            "page_size" => Some(self.page_size.to_string()),
            "format" => Some(self.format.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "schema" => {
                if value.trim().is_empty() {
                    anyhow::bail!("schema must not be empty");
                }
                self.schema = value.to_string();
            }
            "page_size" => {
                let size: i64 = value
                    .parse()
                    .with_context(|| format!("page_size must be an integer, got '{}'", value))?;
                if size <= 0 {
                    anyhow::bail!("page_size must be greater than 0");
                }
                if size > MAX_PAGE_LIMIT as i64 {
                    anyhow::bail!("page_size must not exceed {}", MAX_PAGE_LIMIT);
                }
                self.page_size = size;
            }
            "format" => {
                let format: OutputFormat = value.parse()?;
                self.format = format.to_string();
            }
            _ => anyhow::bail!(
                "Unknown config key: {} (available: {})",
                key,
                KEYS.join(", ")
            ),
        }
        Ok(())
    }
}
