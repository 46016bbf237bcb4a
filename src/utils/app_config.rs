/// Application configuration management
/// Stores settings in ~/.config/shopdir-backup/config.toml, with
/// environment variables (and a .env file) taking precedence

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{is_dir_writable, DEFAULT_TRANSFER_CONCURRENCY};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON file holding the shop records
    pub data_file: PathBuf,
    /// Root of the static assets that local image references point into
    pub static_dir: PathBuf,
    /// Parent directory for per-invocation scratch directories
    pub scratch_dir: PathBuf,
    /// Concurrent asset fetches/uploads per backup or restore
    pub transfer_concurrency: usize,
    pub object_store: ObjectStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// Remote store issuing signed upload targets over HTTP
    Http { base_url: String },
    /// Directory on the local filesystem
    Local { root: PathBuf },
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/shops.json"),
            static_dir: PathBuf::from("public"),
            scratch_dir: std::env::temp_dir().join("shopdir-backup"),
            transfer_concurrency: DEFAULT_TRANSFER_CONCURRENCY,
            object_store: ObjectStoreConfig::Local {
                root: PathBuf::from("data/objects"),
            },
        }
    }
}

impl AppConfig {
    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("shopdir-backup");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, then apply env overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific file, then apply env overrides.
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;

            toml::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Apply SHOPDIR_* overrides from the given lookup (the process env in practice)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHOPDIR_DATA_FILE") {
            self.data_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHOPDIR_STATIC_DIR") {
            self.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHOPDIR_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHOPDIR_FETCH_CONCURRENCY") {
            self.transfer_concurrency = v
                .trim()
                .parse()
                .with_context(|| format!("SHOPDIR_FETCH_CONCURRENCY is not a number: {}", v))?;
        }

        // A URL wins over a directory when both are set
        if let Some(v) = lookup("SHOPDIR_OBJECT_STORE_DIR") {
            self.object_store = ObjectStoreConfig::Local { root: PathBuf::from(v) };
        }
        if let Some(v) = lookup("SHOPDIR_OBJECT_STORE_URL") {
            self.object_store = ObjectStoreConfig::Http { base_url: v };
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.transfer_concurrency == 0 {
            errors.push("transfer_concurrency must be at least 1".to_string());
        }

        if let ObjectStoreConfig::Http { base_url } = &self.object_store {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                errors.push(format!("Invalid object store URL: {}", base_url));
            }
        }

        if !self.static_dir.is_dir() {
            errors.push(format!(
                "Static assets directory not found: {}",
                self.static_dir.display()
            ));
        }

        if self.scratch_dir.is_dir() && !is_dir_writable(&self.scratch_dir) {
            errors.push(format!(
                "Scratch directory is not writable: {}",
                self.scratch_dir.display()
            ));
        }

        errors
    }

    /// Reject configurations the engine cannot run with.
    /// A missing static dir only degrades local image fetches, so it passes.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.transfer_concurrency == 0 {
            return Err(anyhow!("transfer_concurrency must be at least 1"));
        }

        if let ObjectStoreConfig::Http { base_url } = &self.object_store {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(anyhow!("Invalid object store URL: {}", base_url));
            }
        }

        Ok(())
    }
}
