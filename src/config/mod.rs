//! Configuration management for quarry
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Site origins
    #[serde(default)]
    pub site: SiteConfig,

    /// Content policy applied when materials are saved
    #[serde(default)]
    pub content: ContentConfig,

    /// Remote image download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Background propagation settings
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Listing defaults
    #[serde(default)]
    pub list: ListConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Site origin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Base URL of the site (e.g. https://example.com)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Origin that already serves re-hosted uploads
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
}

/// What to do with anchors pointing at other hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlinkPolicy {
    /// Keep the anchor and mark it rel="nofollow"
    #[default]
    Nofollow,
    /// Drop the anchor tag, keep its text
    Strip,
}

impl std::fmt::Display for OutlinkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutlinkPolicy::Nofollow => write!(f, "nofollow"),
            OutlinkPolicy::Strip => write!(f, "strip"),
        }
    }
}

/// Content policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Download external images and rewrite their src
    #[serde(default = "default_remote_download")]
    pub remote_download: bool,

    /// Outbound link treatment
    #[serde(default)]
    pub outlinks: OutlinkPolicy,
}

/// Remote image download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory for downloaded files, relative to the base dir unless absolute
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Public path prefix written into rewritten src attributes
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,

    /// Request timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// User agent string
    #[serde(default = "default_download_user_agent")]
    pub user_agent: String,

    /// Maximum accepted body size
    #[serde(default = "default_download_max_bytes")]
    pub max_bytes: usize,
}

/// Background propagation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Number of worker tasks
    #[serde(default = "default_propagation_workers")]
    pub workers: usize,

    /// Buffered propagation events per subscriber
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

/// Listing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    /// Page size used when the caller passes 0
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for quarry data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            storage_url: default_storage_url(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            remote_download: default_remote_download(),
            outlinks: OutlinkPolicy::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            public_prefix: default_public_prefix(),
            timeout_secs: default_download_timeout(),
            user_agent: default_download_user_agent(),
            max_bytes: default_download_max_bytes(),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            workers: default_propagation_workers(),
            events_capacity: default_events_capacity(),
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
        }
    }
}

impl Config {
    /// Get the default base directory for quarry (~/.quarry)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quarry")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("quarry.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("quarry.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Resolved directory where downloaded images are written
    pub fn upload_dir(&self) -> PathBuf {
        let dir = PathBuf::from(&self.download.upload_dir);
        if dir.is_absolute() {
            dir
        } else {
            self.paths.base_dir.join(dir)
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("site.base_url", &self.site.base_url),
            ("site.storage_url", &self.site.storage_url),
        ] {
            if !value.is_empty() {
                Url::parse(value).map_err(|e| {
                    Error::Config(format!("{} must be an absolute URL: {}", name, e))
                })?;
            }
        }

        if self.propagation.workers == 0 {
            return Err(Error::Config(
                "propagation.workers must be at least 1".to_string(),
            ));
        }

        if self.propagation.events_capacity == 0 {
            return Err(Error::Config(
                "propagation.events_capacity must be at least 1".to_string(),
            ));
        }

        if self.list.default_page_size == 0 {
            return Err(Error::Config(
                "list.default_page_size must be at least 1".to_string(),
            ));
        }

        if self.download.max_bytes == 0 {
            return Err(Error::Config(
                "download.max_bytes must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.content.outlinks, OutlinkPolicy::Nofollow);
        assert!(!config.content.remote_download);
        assert_eq!(config.propagation.workers, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.site.base_url = "https://example.com".to_string();
        config.content.outlinks = OutlinkPolicy::Strip;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.site.base_url, "https://example.com");
        assert_eq!(loaded.content.outlinks, OutlinkPolicy::Strip);
        assert_eq!(loaded.paths.db_file, tmp.path().join("quarry.db"));
    }

    #[test]
    fn test_outlink_policy_parses_lowercase() {
        let config: Config = toml::from_str(
            r#"
            [site]
            base_url = "https://example.com"

            [content]
            remote_download = true
            outlinks = "strip"
            "#,
        )
        .unwrap();
        assert!(config.content.remote_download);
        assert_eq!(config.content.outlinks, OutlinkPolicy::Strip);
        assert_eq!(config.download.public_prefix, "/uploads");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.site.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.site.base_url = "https://example.com".to_string();
        assert!(config.validate().is_ok());

        config.propagation.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_upload_dir_resolves_under_base() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        assert_eq!(config.upload_dir(), tmp.path().join("uploads"));
    }
}
