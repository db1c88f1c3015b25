//! Application configuration management.
//!
//! Configuration is layered with figment, lowest priority first:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config PATH`, else `config.toml` in the platform
//!    configuration directory, if present)
//! 3. environment variables prefixed `TRACKDEDUP_` (`__` separates nested
//!    keys, e.g. `TRACKDEDUP_API__RETRIES=5`)
//! 4. command-line flags, applied by the caller
//!
//! # Example
//!
//! ```toml
//! io_threads = 8
//! coverage_threshold = 0.9
//!
//! [catalog]
//! url = "http://localhost:41595/api"
//! list_limit = 50000
//!
//! [workspace.path_fields]
//! flac = "Lossless Path"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::catalog::{ContainerFormat, RecordSchema, RetryPolicy};
use crate::duplicates::GroupingConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TRACKDEDUP_";

/// Errors loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or has the wrong shape.
    #[error("Invalid configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// A value is out of range.
    #[error("Invalid value for {key}: {message}")]
    Invalid {
        /// Dotted key
        key: &'static str,
        /// What is wrong
        message: String,
    },
}

/// Catalog application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Base URL of the catalog API
    pub url: String,
    /// Listing limit; must exceed the catalog size
    pub list_limit: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:41595/api".to_string(),
            list_limit: 20_000,
        }
    }
}

/// Workspace database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Base URL of the workspace API
    pub url: String,
    /// Field holding the mirrored fingerprint
    pub fingerprint_field: String,
    /// Path field per format (`aiff`, `mp4`, `mp3`, `flac`, `wav`)
    pub path_fields: BTreeMap<String, String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        let schema = RecordSchema::default();
        Self {
            url: "http://127.0.0.1:8700/api".to_string(),
            fingerprint_field: schema.fingerprint_field,
            path_fields: schema
                .path_fields
                .into_iter()
                .map(|(format, field)| (format.as_str().to_string(), field))
                .collect(),
        }
    }
}

/// Timeout and retry settings shared by both APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after a transient failure
    pub retries: u32,
    /// First backoff delay in milliseconds
    pub backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 3,
            backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog application
    pub catalog: CatalogSettings,
    /// Workspace database
    pub workspace: WorkspaceSettings,
    /// Timeouts and retries
    pub api: ApiSettings,
    /// Fingerprint worker threads
    pub io_threads: usize,
    /// Minimum coverage for deduplication
    pub coverage_threshold: f64,
    /// Whether the coverage gate is enforced
    pub coverage_required: bool,
    /// Minimum name similarity for approximate matches
    pub similarity_threshold: f64,
    /// Whether items without fingerprint are matched by name
    pub fuzzy_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogSettings::default(),
            workspace: WorkspaceSettings::default(),
            api: ApiSettings::default(),
            io_threads: 4,
            coverage_threshold: crate::duplicates::coverage::DEFAULT_THRESHOLD,
            coverage_required: true,
            similarity_threshold: crate::duplicates::similarity::DEFAULT_THRESHOLD,
            fuzzy_fallback: true,
        }
    }
}

impl Config {
    /// Load configuration from defaults, file, and environment, then validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file is missing, any layer is
    /// malformed, or a value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                log::debug!("Loading configuration from {}", p.display());
                figment = figment.merge(Toml::file(p));
            }
            None => {
                if let Some(default) = Self::default_path().filter(|p| p.exists()) {
                    log::debug!("Loading configuration from {}", default.display());
                    figment = figment.merge(Toml::file(default));
                }
            }
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Platform-specific configuration file path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "trackdedup", "trackdedup")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check ranges and URLs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("coverage_threshold", self.coverage_threshold)?;
        check_ratio("similarity_threshold", self.similarity_threshold)?;
        if self.io_threads == 0 {
            return Err(ConfigError::Invalid {
                key: "io_threads",
                message: "must be at least 1".to_string(),
            });
        }
        if self.catalog.list_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "catalog.list_limit",
                message: "must be at least 1".to_string(),
            });
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "api.timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        self.catalog_url()?;
        self.workspace_url()?;
        self.record_schema()?;
        Ok(())
    }

    /// Parsed catalog URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the URL does not parse.
    pub fn catalog_url(&self) -> Result<Url, ConfigError> {
        parse_url("catalog.url", &self.catalog.url)
    }

    /// Parsed workspace URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the URL does not parse.
    pub fn workspace_url(&self) -> Result<Url, ConfigError> {
        parse_url("workspace.url", &self.workspace.url)
    }

    /// Typed workspace schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown format key.
    pub fn record_schema(&self) -> Result<RecordSchema, ConfigError> {
        let mut path_fields = BTreeMap::new();
        for (key, field) in &self.workspace.path_fields {
            let format =
                ContainerFormat::from_extension(key).ok_or_else(|| ConfigError::Invalid {
                    key: "workspace.path_fields",
                    message: format!("unknown format '{}'", key),
                })?;
            path_fields.insert(format, field.clone());
        }
        Ok(RecordSchema {
            fingerprint_field: self.workspace.fingerprint_field.clone(),
            path_fields,
        })
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Retry policy for both APIs.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.api.retries, self.api.backoff_ms, self.api.max_backoff_ms)
    }

    /// Grouper settings.
    #[must_use]
    pub fn grouping(&self) -> GroupingConfig {
        GroupingConfig::default()
            .with_similarity_threshold(self.similarity_threshold)
            .with_fuzzy_fallback(self.fuzzy_fallback)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn check_ratio(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("{} is not between 0 and 1", value),
        })
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", value, e),
    })
}
