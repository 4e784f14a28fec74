//! Client configuration management.
//!
//! Settings are layered, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `config.toml` in the platform configuration directory (optional)
//! 3. Environment variables prefixed with `POINTAGE_`, nested keys separated
//!    by `__` (e.g. `POINTAGE_API__BASE_URL`)
//!
//! Covered settings:
//! - Remote API base URLs and request timeout
//! - Decode rate, camera readiness timeout, auto-submit
//! - State directory
//! - Banner lifetime and display timezone

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::storage::MAX_BANNER_TTL_SECS;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "POINTAGE";

/// Clocking API host used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "https://dnk-clocking-fleet.vercel.app";

/// Login API host used when nothing else is configured.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://dnk.aimen-blog.com";

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The layered sources could not be merged or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Writing the configuration file failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A value is out of range or malformed.
    #[error("invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted key of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// No home directory could be resolved for the default paths.
    #[error("cannot determine configuration directory")]
    NoConfigDirectory,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote API settings.
    pub api: ApiConfig,
    /// Camera and decoding settings.
    pub scan: ScanConfig,
    /// Persisted state location.
    pub storage: StorageConfig,
    /// Presentation settings.
    pub display: DisplayConfig,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Host serving `/api/admin/clocking`.
    pub base_url: Url,
    /// Host serving `/api/login`; falls back to `base_url` when unset.
    pub auth_base_url: Option<Url>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default API URL is valid"),
            auth_base_url: Some(
                Url::parse(DEFAULT_AUTH_BASE_URL).expect("default auth URL is valid"),
            ),
            timeout_secs: 15,
        }
    }
}

impl ApiConfig {
    /// Host used for login requests.
    #[must_use]
    pub fn auth_url(&self) -> &Url {
        self.auth_base_url.as_ref().unwrap_or(&self.base_url)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Camera and decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// Decode attempts per second while a scan phase is active.
    pub decode_fps: u32,
    /// How long to wait for a camera to report ready before proceeding anyway.
    pub camera_ready_timeout_ms: u64,
    /// Submit automatically once the driver code is locked.
    pub auto_submit: bool,
    /// Device id to use instead of the rear-camera heuristic.
    pub preferred_device: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            decode_fps: 10,
            camera_ready_timeout_ms: 1500,
            auto_submit: false,
            preferred_device: None,
        }
    }
}

impl ScanConfig {
    /// Interval between two decode attempts.
    #[must_use]
    pub fn decode_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.decode_fps.max(1)))
    }

    /// Camera readiness timeout as a [`Duration`].
    #[must_use]
    pub const fn camera_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_ready_timeout_ms)
    }
}

/// Persisted state location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `state.json`; platform data dir when unset.
    pub data_dir: Option<PathBuf>,
}

/// Presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Seconds before a success/error banner is dismissed.
    pub banner_ttl_secs: u64,
    /// Timezone used when showing history timestamps.
    #[serde(with = "timezone_serde")]
    pub timezone: Tz,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            banner_ttl_secs: 5,
            timezone: chrono_tz::UTC,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default file location and environment.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        let path = default_config_path()?;
        Self::load_layered(&path, false)
    }

    /// Load configuration from an explicit file, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a parse or
    /// validation error.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_layered(path, true)
    }

    fn load_layered(path: &Path, required: bool) -> ConfigResult<Self> {
        // Every section is `#[serde(default)]`, so absent keys keep the built-in values.
        let merged = config::Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = merged.try_deserialize()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Save configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges and URL schemes.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_http_url("api.base_url", &self.api.base_url)?;
        if let Some(url) = &self.api.auth_base_url {
            validate_http_url("api.auth_base_url", url)?;
        }
        if self.api.timeout_secs == 0 {
            return Err(invalid("api.timeout_secs", "must be greater than zero"));
        }
        if !(1..=60).contains(&self.scan.decode_fps) {
            return Err(invalid("scan.decode_fps", "must be between 1 and 60"));
        }
        if !(1..=MAX_BANNER_TTL_SECS.unsigned_abs()).contains(&self.display.banner_ttl_secs) {
            return Err(invalid(
                "display.banner_ttl_secs",
                &format!("must be between 1 and {MAX_BANNER_TTL_SECS}"),
            ));
        }
        Ok(())
    }

    /// Directory holding the persisted state file.
    ///
    /// # Errors
    ///
    /// Returns an error if no platform data directory can be resolved.
    pub fn data_dir(&self) -> ConfigResult<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDirectory)
    }
}

/// Default configuration file path (`<config dir>/config.toml`).
///
/// # Errors
///
/// Returns an error if no platform configuration directory can be resolved.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or(ConfigError::NoConfigDirectory)
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "pointage")
}

fn validate_http_url(field: &str, url: &Url) -> ConfigResult<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(field, &format!("unsupported scheme '{other}'"))),
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}

mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
