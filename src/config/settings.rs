//! TOML-based configuration for vizqa.
//!
//! Supports a config file (vizqa.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [service]
//! base_url = "https://tableau.example.com"
//! api_version = "v1"
//! auth_header = "X-Tableau-Auth"
//! timeout_secs = 30
//!
//! [model]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key = "${OPENAI_API_KEY}"
//! json_mode = true
//!
//! [retry]
//! max_attempts = 2
//! overall_timeout_secs = 120
//!
//! [metadata]
//! cache_enabled = true
//! cache_ttl_seconds = 3600
//! sample_values = 4
//! probe_concurrency = 4
//! data_dictionary = true
//!
//! [format]
//! strict = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Most sample values grounded per STRING field.
pub const MAX_SAMPLE_VALUES: usize = 4;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Tabular query service endpoint.
    pub service: ServiceSettings,

    /// Language model endpoint.
    pub model: ModelSettings,

    /// Self-correction loop bounds.
    pub retry: RetrySettings,

    /// Metadata grounding and caching.
    pub metadata: MetadataSettings,

    /// Result table rendering.
    pub format: FormatSettings,
}

/// Tabular query service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Server root (supports ${ENV_VAR} expansion).
    pub base_url: String,

    /// Path segment of the data service API (`/api/{api_version}/...`).
    pub api_version: String,

    /// Header carrying the credential.
    pub auth_header: String,

    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_version: "v1".to_string(),
            auth_header: "X-Tableau-Auth".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ServiceSettings {
    /// Get the base URL with environment variables expanded.
    pub fn resolved_base_url(&self) -> Result<String, SettingsError> {
        Ok(expand_env_vars(&self.base_url)?.trim_end_matches('/').to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    /// OpenAI-compatible API root (supports ${ENV_VAR} expansion).
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// API key (supports ${ENV_VAR} expansion).
    pub api_key: Option<String>,

    /// Sampling temperature. Compilation is deterministic at 0.
    pub temperature: f32,

    /// Per-request timeout.
    pub timeout_secs: u64,

    /// Request `response_format: json_object`.
    pub json_mode: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.0,
            timeout_secs: 30,
            json_mode: false,
        }
    }
}

impl ModelSettings {
    pub fn resolved_base_url(&self) -> Result<String, SettingsError> {
        Ok(expand_env_vars(&self.base_url)?.trim_end_matches('/').to_string())
    }

    /// Get the API key with environment variables expanded.
    pub fn resolved_api_key(&self) -> Result<Option<String>, SettingsError> {
        self.api_key.as_deref().map(expand_env_vars).transpose()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Compile/validate/execute attempts per request.
    pub max_attempts: usize,

    /// Wall-clock budget for one request.
    pub overall_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            overall_timeout_secs: 120,
        }
    }
}

impl RetrySettings {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }
}

/// Metadata configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Enable metadata caching.
    pub cache_enabled: bool,

    /// Cache TTL in seconds.
    pub cache_ttl_seconds: u64,

    /// Distinct values sampled per STRING field.
    pub sample_values: usize,

    /// Probe queries in flight at once.
    pub probe_concurrency: usize,

    /// Merge the data dictionary (descriptions, hidden flags, owner).
    pub data_dictionary: bool,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 3600,
            sample_values: MAX_SAMPLE_VALUES,
            probe_concurrency: 4,
            data_dictionary: true,
        }
    }
}

impl MetadataSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Result formatting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FormatSettings {
    /// Fail with `FormatError::NoData` instead of emitting the marker.
    pub strict: bool,

    /// Text emitted in place of an empty table.
    pub no_data_marker: String,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            strict: false,
            no_data_marker: crate::format::NO_DATA.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `VIZQA_CONFIG`
    /// 2. `./vizqa.toml`
    /// 3. `~/.config/vizqa/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("VIZQA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("vizqa.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("vizqa").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.metadata.sample_values > MAX_SAMPLE_VALUES {
            return Err(SettingsError::InvalidConfig(format!(
                "metadata.sample_values must be at most {MAX_SAMPLE_VALUES}"
            )));
        }
        if self.metadata.probe_concurrency == 0 {
            return Err(SettingsError::InvalidConfig(
                "metadata.probe_concurrency must be at least 1".to_string(),
            ));
        }
        if self.service.auth_header.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "service.auth_header must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.next_if_eq(&'{').is_some() {
            let name: String = std::iter::from_fn(|| chars.next_if(|ch| *ch != '}')).collect();
            chars.next(); // consume '}'
            name
        } else {
            std::iter::from_fn(|| chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_')).collect()
        };

        if var_name.is_empty() {
            // Just a lone $, keep it
            result.push('$');
            continue;
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}
