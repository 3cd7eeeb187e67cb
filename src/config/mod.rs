//! Configuration module for vizqa.
//!
//! Handles the settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, FormatSettings, MetadataSettings, ModelSettings, RetrySettings,
    ServiceSettings, Settings, SettingsError, MAX_SAMPLE_VALUES,
};
