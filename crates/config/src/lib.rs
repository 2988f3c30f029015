//! Layered configuration for the voice call orchestration core.
//!
//! Supports loading from `config/default.yaml`, an environment-specific
//! overlay, and `VOICECORE__`-prefixed environment variables. `env` carries
//! the handful of ad-hoc provider/webhook secrets the core reads directly.

pub mod env;
pub mod settings;

pub use settings::{
    load_settings, AudioConfig, ExecutorCacheConfig, ObservabilityConfig, RuntimeEnvironment,
    ServerConfig, SessionConfig, Settings, WebhookConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
