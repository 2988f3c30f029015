//! Layered application settings: `config/default.yaml` < `config/{env}.yaml`
//! < environment variables (`VOICECORE__` prefix, `__`-separated).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub executor_cache: ExecutorCacheConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.executor_cache.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor_cache.max_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.session.silence_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.silence_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.environment.is_production()
            && self.webhook.app_secret.is_none()
            && self.webhook.verify_token.is_some()
        {
            tracing::warn!(
                "webhook.verify_token is set without webhook.app_secret in production; \
                 incoming POSTs will not be signature-verified"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_widget_ws_path")]
    pub widget_ws_path: String,
    #[serde(default = "default_telephony_ws_path")]
    pub telephony_ws_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_widget_ws_path() -> String {
    "/api/widget/call/ws".to_string()
}
fn default_telephony_ws_path() -> String {
    "/api/widget/call/twilio/stream".to_string()
}
fn default_max_connections() -> usize {
    1000
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            widget_ws_path: default_widget_ws_path(),
            telephony_ws_path: default_telephony_ws_path(),
            max_connections: default_max_connections(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Session manager timers (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    #[serde(default = "default_stale_terminal_secs")]
    pub stale_terminal_secs: u64,
}

fn default_silence_timeout_secs() -> u64 {
    180
}
fn default_gc_interval_secs() -> u64 {
    60
}
fn default_stale_terminal_secs() -> u64 {
    600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_timeout_secs: default_silence_timeout_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            stale_terminal_secs: default_stale_terminal_secs(),
        }
    }
}

/// Executor cache parameters (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorCacheConfig {
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_inactivity_ttl_secs")]
    pub inactivity_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_cache_max_size() -> usize {
    100
}
fn default_inactivity_ttl_secs() -> u64 {
    3 * 3600
}
fn default_cleanup_interval_secs() -> u64 {
    15 * 60
}

impl Default for ExecutorCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            inactivity_ttl_secs: default_inactivity_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Audio pipeline defaults (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default = "default_max_queue_chunks")]
    pub max_queue_chunks: usize,
    #[serde(default = "default_silence_rms_threshold")]
    pub silence_rms_threshold: f32,
}

fn default_send_interval_ms() -> u64 {
    10
}
fn default_max_queue_chunks() -> usize {
    500
}
fn default_silence_rms_threshold() -> f32 {
    0.01
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
            max_queue_chunks: default_max_queue_chunks(),
            silence_rms_threshold: default_silence_rms_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Messenger webhook verification (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub verify_token: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest): environment variables (`VOICECORE__` prefix)
/// > `config/{env}.yaml` > `config/default.yaml`.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICECORE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_invalid() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_cache_size_is_invalid() {
        let mut settings = Settings::default();
        settings.executor_cache.max_size = 0;
        assert!(settings.validate().is_err());
    }
}
