//! Configuration for the relay.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::errors::{RelayError, RelayResult};

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "RELAY_PORT";
/// Environment variable overriding the backend base URL.
pub const OLLAMA_URL_ENV: &str = "RELAY_OLLAMA_URL";
/// Environment variable overriding the model name.
pub const MODEL_ENV: &str = "RELAY_MODEL";
/// Environment variable overriding the static asset directory.
pub const STATIC_DIR_ENV: &str = "RELAY_STATIC_DIR";
/// Environment variable overriding the session TTL.
pub const SESSION_TTL_ENV: &str = "RELAY_SESSION_TTL_SECS";
/// Environment variable selecting the failure policy.
pub const FAILURE_POLICY_ENV: &str = "RELAY_FAILURE_POLICY";
/// Environment variable selecting the reasoning markup mode.
pub const REASONING_MODE_ENV: &str = "RELAY_REASONING_MODE";

/// Longest accepted session cookie lifetime (400 days, the browser cap).
pub const MAX_COOKIE_MAX_AGE_SECONDS: i64 = 400 * 24 * 60 * 60;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Completion backend settings.
    pub backend: BackendConfig,
    /// Session lifetime settings.
    pub session: SessionConfig,
    /// Reply rendering settings.
    pub render: RenderConfig,
    /// Turn orchestration settings.
    pub orchestrator: OrchestratorConfig,
}

impl RelayConfig {
    /// Defaults overlaid with `RELAY_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> RelayResult<Self> {
        let mut config = Self::default();

        if let Some(port) = env_var(PORT_ENV) {
            config.server.port = port
                .parse()
                .map_err(|_| RelayError::InvalidConfig(format!("{PORT_ENV}={port}")))?;
        }
        if let Some(dir) = env_var(STATIC_DIR_ENV) {
            config.server.static_dir = PathBuf::from(dir);
        }
        if let Some(base_url) = env_var(OLLAMA_URL_ENV) {
            config.backend.base_url = base_url;
        }
        if let Some(model) = env_var(MODEL_ENV) {
            config.backend.model = model;
        }
        if let Some(ttl) = env_var(SESSION_TTL_ENV) {
            config.session.ttl_seconds = ttl
                .parse()
                .map_err(|_| RelayError::InvalidConfig(format!("{SESSION_TTL_ENV}={ttl}")))?;
        }
        if let Some(policy) = env_var(FAILURE_POLICY_ENV) {
            config.orchestrator.failure_policy = parse_snake_case(&policy, FAILURE_POLICY_ENV)?;
        }
        if let Some(mode) = env_var(REASONING_MODE_ENV) {
            config.render.reasoning = parse_snake_case(&mode, REASONING_MODE_ENV)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> RelayResult<()> {
        let base = Url::parse(&self.backend.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RelayError::InvalidConfig(format!(
                "backend.base_url must be http(s), got {}",
                base.scheme()
            )));
        }

        if self.backend.model.trim().is_empty() {
            return Err(RelayError::InvalidConfig(
                "backend.model must not be empty".to_string(),
            ));
        }

        if self.backend.connect_timeout_seconds == 0 {
            return Err(RelayError::InvalidConfig(
                "backend.connect_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.backend.idle_timeout_seconds == 0 {
            return Err(RelayError::InvalidConfig(
                "backend.idle_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.backend.max_line_bytes == 0 {
            return Err(RelayError::InvalidConfig(
                "backend.max_line_bytes must be > 0".to_string(),
            ));
        }

        if !(1..=MAX_COOKIE_MAX_AGE_SECONDS).contains(&self.session.cookie_max_age_seconds) {
            return Err(RelayError::InvalidConfig(format!(
                "session.cookie_max_age_seconds must be in 1..={MAX_COOKIE_MAX_AGE_SECONDS}"
            )));
        }

        if self.session.ttl_seconds == 0 {
            return Err(RelayError::InvalidConfig(
                "session.ttl_seconds must be > 0".to_string(),
            ));
        }

        if self.session.sweep_interval_seconds == 0 {
            return Err(RelayError::InvalidConfig(
                "session.sweep_interval_seconds must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_snake_case<T: serde::de::DeserializeOwned>(value: &str, name: &str) -> RelayResult<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_ascii_lowercase()))
        .map_err(|_| RelayError::InvalidConfig(format!("{name}={value}")))
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Completion backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Ollama base URL.
    pub base_url: String,
    /// Model name passed on every request.
    pub model: String,
    /// TCP connect timeout.
    pub connect_timeout_seconds: u64,
    /// Maximum silence between two stream elements.
    pub idle_timeout_seconds: u64,
    /// Extra attempts at opening the stream after a connection failure.
    pub max_retries: u32,
    /// Base delay between open attempts; grows linearly per attempt.
    pub retry_delay_ms: u64,
    /// Longest accepted stream line.
    pub max_line_bytes: usize,
}

impl BackendConfig {
    /// Connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Delay before open attempt number `attempt` (1-based retry count).
    #[must_use]
    pub const fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:1.5b".to_string(),
            connect_timeout_seconds: 5,
            idle_timeout_seconds: 120,
            max_retries: 2,
            retry_delay_ms: 250,
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Session lifetime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted.
    pub ttl_seconds: u64,
    /// Interval between eviction sweeps.
    pub sweep_interval_seconds: u64,
    /// Whether the background sweeper runs.
    pub sweeper_enabled: bool,
    /// Lifetime of the session cookie.
    pub cookie_max_age_seconds: i64,
}

impl SessionConfig {
    /// Session TTL as a `Duration`.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 60 * 60 * 24,
            sweep_interval_seconds: 60 * 10,
            sweeper_enabled: true,
            cookie_max_age_seconds: 60 * 60 * 24,
        }
    }
}

/// How backend reasoning markup is removed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Remove only the literal opening tag.
    #[default]
    StripMarker,
    /// Remove complete `<think>...</think>` blocks, then any stray opening tag.
    StripBlock,
}

/// Reply rendering settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Reasoning markup handling.
    pub reasoning: ReasoningMode,
}

/// What happens to the user turn when the backend fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the user turn before dispatch and keep it on failure.
    #[default]
    KeepUserTurn,
    /// Commit the user turn only together with the assistant turn.
    Rollback,
}

/// Turn orchestration settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Backend failure handling.
    pub failure_policy: FailurePolicy,
}
