//! Engine configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. `ARENA_*` environment variables
//! 2. Values from a TOML file (`EngineConfig::from_toml_file`)
//! 3. Built-in defaults
//!
//! The configuration is read once when the run store is built; nothing in
//! the engine re-reads it per call.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, ArenaResult};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_COMPLETIONS_PATH: &str = "/v3/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 256;
const DEFAULT_MAX_TOKENS_CEILING: u32 = 4096;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_RETRY_COUNT: u32 = 1;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_PARALLEL_REQUESTS: usize = 3;

const ENV_BASE_URL: &str = "ARENA_BASE_URL";
const ENV_API_KEY: &str = "ARENA_API_KEY";
const ENV_MAX_TOKENS: &str = "ARENA_MAX_TOKENS";
const ENV_TIMEOUT_SECS: &str = "ARENA_TIMEOUT_SECS";
const ENV_RETRIES: &str = "ARENA_RETRIES";
const ENV_AUTO_DELAY_MS: &str = "ARENA_AUTO_DELAY_MS";
const ENV_STEP_IDLE_TIMEOUT_SECS: &str = "ARENA_STEP_IDLE_TIMEOUT_SECS";
const ENV_SYNTHESIS_MODEL: &str = "ARENA_SYNTHESIS_MODEL";

/// Runtime configuration consumed by the model client, phase executor,
/// aggregator and run store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base address of the OpenAI-style inference endpoint.
    pub base_url: String,
    /// Path of the chat-completions route, appended to `base_url`.
    pub completions_path: String,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
    /// Token budget used for every participant call.
    pub default_max_tokens: u32,
    /// Upper bound applied to any requested budget.
    pub max_tokens_ceiling: u32,
    pub temperature: f32,
    /// Per generation call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Extra attempts after a failed participant call.
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    /// Concurrent generation calls allowed within one phase.
    pub max_parallel_requests: usize,
    /// Pause between phases of an auto-mode run (0 = yield only).
    pub auto_phase_delay_ms: u64,
    /// Fail a step-mode run left in `awaiting_advance` this long (None = never).
    pub step_idle_timeout_ms: Option<u64>,
    /// Model used for the final synthesis when the template has no moderator.
    pub synthesis_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            completions_path: DEFAULT_COMPLETIONS_PATH.to_string(),
            api_key: None,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            max_tokens_ceiling: DEFAULT_MAX_TOKENS_CEILING,
            temperature: 0.0,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_parallel_requests: DEFAULT_MAX_PARALLEL_REQUESTS,
            auto_phase_delay_ms: 0,
            step_idle_timeout_ms: None,
            synthesis_model: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `ARENA_*` environment variables.
    pub fn from_env() -> ArenaResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ArenaResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ArenaError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> ArenaResult<Self> {
        toml::from_str(raw).map_err(|e| ArenaError::Configuration(e.to_string()))
    }

    fn apply_env(&mut self) -> ArenaResult<()> {
        if let Ok(url) = env::var(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Ok(key) = env::var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(tokens) = parse_env::<u32>(ENV_MAX_TOKENS)? {
            self.default_max_tokens = tokens;
        }
        if let Some(secs) = parse_env::<u64>(ENV_TIMEOUT_SECS)? {
            self.request_timeout_ms = secs_to_ms(ENV_TIMEOUT_SECS, secs)?;
        }
        if let Some(retries) = parse_env::<u32>(ENV_RETRIES)? {
            self.retry_count = retries;
        }
        if let Some(delay) = parse_env::<u64>(ENV_AUTO_DELAY_MS)? {
            self.auto_phase_delay_ms = delay;
        }
        if let Some(secs) = parse_env::<u64>(ENV_STEP_IDLE_TIMEOUT_SECS)? {
            self.step_idle_timeout_ms = Some(secs_to_ms(ENV_STEP_IDLE_TIMEOUT_SECS, secs)?);
        }
        if let Ok(model) = env::var(ENV_SYNTHESIS_MODEL) {
            self.synthesis_model = Some(model);
        }
        Ok(())
    }

    /// Validate the config; return an error if it cannot drive a run.
    pub fn validate(&self) -> ArenaResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ArenaError::Configuration("base_url must not be empty".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ArenaError::Configuration(
                "request_timeout_ms must be > 0".into(),
            ));
        }
        if self.max_parallel_requests == 0 {
            return Err(ArenaError::Configuration(
                "max_parallel_requests must be > 0".into(),
            ));
        }
        if self.default_max_tokens == 0 || self.default_max_tokens > self.max_tokens_ceiling {
            return Err(ArenaError::Configuration(format!(
                "default_max_tokens must be in 1..={}, got {}",
                self.max_tokens_ceiling, self.default_max_tokens
            )));
        }
        Ok(())
    }

    /// Full URL of the chat-completions route.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.completions_path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn auto_phase_delay(&self) -> Duration {
        Duration::from_millis(self.auto_phase_delay_ms)
    }

    pub fn step_idle_timeout(&self) -> Option<Duration> {
        self.step_idle_timeout_ms.map(Duration::from_millis)
    }

    /// Clamp a requested token budget to the configured ceiling.
    pub fn clamp_max_tokens(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default_max_tokens.min(self.max_tokens_ceiling)
        } else {
            requested.min(self.max_tokens_ceiling)
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> ArenaResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ArenaError::Configuration(format!("{} is not a valid number: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

fn secs_to_ms(name: &str, secs: u64) -> ArenaResult<u64> {
    secs.checked_mul(1000)
        .ok_or_else(|| ArenaError::Configuration(format!("{} is out of range: {}", name, secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry_count, 1);
        assert_eq!(config.temperature, 0.0);
        assert!(config.step_idle_timeout().is_none());
    }

    #[test]
    fn test_completions_url_joins_slashes() {
        let config = EngineConfig {
            base_url: "http://localhost:9000/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.completions_url(),
            "http://localhost:9000/v3/chat/completions"
        );
    }

    #[test]
    fn test_toml_partial_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            base_url = "http://ovms:8000"
            retry_count = 3
            step_idle_timeout_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://ovms:8000");
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.step_idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.default_max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_toml_unknown_type_rejected() {
        let err = EngineConfig::from_toml_str("retry_count = \"many\"").unwrap_err();
        assert!(matches!(err, ArenaError::Configuration(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.toml");
        std::fs::write(&path, "max_parallel_requests = 5\n").unwrap();
        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.max_parallel_requests, 5);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = EngineConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_budget_over_ceiling() {
        let config = EngineConfig {
            default_max_tokens: 8192,
            max_tokens_ceiling: 4096,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_max_tokens() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_max_tokens(0), DEFAULT_MAX_TOKENS);
        assert_eq!(config.clamp_max_tokens(100_000), DEFAULT_MAX_TOKENS_CEILING);
        assert_eq!(config.clamp_max_tokens(512), 512);
    }

    #[test]
    fn test_env_seconds_overflow_is_configuration_error() {
        assert_eq!(secs_to_ms(ENV_TIMEOUT_SECS, 30).unwrap(), 30_000);
        let err = secs_to_ms(ENV_STEP_IDLE_TIMEOUT_SECS, u64::MAX).unwrap_err();
        assert!(matches!(err, ArenaError::Configuration(_)));
        assert!(err.to_string().contains(ENV_STEP_IDLE_TIMEOUT_SECS));
    }
}
