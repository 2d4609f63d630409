//! # Environment Variable Loader
//!
//! Layers configuration sources: defaults, then an optional file, then
//! `GLOSSA_*` environment variables, then validation.
//!
//! # Environment Variables
//! - `GLOSSA_MAX_CONCURRENT_TASKS`, `GLOSSA_DEFAULT_TIMEOUT_MS`,
//!   `GLOSSA_CONTEXT_READY_TIMEOUT_MS`
//! - `GLOSSA_RETRY_MAX_ATTEMPTS`, `GLOSSA_RETRY_BASE_DELAY_MS`,
//!   `GLOSSA_RETRY_MAX_DELAY_MS`, `GLOSSA_RETRY_JITTER`
//! - `GLOSSA_CACHE_ENABLED`, `GLOSSA_CACHE_TTL_SECS`, `GLOSSA_CACHE_MAX_BYTES`
//! - `GLOSSA_CLOUD_API_KEY`, `GLOSSA_CLOUD_ENDPOINT`, `GLOSSA_CLOUD_MODEL`
//! - `GLOSSA_ON_DEVICE_ENABLED`, `GLOSSA_ON_DEVICE_ENDPOINT`,
//!   `GLOSSA_ON_DEVICE_MODEL`
//! - `GLOSSA_NATIVE_LANGUAGE`, `GLOSSA_LEARNING_LANGUAGE`
//! - `GLOSSA_LOG_LEVEL`, `GLOSSA_METRICS_ENABLED`

use crate::config::Config;
use crate::file_loader::{ConfigFileError, load_from_file};
use std::env;
use std::path::Path;
use std::str::FromStr;
use validator::Validate;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error("Invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors)
}

/// Load configuration from defaults and environment variables.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("retry attempts: {}", config.retry.max_attempts);
///     Ok(())
/// }
/// ```
pub fn load_from_env() -> Result<Config, ConfigError> {
    apply_env(Config::default())
}

/// Full load pipeline: defaults → file (if given) → environment → validation.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let base = match path {
        Some(path) => load_from_file(path)?,
        None => Config::default()
    };
    let config = apply_env(base)?;
    config.validate()?;
    Ok(config)
}

/// Override `config` with every `GLOSSA_*` variable that is set.
pub fn apply_env(mut config: Config) -> Result<Config, ConfigError> {
    override_with(&mut config.engine.max_concurrent_tasks, "GLOSSA_MAX_CONCURRENT_TASKS")?;
    override_with(&mut config.engine.default_timeout_ms, "GLOSSA_DEFAULT_TIMEOUT_MS")?;
    override_with(
        &mut config.engine.context_ready_timeout_ms,
        "GLOSSA_CONTEXT_READY_TIMEOUT_MS"
    )?;

    override_with(&mut config.retry.max_attempts, "GLOSSA_RETRY_MAX_ATTEMPTS")?;
    override_with(&mut config.retry.base_delay_ms, "GLOSSA_RETRY_BASE_DELAY_MS")?;
    override_with(&mut config.retry.max_delay_ms, "GLOSSA_RETRY_MAX_DELAY_MS")?;
    override_with(&mut config.retry.jitter, "GLOSSA_RETRY_JITTER")?;

    override_with(&mut config.cache.enabled, "GLOSSA_CACHE_ENABLED")?;
    override_with(&mut config.cache.ttl_secs, "GLOSSA_CACHE_TTL_SECS")?;
    override_with(&mut config.cache.max_bytes, "GLOSSA_CACHE_MAX_BYTES")?;

    if let Ok(key) = env::var("GLOSSA_CLOUD_API_KEY") {
        config.cloud.api_key = Some(key);
    }
    override_with(&mut config.cloud.endpoint, "GLOSSA_CLOUD_ENDPOINT")?;
    override_with(&mut config.cloud.model, "GLOSSA_CLOUD_MODEL")?;

    override_with(&mut config.on_device.enabled, "GLOSSA_ON_DEVICE_ENABLED")?;
    override_with(&mut config.on_device.endpoint, "GLOSSA_ON_DEVICE_ENDPOINT")?;
    override_with(&mut config.on_device.model, "GLOSSA_ON_DEVICE_MODEL")?;

    override_with(&mut config.languages.native_language, "GLOSSA_NATIVE_LANGUAGE")?;
    if let Ok(language) = env::var("GLOSSA_LEARNING_LANGUAGE") {
        config.languages.learning_language = Some(language);
    }

    override_with(&mut config.observability.logging_level, "GLOSSA_LOG_LEVEL")?;
    override_with(&mut config.observability.metrics_enabled, "GLOSSA_METRICS_ENABLED")?;

    Ok(config)
}

fn override_with<T>(slot: &mut T, key: &str) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    if let Some(value) = parse_env(key)? {
        *slot = value;
    }
    Ok(())
}

/// `Ok(None)` when unset, an error when set but unparsable.
fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key: key.to_string(),
                reason: e.to_string()
            }),
        Err(_) => Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "GLOSSA_MAX_CONCURRENT_TASKS",
        "GLOSSA_RETRY_MAX_ATTEMPTS",
        "GLOSSA_CACHE_ENABLED",
        "GLOSSA_CLOUD_API_KEY",
        "GLOSSA_LOG_LEVEL"
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_from_env_defaults() {
        clear_env();
        let config = load_from_env().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("GLOSSA_MAX_CONCURRENT_TASKS", "8");
            env::set_var("GLOSSA_RETRY_MAX_ATTEMPTS", "5");
            env::set_var("GLOSSA_CACHE_ENABLED", "false");
            env::set_var("GLOSSA_CLOUD_API_KEY", "key-abc");
        }

        let config = load_from_env().unwrap();
        assert_eq!(config.engine.max_concurrent_tasks, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.cache.enabled);
        assert_eq!(config.cloud.api_key.as_deref(), Some("key-abc"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparsable_env_is_an_error() {
        clear_env();
        unsafe {
            env::set_var("GLOSSA_RETRY_MAX_ATTEMPTS", "many");
        }

        let err = load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "GLOSSA_RETRY_MAX_ATTEMPTS"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_validates_result() {
        clear_env();
        unsafe {
            env::set_var("GLOSSA_LOG_LEVEL", "loud");
        }

        assert!(matches!(load(None), Err(ConfigError::Validation(_))));

        clear_env();
    }

    #[test]
    fn test_parse_env_missing() {
        let result: Result<Option<u32>, _> = parse_env("GLOSSA_NONEXISTENT_VAR");
        assert!(matches!(result, Ok(None)));
    }
}
