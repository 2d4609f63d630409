//! # Configuration Structures
//!
//! All configuration structures for the Glossa engine.
//!
//! Every structure:
//! - Uses `serde` for (de)serialization, with a default for each field so
//!   partial files are accepted
//! - Uses `validator` for range checks
//! - Is plain data; runtime state lives in the engine

use serde::{Deserialize, Serialize};
use task_core::{LanguagePreferences, SettingsProvider};
use validator::Validate;

/// Top-level configuration aggregating every engine subsystem.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("concurrent tasks: {}", config.engine.max_concurrent_tasks);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Router and context manager settings
    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineConfig,

    /// Per-backend retry policy
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// Result cache settings
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Cloud backend settings (credential, endpoint, model)
    #[serde(default)]
    #[validate(nested)]
    pub cloud: CloudConfig,

    /// On-device backend settings (local model server)
    #[serde(default)]
    #[validate(nested)]
    pub on_device: OnDeviceConfig,

    /// User language preferences
    #[serde(default)]
    #[validate(nested)]
    pub languages: LanguageConfig,

    /// Logging and metrics
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig
}

impl SettingsProvider for Config {
    fn cloud_api_key(&self) -> Option<String> {
        self.cloud.api_key.clone().filter(|key| !key.trim().is_empty())
    }

    fn language_preferences(&self) -> LanguagePreferences {
        LanguagePreferences {
            native_language: self.languages.native_language.clone(),
            learning_language: self.languages.learning_language.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct EngineConfig {
    /// Requests allowed to run the fallback chain at the same time
    #[serde(default = "default_max_concurrent_tasks")]
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_tasks: usize,

    /// Deadline applied when a request does not carry its own
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 10, max = 600000))]
    pub default_timeout_ms: u64,

    /// How long the hidden context may take to signal readiness
    #[serde(default = "default_context_ready_timeout_ms")]
    #[validate(range(min = 10, max = 120000))]
    pub context_ready_timeout_ms: u64,

    /// Capacity of the lifecycle event broadcast channel
    #[serde(default = "default_event_capacity")]
    #[validate(range(min = 16, max = 65536))]
    pub event_capacity: usize
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_context_ready_timeout_ms() -> u64 {
    10000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            default_timeout_ms: default_request_timeout_ms(),
            context_ready_timeout_ms: default_context_ready_timeout_ms(),
            event_capacity: default_event_capacity()
        }
    }
}

/// Bounded retry with exponential backoff for a single backend.
///
/// Delay before attempt `n + 1` is `min(base_delay_ms * 2^(n-1), max_delay_ms)`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_retry_delays"))]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    #[validate(range(min = 0, max = 60000))]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 0, max = 300000))]
    pub max_delay_ms: u64,

    /// Spread each delay by ±15% so concurrent retries do not align
    #[serde(default = "default_jitter")]
    pub jitter: bool
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_jitter() -> bool {
    true
}

fn validate_retry_delays(policy: &RetryPolicy) -> Result<(), validator::ValidationError> {
    if policy.max_delay_ms < policy.base_delay_ms {
        return Err(validator::ValidationError::new(
            "max_delay_ms must not be below base_delay_ms"
        ));
    }
    Ok(())
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter()
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests and latency-critical callers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false
        }
    }

    /// Backoff before the attempt following `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        std::time::Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    #[validate(range(min = 1, max = 2592000))]
    pub ttl_secs: u64,

    /// Budget for the summed serialized size of all entries
    #[serde(default = "default_cache_max_bytes")]
    #[validate(range(min = 1024, max = 1073741824))]
    pub max_bytes: usize
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_cache_max_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            max_bytes: default_cache_max_bytes()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CloudConfig {
    /// Access credential; the cloud backend is skipped when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_cloud_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default = "default_cloud_model")]
    #[validate(length(min = 1, max = 255))]
    pub model: String,

    #[serde(default = "default_cloud_request_timeout_ms")]
    #[validate(range(min = 100, max = 300000))]
    pub request_timeout_ms: u64
}

fn default_cloud_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_cloud_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_cloud_request_timeout_ms() -> u64 {
    20000
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_cloud_endpoint(),
            model: default_cloud_model(),
            request_timeout_ms: default_cloud_request_timeout_ms()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct OnDeviceConfig {
    #[serde(default = "default_on_device_enabled")]
    pub enabled: bool,

    /// Local model server reached from inside the execution context
    #[serde(default = "default_on_device_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default = "default_on_device_model")]
    #[validate(length(min = 1, max = 255))]
    pub model: String,

    #[serde(default = "default_on_device_request_timeout_ms")]
    #[validate(range(min = 100, max = 300000))]
    pub request_timeout_ms: u64
}

fn default_on_device_enabled() -> bool {
    true
}

fn default_on_device_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_on_device_model() -> String {
    "gemma3:4b".to_string()
}

fn default_on_device_request_timeout_ms() -> u64 {
    30000
}

impl Default for OnDeviceConfig {
    fn default() -> Self {
        Self {
            enabled: default_on_device_enabled(),
            endpoint: default_on_device_endpoint(),
            model: default_on_device_model(),
            request_timeout_ms: default_on_device_request_timeout_ms()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LanguageConfig {
    /// Default translation target
    #[serde(default = "default_native_language")]
    #[validate(length(min = 2, max = 16))]
    pub native_language: String,

    #[serde(default)]
    #[validate(length(min = 2, max = 16))]
    pub learning_language: Option<String>
}

fn default_native_language() -> String {
    "en".to_string()
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            native_language: default_native_language(),
            learning_language: None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    /// Emit `metrics` counters and histograms
    #[serde(default = "default_observability_metrics_enabled")]
    pub metrics_enabled: bool,

    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_observability_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String
}

fn default_observability_metrics_enabled() -> bool {
    true
}

fn default_observability_logging_level() -> String {
    "info".to_string()
}

fn validate_logging_level(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid logging level"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_observability_metrics_enabled(),
            logging_level: default_observability_logging_level()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.cache.ttl_secs, 86400);
        assert_eq!(config.cache.max_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_nested_validation_rejects_bad_section() {
        let mut config = Config::default();
        config.engine.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.observability.logging_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delays_must_be_ordered() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10,
            jitter: false
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_ms: 500,
            max_delay_ms: 3000,
            jitter: false
        };
        assert_eq!(policy.delay_for(1).as_millis(), 500);
        assert_eq!(policy.delay_for(2).as_millis(), 1000);
        assert_eq!(policy.delay_for(3).as_millis(), 2000);
        assert_eq!(policy.delay_for(4).as_millis(), 3000);
        assert_eq!(policy.delay_for(40).as_millis(), 3000);
    }

    #[test]
    fn test_config_acts_as_settings_provider() {
        let mut config = Config::default();
        assert!(config.cloud_api_key().is_none());

        config.cloud.api_key = Some("secret".to_string());
        config.languages.native_language = "de".to_string();
        assert_eq!(config.cloud_api_key().as_deref(), Some("secret"));
        assert_eq!(config.language_preferences().native_language, "de");
    }
}
