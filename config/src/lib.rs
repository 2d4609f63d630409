//! # Configuration System
//!
//! Centralized configuration for the Glossa orchestration engine.
//!
//! This crate provides:
//! - Configuration structures for every engine subsystem
//! - Environment variable loading (`GLOSSA_*`)
//! - Configuration file loading (TOML/YAML)
//! - Layered loading (file < env) followed by validation

pub mod config;
pub mod file_loader;
pub mod loader;

pub use config::{
    CacheConfig, CloudConfig, Config, EngineConfig, LanguageConfig, ObservabilityConfig,
    OnDeviceConfig, RetryPolicy
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{ConfigError, apply_env, load, load_from_env};
pub use validator::Validate;
