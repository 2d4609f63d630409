//! # Glossa Core
//!
//! Shared types and traits for the Glossa task orchestration engine.
//!
//! This crate provides:
//! - The task request/result model exchanged with callers
//! - The error taxonomy every backend normalizes into
//! - Request and response envelopes for the message channel
//! - The settings provider seam used to read credentials and language
//!   preferences

pub mod traits;
pub mod types;

pub use traits::{SettingsProvider, StaticSettings};
pub use types::{
    BackendFailure, BackendKind, Difficulty, LanguagePreferences, RequestEnvelope,
    ResponseEnvelope, RewriteTone, TaskError, TaskErrorKind, TaskOutput, TaskPayload, TaskRequest,
    TaskResult, TaskType, VocabularyEntry
};
