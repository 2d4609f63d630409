//! # Glossa Errors
//!
//! Infrastructure errors for the orchestration engine.
//!
//! Task-level failures travel as [`task_core::TaskError`] values. The enums
//! here cover the plumbing underneath: the host primitive that owns the
//! hidden execution context, the context manager on top of it, and the
//! engine's message channel. Each converts into the task taxonomy at the
//! boundary where a task is waiting on it.

use task_core::TaskError;
use thiserror::Error;

/// Errors raised by the platform primitive that creates, closes and talks to
/// the hidden execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The platform already holds a context. Creation primitives are not
    /// idempotent, so callers must treat this as "reuse the existing one".
    #[error("Execution context already exists")]
    AlreadyExists,

    #[error("Execution context is not running")]
    NotRunning,

    #[error("Execution context crashed: {reason}")]
    Crashed { reason: String },

    #[error("Execution context setup failed: {reason}")]
    SetupFailed { reason: String },

    #[error("Execution context rejected job: {reason}")]
    JobFailed { reason: String },

    #[error("Execution context job timed out after {timeout_ms}ms")]
    JobTimedOut { timeout_ms: u64 }
}

/// Errors surfaced by the execution context manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Execution context not ready after {timeout_ms}ms")]
    ReadyTimeout { timeout_ms: u64 },

    #[error("Execution context creation aborted: {reason}")]
    CreationAborted { reason: String },

    #[error("Execution context is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Host(#[from] HostError)
}

impl From<ContextError> for TaskError {
    fn from(err: ContextError) -> Self {
        TaskError::unavailable(err.to_string())
    }
}

/// Errors from the engine's channel service.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Request channel closed")]
    ChannelClosed,

    #[error("Reply for request {request_id} could not be delivered")]
    ReplyDropped { request_id: String },

    #[error("Invalid engine configuration: {message}")]
    Configuration { message: String }
}
