//! Platform primitive behind the execution context.
//!
//! A [`ContextHost`] knows how to create, probe, use and close exactly one
//! hidden context. It does not coordinate callers; the
//! [`ExecutionContextManager`](crate::context::ExecutionContextManager)
//! serializes creation on top of it.

mod ollama;
mod worker;

pub use ollama::OllamaModel;
pub use worker::{LocalModel, WorkerContextHost};

use crate::prompt::Prompt;
use async_trait::async_trait;
use errors::HostError;
use task_core::TaskType;

/// One unit of model work executed inside the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextJob {
    pub task_type: TaskType,
    pub prompt: Prompt
}

#[async_trait]
pub trait ContextHost: Send + Sync {
    /// Starts a new context. Returns [`HostError::AlreadyExists`] when one is
    /// already running; the call is not idempotent.
    async fn create(&self) -> Result<(), HostError>;

    /// Resolves once a freshly created context has completed its handshake.
    async fn wait_ready(&self) -> Result<(), HostError>;

    async fn dispatch(&self, job: ContextJob) -> Result<String, HostError>;

    /// Tears the context down. Closing an absent context is not an error.
    async fn close(&self) -> Result<(), HostError>;
}
