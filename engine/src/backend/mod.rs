//! Backend adapters behind the router's fallback chain.

mod cloud;
pub(crate) mod heuristic;
mod on_device;

pub use cloud::CloudBackend;
pub use heuristic::HeuristicBackend;
pub use on_device::OnDeviceBackend;

use crate::context::ContextHandle;
use crate::events::SkipReason;
use async_trait::async_trait;
use task_core::{BackendKind, TaskError, TaskOutput, TaskRequest, TaskType};

/// One way of executing tasks. Every failure is normalized into
/// [`TaskError`] before it leaves the adapter.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn supports(&self, task_type: TaskType) -> bool;

    /// `Err` when the backend must be skipped without being called, e.g. a
    /// missing credential. Checked on every request.
    fn prerequisite(&self) -> Result<(), SkipReason> {
        Ok(())
    }

    /// Whether [`call`](Self::call) needs a live execution context.
    fn requires_context(&self) -> bool {
        false
    }

    async fn call(
        &self,
        request: &TaskRequest,
        context: Option<&ContextHandle>
    ) -> Result<TaskOutput, TaskError>;
}

pub(crate) fn missing_context(backend: BackendKind) -> TaskError {
    TaskError::unavailable(format!("{backend} backend needs a ready execution context"))
}
