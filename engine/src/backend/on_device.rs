use super::{TaskBackend, missing_context};
use crate::context::ContextHandle;
use crate::events::SkipReason;
use crate::host::ContextJob;
use crate::prompt;
use async_trait::async_trait;
use errors::HostError;
use task_core::{BackendKind, TaskError, TaskOutput, TaskRequest, TaskType};
use tracing::debug;

/// Runs tasks on the local model hosted inside the execution context.
#[derive(Debug, Clone)]
pub struct OnDeviceBackend {
    enabled: bool
}

impl OnDeviceBackend {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

fn map_host_error(err: HostError) -> TaskError {
    match err {
        HostError::JobTimedOut { .. } => TaskError::timeout(err.to_string()),
        HostError::JobFailed { .. } => TaskError::processing_failed(err.to_string()),
        HostError::AlreadyExists
        | HostError::NotRunning
        | HostError::Crashed { .. }
        | HostError::SetupFailed { .. } => TaskError::unavailable(err.to_string())
    }
}

#[async_trait]
impl TaskBackend for OnDeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OnDevice
    }

    fn supports(&self, _task_type: TaskType) -> bool {
        true
    }

    fn prerequisite(&self) -> Result<(), SkipReason> {
        if self.enabled {
            Ok(())
        } else {
            Err(SkipReason::Disabled)
        }
    }

    fn requires_context(&self) -> bool {
        true
    }

    async fn call(
        &self,
        request: &TaskRequest,
        context: Option<&ContextHandle>
    ) -> Result<TaskOutput, TaskError> {
        let context = context.ok_or_else(|| missing_context(self.kind()))?;
        let job = ContextJob {
            task_type: request.task_type(),
            prompt: prompt::build(request)
        };

        debug!(task_type = %job.task_type, generation = context.generation(), "Dispatching on-device job");
        let raw = context.dispatch(job).await.map_err(map_host_error)?;
        prompt::parse_output(request, &raw)
    }
}
