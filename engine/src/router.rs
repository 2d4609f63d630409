//! # Task Router
//!
//! Entry point for a single request:
//!
//! 1. Validate and normalize the request.
//! 2. Answer from the result cache when a live entry exists.
//! 3. Join an identical request already in flight, or start one.
//! 4. Walk the backend chain in priority order under a concurrency permit,
//!    retrying each backend through the [`RetryController`].
//! 5. Cache the successful output.
//!
//! Every caller waits under its own deadline. A shared computation keeps
//! running while at least one caller still waits for it and is cancelled
//! when the last one leaves.

use crate::backend::TaskBackend;
use crate::cache::{CacheKey, ResultCache};
use crate::context::{ContextHandle, ContextLease, ExecutionContextManager};
use crate::events::{EngineEvent, EventBus, SkipReason};
use crate::retry::RetryController;
use crate::telemetry::EngineTelemetry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use task_core::{
    BackendFailure, BackendKind, SettingsProvider, TaskError, TaskErrorKind, TaskOutput,
    TaskRequest, TaskResult, TaskType
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Longest payload accepted, in characters.
pub const MAX_TEXT_CHARS: usize = 20_000;

type PendingResult = Shared<BoxFuture<'static, TaskResult>>;

/// One running computation and the callers waiting on it.
struct Flight {
    id: u64,
    pending: PendingResult,
    waiters: usize,
    cancel: CancellationToken
}

/// A caller's claim on a [`Flight`]. Dropping the last claim cancels the
/// computation.
struct Waiter {
    inner: Arc<RouterInner>,
    key: CacheKey,
    id: u64
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        let Some(flight) = in_flight.get_mut(&self.key) else {
            return;
        };
        if flight.id != self.id {
            return;
        }
        flight.waiters = flight.waiters.saturating_sub(1);
        if flight.waiters == 0 {
            if let Some(flight) = in_flight.remove(&self.key) {
                flight.cancel.cancel();
            }
            debug!(key = %self.key, "Every caller left, cancelling request");
        }
    }
}

/// Everything the router needs, assembled by the engine builder.
pub struct RouterParts {
    pub backends: Vec<Arc<dyn TaskBackend>>,
    pub cache: Arc<ResultCache>,
    pub cache_enabled: bool,
    pub contexts: ExecutionContextManager,
    pub retry: RetryController,
    pub settings: Arc<dyn SettingsProvider>,
    pub events: EventBus,
    pub telemetry: Arc<EngineTelemetry>,
    pub max_concurrent_tasks: usize,
    pub default_timeout_ms: u64,
    pub context_ready_timeout: Duration
}

struct RouterInner {
    backends: Vec<Arc<dyn TaskBackend>>,
    cache: Arc<ResultCache>,
    cache_enabled: bool,
    contexts: ExecutionContextManager,
    retry: RetryController,
    settings: Arc<dyn SettingsProvider>,
    events: EventBus,
    telemetry: Arc<EngineTelemetry>,
    admission: Semaphore,
    in_flight: Mutex<HashMap<CacheKey, Flight>>,
    next_flight: AtomicU64,
    default_timeout_ms: u64,
    context_ready_timeout: Duration
}

#[derive(Clone)]
pub struct TaskRouter {
    inner: Arc<RouterInner>
}

impl TaskRouter {
    pub fn new(parts: RouterParts) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                backends: parts.backends,
                cache: parts.cache,
                cache_enabled: parts.cache_enabled,
                contexts: parts.contexts,
                retry: parts.retry,
                settings: parts.settings,
                events: parts.events,
                telemetry: parts.telemetry,
                admission: Semaphore::new(parts.max_concurrent_tasks.max(1)),
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                default_timeout_ms: parts.default_timeout_ms,
                context_ready_timeout: parts.context_ready_timeout
            })
        }
    }

    #[instrument(skip_all, fields(task_type = %request.task_type()))]
    pub async fn execute(&self, request: TaskRequest) -> TaskResult {
        let started = Instant::now();
        self.inner.telemetry.record_request(request.task_type());

        let result = self.route(request).await;

        let elapsed = started.elapsed();
        match result.error() {
            None => self.inner.telemetry.record_success(result.backend(), elapsed),
            Some(error) => self.inner.telemetry.record_failure(error.kind, elapsed)
        }
        result
    }

    /// Number of distinct requests currently running the backend chain.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Stops admitting new work. Requests already holding a permit finish.
    pub fn close(&self) {
        self.inner.admission.close();
    }

    async fn route(&self, request: TaskRequest) -> TaskResult {
        let request = match self.inner.prepare(request) {
            Ok(request) => request,
            Err(error) => {
                debug!(error = %error, "Rejected request");
                return TaskResult::failure(error);
            }
        };

        let task_type = request.task_type();
        let key = CacheKey::for_request(&request);

        if self.inner.cache_enabled {
            if let Some(value) = self.inner.cache.get(&key) {
                debug!(key = %key, "Cache hit");
                self.inner.telemetry.record_cache_hit(task_type);
                return TaskResult::from_cache(value);
            }
            self.inner.telemetry.record_cache_miss(task_type);
        }

        let timeout_ms = request.timeout_ms;
        let (pending, _waiter) = self.join_or_start(key, request);

        match tokio::time::timeout(Duration::from_millis(timeout_ms), pending).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms, "Request deadline exceeded");
                TaskResult::failure(TaskError::timeout(format!(
                    "request did not complete within {timeout_ms}ms"
                )))
            }
        }
    }

    fn join_or_start(&self, key: CacheKey, request: TaskRequest) -> (PendingResult, Waiter) {
        let mut in_flight = self.inner.in_flight.lock();
        let (id, pending) = match in_flight.get_mut(&key) {
            Some(flight) => {
                debug!(key = %key, waiters = flight.waiters, "Joining identical in-flight request");
                flight.waiters += 1;
                (flight.id, flight.pending.clone())
            }
            None => {
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                let task = tokio::spawn(self.inner.clone().resolve(
                    key.clone(),
                    id,
                    request,
                    cancel.clone()
                ));
                let pending = async move {
                    task.await.unwrap_or_else(|e| {
                        TaskResult::failure(TaskError::processing_failed(format!("request task aborted: {e}")))
                    })
                }
                .boxed()
                .shared();
                in_flight.insert(
                    key.clone(),
                    Flight {
                        id,
                        pending: pending.clone(),
                        waiters: 1,
                        cancel
                    }
                );
                (id, pending)
            }
        };

        let waiter = Waiter {
            inner: self.inner.clone(),
            key,
            id
        };
        (pending, waiter)
    }
}

impl RouterInner {
    fn prepare(&self, mut request: TaskRequest) -> Result<TaskRequest, TaskError> {
        let length = request.text().trim().chars().count();
        if length == 0 {
            return Err(TaskError::invalid_input("text must not be empty"));
        }
        if length > MAX_TEXT_CHARS {
            return Err(TaskError::invalid_input(format!(
                "text is {length} characters, the limit is {MAX_TEXT_CHARS}"
            )));
        }

        request.source_language = normalize_language(request.source_language.take())
            .filter(|language| language != "auto");
        request.target_language = normalize_language(request.target_language.take());
        if request.timeout_ms == 0 {
            request.timeout_ms = self.default_timeout_ms;
        }

        if request.task_type() == TaskType::Translate {
            let target = request
                .target_language
                .clone()
                .or_else(|| normalize_language(Some(self.settings.language_preferences().native_language)))
                .ok_or_else(|| TaskError::invalid_input("no target language given or configured"))?;
            if request.source_language.as_deref() == Some(target.as_str()) {
                return Err(TaskError::invalid_input(format!(
                    "source and target language are both {target}"
                )));
            }
            request.target_language = Some(target);
        }

        Ok(request)
    }

    async fn resolve(
        self: Arc<Self>,
        key: CacheKey,
        id: u64,
        request: TaskRequest,
        cancel: CancellationToken
    ) -> TaskResult {
        let result = tokio::select! {
            outcome = self.run_chain(&request, &cancel) => match outcome {
                Ok((output, backend)) => {
                    if self.cache_enabled {
                        self.cache.set(key.clone(), output.clone());
                    }
                    TaskResult::success(output, backend)
                }
                Err(error) => TaskResult::failure(error)
            },
            _ = cancel.cancelled() => {
                TaskResult::failure(TaskError::timeout("every caller left before the request completed"))
            }
        };

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.get(&key).is_some_and(|flight| flight.id == id) {
                in_flight.remove(&key);
            }
        }
        result
    }

    async fn run_chain(
        &self,
        request: &TaskRequest,
        cancel: &CancellationToken
    ) -> Result<(TaskOutput, BackendKind), TaskError> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| TaskError::unavailable("engine is shutting down").fatal())?;

        let task_type = request.task_type();
        let mut failures: Vec<BackendFailure> = Vec::new();
        let mut lease: Option<ContextLease> = None;
        let mut context_error: Option<TaskError> = None;

        for backend in &self.backends {
            let kind = backend.kind();

            let skip = if backend.supports(task_type) {
                backend.prerequisite().err()
            } else {
                Some(SkipReason::Unsupported)
            };
            if let Some(reason) = skip {
                self.record_skip(kind, task_type, reason, &mut failures);
                continue;
            }

            let handle = if backend.requires_context() {
                match self.context_for(&mut lease, &mut context_error).await {
                    Ok(handle) => Some(handle),
                    Err(error) => {
                        self.record_failure(kind, task_type, &error, 0, &mut failures);
                        continue;
                    }
                }
            } else {
                None
            };

            let outcome = self
                .retry
                .run(|_| backend.call(request, handle.as_ref()), cancel)
                .await;

            match outcome.result {
                Ok(output) => {
                    self.telemetry
                        .record_backend_attempts(kind, task_type, outcome.attempts, Ok(()));
                    info!(backend = %kind, attempts = outcome.attempts, "Task completed");
                    return Ok((output, kind));
                }
                Err(error) => {
                    self.record_failure(kind, task_type, &error, outcome.attempts, &mut failures);
                    if outcome.cancelled {
                        return Err(TaskError::timeout("request cancelled").with_failures(failures));
                    }
                    if !error.retryable {
                        warn!(backend = %kind, kind = %error.kind, "Fatal backend error, aborting chain");
                        return Err(error.with_failures(failures));
                    }
                    warn!(backend = %kind, kind = %error.kind, "Backend exhausted, falling back");
                }
            }
        }

        error!(task_type = %task_type, backends = failures.len(), "Every backend failed");
        Err(exhausted(failures))
    }

    /// Lease on a live context, shared by every backend of one request. A
    /// context that crashed mid-chain is replaced; a context that could not
    /// be created is not retried within the same request.
    async fn context_for(
        &self,
        lease: &mut Option<ContextLease>,
        failed: &mut Option<TaskError>
    ) -> Result<ContextHandle, TaskError> {
        if let Some(error) = failed {
            return Err(error.clone());
        }
        if let Some(current) = lease.as_ref().filter(|l| l.handle().is_live()) {
            return Ok(current.handle().clone());
        }
        *lease = None;

        match self.contexts.acquire(self.context_ready_timeout).await {
            Ok(acquired) => {
                let handle = acquired.handle().clone();
                *lease = Some(acquired);
                Ok(handle)
            }
            Err(e) => {
                let error = TaskError::from(e);
                *failed = Some(error.clone());
                Err(error)
            }
        }
    }

    fn record_skip(
        &self,
        backend: BackendKind,
        task_type: TaskType,
        reason: SkipReason,
        failures: &mut Vec<BackendFailure>
    ) {
        debug!(%backend, %reason, "Skipping backend");
        self.telemetry.record_backend_skipped(backend, reason);
        self.events.publish(EngineEvent::BackendSkipped {
            backend,
            task_type,
            reason
        });
        failures.push(BackendFailure {
            backend,
            kind: TaskErrorKind::Unavailable,
            message: format!("skipped: {reason}"),
            attempts: 0,
            skipped: true
        });
    }

    fn record_failure(
        &self,
        backend: BackendKind,
        task_type: TaskType,
        error: &TaskError,
        attempts: u32,
        failures: &mut Vec<BackendFailure>
    ) {
        self.telemetry
            .record_backend_attempts(backend, task_type, attempts, Err(error.kind));
        self.events.publish(EngineEvent::BackendFailed {
            backend,
            task_type,
            kind: error.kind,
            attempts
        });
        failures.push(BackendFailure {
            backend,
            kind: error.kind,
            message: error.message.clone(),
            attempts,
            skipped: false
        });
    }
}

fn normalize_language(language: Option<String>) -> Option<String> {
    language
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
}

fn exhausted(failures: Vec<BackendFailure>) -> TaskError {
    let summary = failures
        .iter()
        .map(|f| {
            if f.skipped {
                format!("{} {}", f.backend, f.message)
            } else {
                format!("{} {} after {} attempt(s): {}", f.backend, f.kind, f.attempts, f.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    TaskError::processing_failed(format!("all backends failed: {summary}"))
        .fatal()
        .with_failures(failures)
}
