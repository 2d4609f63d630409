//! # Execution Context Manager
//!
//! Owns the lifecycle of the single hidden execution context:
//!
//! ```text
//! absent -> creating -> ready <-> busy
//!              |          |        |
//!              v          v        v
//!           absent     crashed  crashed -> creating
//! ```
//!
//! Concurrent `ensure_ready` calls while a context is being created all
//! await the same shared creation future, so the platform primitive is
//! invoked at most once per generation. Creation runs on its own task and
//! completes even if every caller gives up waiting.

use crate::events::{EngineEvent, EventBus};
use crate::host::{ContextHost, ContextJob};
use crate::telemetry::EngineTelemetry;
use errors::{ContextError, HostError};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use strum::Display;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContextState {
    Absent,
    Creating,
    Ready,
    Busy,
    Crashed
}

type Creation = Shared<BoxFuture<'static, Result<ContextHandle, ContextError>>>;

struct Slot {
    state: ContextState,
    generation: u64,
    in_flight: usize,
    live: Option<ContextHandle>,
    pending: Option<Creation>,
    shutting_down: bool
}

struct ManagerInner {
    host: Arc<dyn ContextHost>,
    slot: Mutex<Slot>,
    events: EventBus,
    telemetry: Arc<EngineTelemetry>
}

/// Handle to one generation of the context. Dispatching through a handle
/// whose context has crashed reports the crash back to the manager.
#[derive(Clone)]
pub struct ContextHandle {
    generation: u64,
    host: Arc<dyn ContextHost>,
    manager: Weak<ManagerInner>
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("generation", &self.generation)
            .finish()
    }
}

impl ContextHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this handle still refers to the manager's current context.
    pub fn is_live(&self) -> bool {
        self.manager.upgrade().is_some_and(|inner| {
            let slot = inner.slot.lock();
            slot.generation == self.generation
                && matches!(slot.state, ContextState::Ready | ContextState::Busy)
        })
    }

    pub async fn dispatch(&self, job: ContextJob) -> Result<String, HostError> {
        if !self.is_live() {
            return Err(HostError::NotRunning);
        }
        let result = self.host.dispatch(job).await;
        if let Err(HostError::Crashed { reason }) = &result {
            self.report_crash(reason);
        }
        result
    }

    pub fn report_crash(&self, reason: &str) {
        if let Some(inner) = self.manager.upgrade() {
            inner.mark_crashed(self.generation, reason);
        }
    }
}

/// Marks the context busy for as long as it is held.
pub struct ContextLease {
    handle: ContextHandle
}

impl ContextLease {
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if let Some(inner) = self.handle.manager.upgrade() {
            inner.release(self.handle.generation);
        }
    }
}

#[derive(Clone)]
pub struct ExecutionContextManager {
    inner: Arc<ManagerInner>
}

impl ExecutionContextManager {
    pub fn new(host: Arc<dyn ContextHost>, events: EventBus, telemetry: Arc<EngineTelemetry>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                host,
                slot: Mutex::new(Slot {
                    state: ContextState::Absent,
                    generation: 0,
                    in_flight: 0,
                    live: None,
                    pending: None,
                    shutting_down: false
                }),
                events,
                telemetry
            })
        }
    }

    pub fn state(&self) -> ContextState {
        self.inner.slot.lock().state
    }

    /// Generation of the newest context; bumps each time creation starts.
    pub fn generation(&self) -> u64 {
        self.inner.slot.lock().generation
    }

    /// Resolves to a handle once a context is ready, creating one when none
    /// exists. `timeout` bounds the readiness handshake of a new context.
    #[instrument(skip(self))]
    pub async fn ensure_ready(&self, timeout: Duration) -> Result<ContextHandle, ContextError> {
        let creation = {
            let mut slot = self.inner.slot.lock();
            if slot.shutting_down {
                return Err(ContextError::ShuttingDown);
            }
            match (slot.state, slot.live.clone(), slot.pending.clone()) {
                (ContextState::Ready | ContextState::Busy, Some(handle), _) => return Ok(handle),
                (ContextState::Creating, _, Some(pending)) => {
                    debug!(generation = slot.generation, "Joining in-flight context creation");
                    pending
                }
                (previous, ..) => self.start_creation(&mut slot, previous, timeout)
            }
        };
        creation.await
    }

    /// [`ensure_ready`](Self::ensure_ready) plus a busy lease for the
    /// duration of one task.
    pub async fn acquire(&self, timeout: Duration) -> Result<ContextLease, ContextError> {
        let handle = self.ensure_ready(timeout).await?;

        let mut slot = self.inner.slot.lock();
        let live = slot.generation == handle.generation
            && matches!(slot.state, ContextState::Ready | ContextState::Busy);
        if !live {
            return Err(ContextError::Host(HostError::NotRunning));
        }
        slot.in_flight += 1;
        if slot.state == ContextState::Ready {
            self.inner.transition(&mut slot, ContextState::Busy);
        }
        Ok(ContextLease { handle })
    }

    /// Closes the current context and refuses new work.
    pub async fn shutdown(&self) {
        let live = {
            let mut slot = self.inner.slot.lock();
            slot.shutting_down = true;
            slot.pending = None;
            slot.in_flight = 0;
            if slot.state != ContextState::Absent {
                self.inner.transition(&mut slot, ContextState::Absent);
            }
            slot.live.take()
        };
        if live.is_some() {
            if let Err(e) = self.inner.host.close().await {
                warn!(error = %e, "Failed to close execution context on shutdown");
            }
        }
    }

    fn start_creation(&self, slot: &mut Slot, previous: ContextState, timeout: Duration) -> Creation {
        slot.generation += 1;
        slot.live = None;
        slot.in_flight = 0;
        let generation = slot.generation;
        self.inner.transition(slot, ContextState::Creating);
        info!(generation, "Creating execution context");

        let inner = self.inner.clone();
        let recovering = previous == ContextState::Crashed;
        let task = tokio::spawn(async move { inner.create(generation, recovering, timeout).await });
        let creation = async move {
            task.await.unwrap_or_else(|e| {
                Err(ContextError::CreationAborted {
                    reason: e.to_string()
                })
            })
        }
        .boxed()
        .shared();

        slot.pending = Some(creation.clone());
        creation
    }
}

impl ManagerInner {
    async fn create(
        self: Arc<Self>,
        generation: u64,
        recovering: bool,
        timeout: Duration
    ) -> Result<ContextHandle, ContextError> {
        let started = Instant::now();

        if recovering {
            // A crashed context may still be registered with the platform.
            if let Err(e) = self.host.close().await {
                debug!(error = %e, "Closing crashed context failed");
            }
        }

        let reused = match self.host.create().await {
            Ok(()) => false,
            Err(HostError::AlreadyExists) => {
                warn!(generation, "Execution context already exists, reusing it");
                true
            }
            Err(e) => {
                self.abandon(generation, &e.to_string());
                return Err(e.into());
            }
        };

        if !reused {
            match tokio::time::timeout(timeout, self.host.wait_ready()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.close_best_effort().await;
                    self.abandon(generation, &e.to_string());
                    return Err(e.into());
                }
                Err(_) => {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    self.close_best_effort().await;
                    self.abandon(generation, "readiness handshake timed out");
                    return Err(ContextError::ReadyTimeout { timeout_ms });
                }
            }
        }

        let handle = ContextHandle {
            generation,
            host: self.host.clone(),
            manager: Arc::downgrade(&self)
        };

        let (superseded, shutting_down) = {
            let mut slot = self.slot.lock();
            let superseded = slot.generation != generation || slot.shutting_down;
            if !superseded {
                slot.live = Some(handle.clone());
                slot.pending = None;
                self.transition(&mut slot, ContextState::Ready);
            }
            (superseded, slot.shutting_down)
        };
        if superseded {
            if shutting_down {
                self.close_best_effort().await;
            }
            return Err(ContextError::CreationAborted {
                reason: format!("generation {generation} was superseded")
            });
        }

        info!(generation, reused, elapsed_ms = started.elapsed().as_millis() as u64, "Execution context ready");
        self.telemetry.record_context_creation(started.elapsed(), reused);
        self.events
            .publish(EngineEvent::ContextCreated { generation, reused });
        Ok(handle)
    }

    async fn close_best_effort(&self) {
        if let Err(e) = self.host.close().await {
            debug!(error = %e, "Best-effort context close failed");
        }
    }

    /// Creation of `generation` failed; back to absent so the next caller
    /// starts over.
    fn abandon(&self, generation: u64, reason: &str) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        warn!(generation, reason, "Execution context creation failed");
        slot.pending = None;
        slot.live = None;
        if slot.state == ContextState::Creating {
            self.transition(&mut slot, ContextState::Absent);
        }
    }

    fn mark_crashed(&self, generation: u64, reason: &str) {
        let mut slot = self.slot.lock();
        let current = slot.generation == generation
            && matches!(slot.state, ContextState::Ready | ContextState::Busy);
        if !current {
            return;
        }
        warn!(generation, reason, "Execution context crashed");
        slot.live = None;
        slot.in_flight = 0;
        self.transition(&mut slot, ContextState::Crashed);
        self.events.publish(EngineEvent::ContextCrashed {
            generation,
            reason: reason.to_string()
        });
    }

    fn release(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation || slot.in_flight == 0 {
            return;
        }
        slot.in_flight -= 1;
        if slot.in_flight == 0 && slot.state == ContextState::Busy {
            self.transition(&mut slot, ContextState::Ready);
        }
    }

    fn transition(&self, slot: &mut Slot, to: ContextState) {
        let from = slot.state;
        if from == to {
            return;
        }
        slot.state = to;
        debug!(%from, %to, generation = slot.generation, "Execution context state change");
        self.telemetry.record_context_state(to);
        self.events.publish(EngineEvent::ContextStateChanged {
            from,
            to,
            generation: slot.generation
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Prompt;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use task_core::TaskType;

    #[derive(Default)]
    struct CountingHost {
        creates: AtomicU32,
        closes: AtomicU32,
        exists: AtomicBool,
        never_ready: AtomicBool,
        crash_dispatch: AtomicBool
    }

    #[async_trait]
    impl ContextHost for CountingHost {
        async fn create(&self) -> Result<(), HostError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.exists.swap(true, Ordering::SeqCst) {
                return Err(HostError::AlreadyExists);
            }
            Ok(())
        }

        async fn wait_ready(&self) -> Result<(), HostError> {
            if self.never_ready.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }

        async fn dispatch(&self, _job: ContextJob) -> Result<String, HostError> {
            if self.crash_dispatch.load(Ordering::SeqCst) {
                return Err(HostError::Crashed {
                    reason: "renderer gone".to_string()
                });
            }
            Ok("ok".to_string())
        }

        async fn close(&self) -> Result<(), HostError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.exists.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(host: Arc<CountingHost>) -> ExecutionContextManager {
        ExecutionContextManager::new(host, EventBus::new(64), Arc::new(EngineTelemetry::new(false)))
    }

    fn job() -> ContextJob {
        ContextJob {
            task_type: TaskType::Summarize,
            prompt: Prompt {
                system: String::new(),
                user: "text".to_string()
            }
        }
    }

    const READY_TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_creation() {
        let host = Arc::new(CountingHost::default());
        let manager = manager(host.clone());

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_ready(READY_TIMEOUT).await })
            })
            .collect();

        let mut generations = Vec::new();
        for caller in callers {
            generations.push(caller.await.unwrap().unwrap().generation());
        }

        assert_eq!(host.creates.load(Ordering::SeqCst), 1);
        assert!(generations.iter().all(|g| *g == 1));
        assert_eq!(manager.state(), ContextState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_context_is_reused() {
        let host = Arc::new(CountingHost::default());
        let manager = manager(host.clone());

        manager.ensure_ready(READY_TIMEOUT).await.unwrap();
        manager.ensure_ready(READY_TIMEOUT).await.unwrap();
        assert_eq!(host.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_exists_counts_as_ready() {
        let host = Arc::new(CountingHost::default());
        host.exists.store(true, Ordering::SeqCst);
        host.never_ready.store(true, Ordering::SeqCst);
        let manager = manager(host.clone());
        let mut events = manager.inner.events.subscribe();

        let handle = manager.ensure_ready(READY_TIMEOUT).await.unwrap();
        assert!(handle.is_live());

        let mut reused = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::ContextCreated { reused: r, .. } = event {
                reused = r;
            }
        }
        assert!(reused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_resets_to_absent() {
        let host = Arc::new(CountingHost::default());
        host.never_ready.store(true, Ordering::SeqCst);
        let manager = manager(host.clone());

        let err = manager.ensure_ready(READY_TIMEOUT).await.unwrap_err();
        assert_eq!(err, ContextError::ReadyTimeout { timeout_ms: 1000 });
        assert_eq!(manager.state(), ContextState::Absent);
        assert_eq!(host.closes.load(Ordering::SeqCst), 1);

        host.never_ready.store(false, Ordering::SeqCst);
        manager.ensure_ready(READY_TIMEOUT).await.unwrap();
        assert_eq!(manager.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_tracks_busy() {
        let host = Arc::new(CountingHost::default());
        let manager = manager(host);

        let first = manager.acquire(READY_TIMEOUT).await.unwrap();
        let second = manager.acquire(READY_TIMEOUT).await.unwrap();
        assert_eq!(manager.state(), ContextState::Busy);

        drop(first);
        assert_eq!(manager.state(), ContextState::Busy);
        drop(second);
        assert_eq!(manager.state(), ContextState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_then_self_heal() {
        let host = Arc::new(CountingHost::default());
        let manager = manager(host.clone());

        let lease = manager.acquire(READY_TIMEOUT).await.unwrap();
        host.crash_dispatch.store(true, Ordering::SeqCst);
        let err = lease.handle().dispatch(job()).await.unwrap_err();
        assert!(matches!(err, HostError::Crashed { .. }));
        assert_eq!(manager.state(), ContextState::Crashed);
        assert!(!lease.handle().is_live());
        drop(lease);

        host.crash_dispatch.store(false, Ordering::SeqCst);
        let handle = manager.ensure_ready(READY_TIMEOUT).await.unwrap();
        assert_eq!(handle.generation(), 2);
        assert_eq!(handle.dispatch(job()).await.unwrap(), "ok");
        assert_eq!(host.creates.load(Ordering::SeqCst), 2);
        assert!(host.closes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_refuses_dispatch() {
        let host = Arc::new(CountingHost::default());
        let manager = manager(host.clone());

        let old = manager.ensure_ready(READY_TIMEOUT).await.unwrap();
        old.report_crash("test");
        manager.ensure_ready(READY_TIMEOUT).await.unwrap();

        assert_eq!(old.dispatch(job()).await, Err(HostError::NotRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_refuses_new_work() {
        let host = Arc::new(CountingHost::default());
        let manager = manager(host.clone());
        manager.ensure_ready(READY_TIMEOUT).await.unwrap();

        manager.shutdown().await;
        assert_eq!(manager.state(), ContextState::Absent);
        assert_eq!(host.closes.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.ensure_ready(READY_TIMEOUT).await.unwrap_err(),
            ContextError::ShuttingDown
        );
    }
}
