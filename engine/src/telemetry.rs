use crate::context::ContextState;
use crate::events::{EvictionReason, SkipReason};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use task_core::{BackendKind, TaskErrorKind, TaskType};

/// Point-in-time view of the engine's request counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub success_by_backend: BTreeMap<BackendKind, u64>,
    pub failure_by_kind: BTreeMap<TaskErrorKind, u64>,
    pub average_latency_ms: f64,
    pub cache_hit_rate: f64
}

/// Records engine activity twice: through the `metrics` facade for whatever
/// recorder the host installed, and into in-process counters backing
/// [`MetricsSnapshot`].
#[derive(Debug)]
pub struct EngineTelemetry {
    export: bool,
    total_requests: AtomicU64,
    completed: AtomicU64,
    latency_total_ms: AtomicU64,
    cache_hits: AtomicU64,
    cache_lookups: AtomicU64,
    success_by_backend: Mutex<BTreeMap<BackendKind, u64>>,
    failure_by_kind: Mutex<BTreeMap<TaskErrorKind, u64>>
}

impl Default for EngineTelemetry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EngineTelemetry {
    /// `export` controls the `metrics` facade; the snapshot counters are
    /// always kept.
    pub fn new(export: bool) -> Self {
        Self {
            export,
            total_requests: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            latency_total_ms: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_lookups: AtomicU64::new(0),
            success_by_backend: Mutex::new(BTreeMap::new()),
            failure_by_kind: Mutex::new(BTreeMap::new())
        }
    }

    pub fn record_request(&self, task_type: TaskType) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if self.export {
            counter!("glossa_requests_total", "task_type" => task_type.to_string()).increment(1);
        }
    }

    pub fn record_cache_hit(&self, task_type: TaskType) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.cache_lookups.fetch_add(1, Ordering::Relaxed);
        if self.export {
            counter!("glossa_cache_hits_total", "task_type" => task_type.to_string()).increment(1);
        }
    }

    pub fn record_cache_miss(&self, task_type: TaskType) {
        self.cache_lookups.fetch_add(1, Ordering::Relaxed);
        if self.export {
            counter!("glossa_cache_misses_total", "task_type" => task_type.to_string())
                .increment(1);
        }
    }

    pub fn record_cache_eviction(&self, reason: EvictionReason, size_bytes: usize) {
        if self.export {
            counter!("glossa_cache_evictions_total", "reason" => reason.to_string()).increment(1);
            histogram!("glossa_cache_evicted_bytes").record(size_bytes as f64);
        }
    }

    pub fn record_cache_size(&self, entries: usize, total_bytes: usize) {
        if self.export {
            gauge!("glossa_cache_entries").set(entries as f64);
            gauge!("glossa_cache_bytes").set(total_bytes as f64);
        }
    }

    /// Request answered, either by a backend or from the cache
    /// (`backend == None`).
    pub fn record_success(&self, backend: Option<BackendKind>, latency: Duration) {
        if let Some(backend) = backend {
            *self.success_by_backend.lock().entry(backend).or_insert(0) += 1;
        }
        self.record_latency(latency);
        if self.export {
            let source = backend.map_or_else(|| "cache".to_string(), |b| b.to_string());
            counter!("glossa_requests_completed_total", "status" => "success", "source" => source)
                .increment(1);
        }
    }

    pub fn record_failure(&self, kind: TaskErrorKind, latency: Duration) {
        *self.failure_by_kind.lock().entry(kind).or_insert(0) += 1;
        self.record_latency(latency);
        if self.export {
            counter!("glossa_requests_completed_total", "status" => "failure", "error" => kind.to_string())
                .increment(1);
        }
    }

    pub fn record_backend_attempts(
        &self,
        backend: BackendKind,
        task_type: TaskType,
        attempts: u32,
        outcome: Result<(), TaskErrorKind>
    ) {
        if !self.export {
            return;
        }
        let labels = [
            ("backend", backend.to_string()),
            ("task_type", task_type.to_string()),
            (
                "outcome",
                outcome.map_or_else(|kind| kind.to_string(), |()| "success".to_string())
            )
        ];
        counter!("glossa_backend_calls_total", &labels).increment(u64::from(attempts));
    }

    pub fn record_backend_skipped(&self, backend: BackendKind, reason: SkipReason) {
        if self.export {
            counter!(
                "glossa_backend_skipped_total",
                "backend" => backend.to_string(),
                "reason" => reason.to_string()
            )
            .increment(1);
        }
    }

    pub fn record_context_state(&self, state: ContextState) {
        if self.export {
            counter!("glossa_context_transitions_total", "to" => state.to_string()).increment(1);
        }
    }

    pub fn record_context_creation(&self, duration: Duration, reused: bool) {
        if self.export {
            histogram!("glossa_context_creation_seconds", "reused" => reused.to_string())
                .record(duration.as_secs_f64());
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let lookups = self.cache_lookups.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            success_by_backend: self.success_by_backend.lock().clone(),
            failure_by_kind: self.failure_by_kind.lock().clone(),
            average_latency_ms: if completed == 0 {
                0.0
            } else {
                self.latency_total_ms.load(Ordering::Relaxed) as f64 / completed as f64
            },
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                self.cache_hits.load(Ordering::Relaxed) as f64 / lookups as f64
            }
        }
    }

    fn record_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ms.fetch_add(millis, Ordering::Relaxed);
        if self.export {
            histogram!("glossa_request_duration_seconds").record(latency.as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn test_snapshot_aggregates() {
        let telemetry = EngineTelemetry::new(false);

        telemetry.record_request(TaskType::Translate);
        telemetry.record_request(TaskType::Translate);
        telemetry.record_request(TaskType::Summarize);
        telemetry.record_cache_miss(TaskType::Translate);
        telemetry.record_cache_hit(TaskType::Translate);
        telemetry.record_success(Some(BackendKind::Cloud), Duration::from_millis(300));
        telemetry.record_success(None, Duration::from_millis(0));
        telemetry.record_failure(TaskErrorKind::InvalidInput, Duration::from_millis(0));

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.success_by_backend.get(&BackendKind::Cloud), Some(&1));
        assert_eq!(snapshot.failure_by_kind.get(&TaskErrorKind::InvalidInput), Some(&1));
        assert!((snapshot.average_latency_ms - 100.0).abs() < f64::EPSILON);
        assert!((snapshot.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = EngineTelemetry::new(false).snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_recording() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let telemetry = EngineTelemetry::new(true);
            telemetry.record_request(TaskType::DetectLanguage);
            telemetry.record_backend_attempts(
                BackendKind::OnDevice,
                TaskType::DetectLanguage,
                3,
                Err(TaskErrorKind::Unavailable)
            );
            telemetry.record_backend_skipped(BackendKind::Cloud, SkipReason::MissingCredential);
            telemetry.record_context_state(ContextState::Ready);
            telemetry.record_success(Some(BackendKind::Heuristic), Duration::from_millis(4));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert!(!snapshot.is_empty(), "Expected metrics to be recorded");
    }

    #[test]
    fn test_export_disabled_records_nothing() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let telemetry = EngineTelemetry::new(false);
            telemetry.record_request(TaskType::Rewrite);
            telemetry.record_cache_hit(TaskType::Rewrite);
        });

        assert!(snapshotter.snapshot().into_vec().is_empty());
    }
}
