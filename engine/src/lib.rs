//! # Glossa Engine
//!
//! Orchestrates language tasks (translation, language detection,
//! summarization, rewriting, vocabulary extraction) across a chain of
//! backends with different cost and availability:
//!
//! - **On-device**: a local model hosted in a hidden execution context
//! - **Cloud**: a hosted model that needs an API key
//! - **Heuristic**: deterministic rules, always available
//!
//! The [`TaskRouter`] tries them in that order, retrying each through the
//! [`RetryController`], and stores successful outputs in the
//! [`ResultCache`]. The [`ExecutionContextManager`] owns the single hidden
//! context and guarantees that concurrent callers never create two.
//!
//! Most callers only need [`Engine`].

pub mod backend;
pub mod cache;
pub mod clock;
pub mod context;
pub mod engine;
pub mod events;
pub mod host;
pub mod prompt;
pub mod retry;
pub mod router;
pub mod telemetry;

pub use backend::{CloudBackend, HeuristicBackend, OnDeviceBackend, TaskBackend};
pub use cache::{CacheEntryInfo, CacheKey, CacheStats, ResultCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ContextHandle, ContextLease, ContextState, ExecutionContextManager};
pub use engine::{Engine, EngineBuilder, EngineClient, Inbound, default_backends};
pub use events::{EngineEvent, EventBus, EvictionReason, SkipReason};
pub use host::{ContextHost, ContextJob, LocalModel, OllamaModel, WorkerContextHost};
pub use retry::{RetryController, RetryOutcome, Sleeper, TokioSleeper};
pub use router::{MAX_TEXT_CHARS, RouterParts, TaskRouter};
pub use telemetry::{EngineTelemetry, MetricsSnapshot};
