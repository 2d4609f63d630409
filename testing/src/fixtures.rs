use async_trait::async_trait;
use config::{Config, RetryPolicy};
use engine::{ContextHandle, ContextHost, ContextJob, Engine, Sleeper, SkipReason, TaskBackend};
use errors::HostError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use task_core::{BackendKind, StaticSettings, TaskError, TaskOutput, TaskRequest, TaskType};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

pub fn unique_request_id() -> String {
    unique_id("req")
}

static TRACING: std::sync::Once = std::sync::Once::new();

/// Installs a test-writer subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Configuration with immediate retries and short deadlines.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry = RetryPolicy::immediate(3);
    config.engine.default_timeout_ms = 5_000;
    config.engine.context_ready_timeout_ms = 1_000;
    config
}

/// Engine over the given chain with a [`FakeContextHost`] and a cloud key
/// present, so no backend is skipped for a missing credential.
pub fn engine_with(config: Config, backends: Vec<Arc<dyn TaskBackend>>) -> Engine {
    engine_with_host(config, backends, Arc::new(FakeContextHost::new()))
}

pub fn engine_with_host(
    config: Config,
    backends: Vec<Arc<dyn TaskBackend>>,
    host: Arc<dyn ContextHost>
) -> Engine {
    init_tracing();
    Engine::builder(config)
        .settings(Arc::new(StaticSettings::default().with_api_key("test-key")))
        .host(host)
        .backends(backends)
        .build()
        .expect("test engine should build")
}

pub fn summarize_request(text: &str) -> TaskRequest {
    TaskRequest::new(task_core::TaskPayload::Summarize {
        text: text.to_string(),
        max_sentences: 2
    })
}

pub fn translation(text: &str, target_language: &str) -> TaskOutput {
    TaskOutput::Translation {
        text: text.to_string(),
        target_language: target_language.to_string()
    }
}

/// Backend that replays a script of results, then repeats a fallback.
pub struct ScriptedBackend {
    kind: BackendKind,
    script: Mutex<VecDeque<Result<TaskOutput, TaskError>>>,
    fallback: Result<TaskOutput, TaskError>,
    delay: Option<Duration>,
    unsupported: Vec<TaskType>,
    skip: Option<SkipReason>,
    requires_context: bool,
    calls: AtomicU32,
    generations: Mutex<Vec<u64>>
}

impl ScriptedBackend {
    pub fn succeeding(kind: BackendKind, output: TaskOutput) -> Self {
        Self::with_fallback(kind, Ok(output))
    }

    pub fn failing(kind: BackendKind, error: TaskError) -> Self {
        Self::with_fallback(kind, Err(error))
    }

    fn with_fallback(kind: BackendKind, fallback: Result<TaskOutput, TaskError>) -> Self {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            unsupported: Vec::new(),
            skip: None,
            requires_context: false,
            calls: AtomicU32::new(0),
            generations: Mutex::new(Vec::new())
        }
    }

    /// Results returned, in order, before the fallback applies.
    pub fn then(self, results: Vec<Result<TaskOutput, TaskError>>) -> Self {
        self.script.lock().extend(results);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn without_support_for(mut self, task_type: TaskType) -> Self {
        self.unsupported.push(task_type);
        self
    }

    pub fn skipped_for(mut self, reason: SkipReason) -> Self {
        self.skip = Some(reason);
        self
    }

    pub fn needing_context(mut self) -> Self {
        self.requires_context = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context generation seen on each call that received a handle.
    pub fn generations(&self) -> Vec<u64> {
        self.generations.lock().clone()
    }
}

#[async_trait]
impl TaskBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports(&self, task_type: TaskType) -> bool {
        !self.unsupported.contains(&task_type)
    }

    fn prerequisite(&self) -> Result<(), SkipReason> {
        match self.skip {
            Some(reason) => Err(reason),
            None => Ok(())
        }
    }

    fn requires_context(&self) -> bool {
        self.requires_context
    }

    async fn call(
        &self,
        _request: &TaskRequest,
        context: Option<&ContextHandle>
    ) -> Result<TaskOutput, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = context {
            self.generations.lock().push(handle.generation());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// In-memory [`ContextHost`] with scripted failures.
pub struct FakeContextHost {
    creates: AtomicU32,
    closes: AtomicU32,
    dispatches: AtomicU32,
    running: AtomicBool,
    create_delay: Duration,
    never_ready: AtomicBool,
    crash_next_dispatch: AtomicBool,
    reply: Mutex<String>
}

impl FakeContextHost {
    pub fn new() -> Self {
        Self {
            creates: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            dispatches: AtomicU32::new(0),
            running: AtomicBool::new(false),
            create_delay: Duration::from_millis(10),
            never_ready: AtomicBool::new(false),
            crash_next_dispatch: AtomicBool::new(false),
            reply: Mutex::new("ok".to_string())
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Raw model text returned by every dispatch.
    pub fn replying(self, reply: &str) -> Self {
        *self.reply.lock() = reply.to_string();
        self
    }

    pub fn never_ready(self) -> Self {
        self.never_ready.store(true, Ordering::SeqCst);
        self
    }

    pub fn crash_next_dispatch(&self) {
        self.crash_next_dispatch.store(true, Ordering::SeqCst);
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> u32 {
        self.dispatches.load(Ordering::SeqCst)
    }
}

impl Default for FakeContextHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextHost for FakeContextHost {
    async fn create(&self) -> Result<(), HostError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.create_delay).await;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyExists);
        }
        Ok(())
    }

    async fn wait_ready(&self) -> Result<(), HostError> {
        if self.never_ready.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn dispatch(&self, _job: ContextJob) -> Result<String, HostError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        if !self.running.load(Ordering::SeqCst) {
            return Err(HostError::NotRunning);
        }
        if self.crash_next_dispatch.swap(false, Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            return Err(HostError::Crashed {
                reason: "worker exited".to_string()
            });
        }
        Ok(self.reply.lock().clone())
    }

    async fn close(&self) -> Result<(), HostError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Sleeper that records requested delays and returns at once.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}
