//! # Engine
//!
//! Owns one instance of every component and wires them together. Nothing in
//! the crate is global: two engines never share a cache or a context.
//!
//! ## Usage
//! ```rust,no_run
//! use engine::Engine;
//! use task_core::TaskRequest;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder(config::Config::default()).build()?;
//! let result = engine.execute(TaskRequest::detect_language("Bonjour le monde")).await;
//! println!("{:?}", result.data());
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::backend::{CloudBackend, HeuristicBackend, OnDeviceBackend, TaskBackend};
use crate::cache::{CacheStats, ResultCache};
use crate::clock::{Clock, SystemClock};
use crate::context::{ContextState, ExecutionContextManager};
use crate::events::{EngineEvent, EventBus};
use crate::host::{ContextHost, OllamaModel, WorkerContextHost};
use crate::retry::{RetryController, Sleeper, TokioSleeper};
use crate::router::{RouterParts, TaskRouter};
use crate::telemetry::{EngineTelemetry, MetricsSnapshot};
use config::{Config, Validate};
use errors::EngineError;
use std::sync::Arc;
use std::time::Duration;
use task_core::{RequestEnvelope, ResponseEnvelope, SettingsProvider, TaskRequest, TaskResult};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// A request travelling over the engine channel with its reply slot.
#[derive(Debug)]
pub struct Inbound {
    pub envelope: RequestEnvelope,
    pub reply: oneshot::Sender<ResponseEnvelope>
}

pub struct EngineBuilder {
    config: Config,
    settings: Option<Arc<dyn SettingsProvider>>,
    host: Option<Arc<dyn ContextHost>>,
    backends: Option<Vec<Arc<dyn TaskBackend>>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>
}

impl EngineBuilder {
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn host(mut self, host: Arc<dyn ContextHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Replaces the default on-device → cloud → heuristic chain. Order is
    /// priority order.
    pub fn backends(mut self, backends: Vec<Arc<dyn TaskBackend>>) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config
            .validate()
            .map_err(|e| EngineError::Configuration {
                message: e.to_string()
            })?;
        let config = self.config;

        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(config.clone()) as Arc<dyn SettingsProvider>);
        let host = match self.host {
            Some(host) => host,
            None => {
                let model = OllamaModel::new(&config.on_device).map_err(|e| {
                    EngineError::Configuration {
                        message: e.to_string()
                    }
                })?;
                Arc::new(WorkerContextHost::new(Arc::new(model)))
            }
        };
        let backends = match self.backends {
            Some(backends) => backends,
            None => default_backends(&config, settings.clone())?
        };

        let events = EventBus::new(config.engine.event_capacity);
        let telemetry = Arc::new(EngineTelemetry::new(config.observability.metrics_enabled));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        let cache = Arc::new(ResultCache::new(
            &config.cache,
            clock,
            events.clone(),
            telemetry.clone()
        ));
        let contexts = ExecutionContextManager::new(host, events.clone(), telemetry.clone());
        let router = TaskRouter::new(RouterParts {
            backends,
            cache: cache.clone(),
            cache_enabled: config.cache.enabled,
            contexts: contexts.clone(),
            retry: RetryController::new(config.retry.clone(), sleeper),
            settings,
            events: events.clone(),
            telemetry: telemetry.clone(),
            max_concurrent_tasks: config.engine.max_concurrent_tasks,
            default_timeout_ms: config.engine.default_timeout_ms,
            context_ready_timeout: Duration::from_millis(config.engine.context_ready_timeout_ms)
        });

        info!(
            max_concurrent_tasks = config.engine.max_concurrent_tasks,
            cache_enabled = config.cache.enabled,
            "Engine initialized"
        );

        Ok(Engine {
            router,
            contexts,
            cache,
            events,
            telemetry,
            config: Arc::new(config)
        })
    }
}

/// The default fallback chain: on-device, then cloud, then heuristic.
pub fn default_backends(
    config: &Config,
    settings: Arc<dyn SettingsProvider>
) -> Result<Vec<Arc<dyn TaskBackend>>, EngineError> {
    let cloud = CloudBackend::new(&config.cloud, settings).map_err(|e| EngineError::Configuration {
        message: format!("could not build cloud client: {e}")
    })?;

    Ok(vec![
        Arc::new(OnDeviceBackend::new(config.on_device.enabled)),
        Arc::new(cloud),
        Arc::new(HeuristicBackend::new())
    ])
}

#[derive(Clone)]
pub struct Engine {
    router: TaskRouter,
    contexts: ExecutionContextManager,
    cache: Arc<ResultCache>,
    events: EventBus,
    telemetry: Arc<EngineTelemetry>,
    config: Arc<Config>
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            settings: None,
            host: None,
            backends: None,
            clock: None,
            sleeper: None
        }
    }

    pub async fn execute(&self, request: TaskRequest) -> TaskResult {
        self.router.execute(request).await
    }

    pub async fn handle(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let RequestEnvelope { request_id, task } = envelope;
        debug!(request_id = %request_id, task_type = %task.task_type(), "Handling request");
        ResponseEnvelope {
            request_id,
            result: self.execute(task).await
        }
    }

    /// Answers every message on `requests` until the channel closes. Each
    /// request runs on its own task; replies may arrive out of order.
    pub async fn serve(&self, mut requests: mpsc::Receiver<Inbound>) {
        info!("Engine channel service started");
        while let Some(Inbound { envelope, reply }) = requests.recv().await {
            let engine = self.clone();
            tokio::spawn(async move {
                let response = engine.handle(envelope).await;
                let request_id = response.request_id.clone();
                if reply.send(response).is_err() {
                    warn!(
                        error = %EngineError::ReplyDropped { request_id },
                        "Caller went away before the reply"
                    );
                }
            });
        }
        info!("Engine channel service stopped");
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.telemetry.snapshot()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn context_state(&self) -> ContextState {
        self.contexts.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops admitting requests and closes the execution context.
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        self.router.close();
        self.contexts.shutdown().await;
    }
}

/// Sending half of an engine channel.
#[derive(Clone)]
pub struct EngineClient {
    sender: mpsc::Sender<Inbound>
}

impl EngineClient {
    /// Creates a channel of `capacity` and returns the client plus the
    /// receiver to hand to [`Engine::serve`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub async fn submit(&self, envelope: RequestEnvelope) -> Result<ResponseEnvelope, EngineError> {
        let request_id = envelope.request_id.clone();
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Inbound { envelope, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        response
            .await
            .map_err(|_| EngineError::ReplyDropped { request_id })
    }
}
