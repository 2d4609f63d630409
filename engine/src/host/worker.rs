use super::{ContextHost, ContextJob};
use crate::prompt::Prompt;
use async_trait::async_trait;
use errors::HostError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

const JOB_QUEUE_CAPACITY: usize = 64;

/// Model runtime living inside the context worker.
#[async_trait]
pub trait LocalModel: Send + Sync + 'static {
    /// Loads or probes the model. Called once per context after it reports
    /// ready; a failure is returned to every job the context receives.
    async fn warm_up(&self) -> Result<(), HostError>;

    async fn generate(&self, prompt: &Prompt) -> Result<String, HostError>;
}

struct Job {
    prompt: Prompt,
    reply: oneshot::Sender<Result<String, HostError>>
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>
}

/// Context backed by a background tokio task that owns a [`LocalModel`].
///
/// The context is ready as soon as the worker accepts jobs, whether or not
/// the model warmed up. Jobs reach the worker over a channel and run
/// concurrently inside it. Aborting the worker drops every pending reply,
/// which callers observe as a crash.
pub struct WorkerContextHost {
    model: Arc<dyn LocalModel>,
    worker: Mutex<Option<Worker>>
}

impl WorkerContextHost {
    pub fn new(model: Arc<dyn LocalModel>) -> Self {
        Self {
            model,
            worker: Mutex::new(None)
        }
    }

    fn spawn_worker(&self) -> Worker {
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<Job>(JOB_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = watch::channel(false);
        let model = self.model.clone();

        let task = tokio::spawn(async move {
            let _ = ready_tx.send(true);
            info!("Context worker ready");

            let model_error = match model.warm_up().await {
                Ok(()) => None,
                Err(e) => {
                    error!(error = %e, "Local model failed to warm up");
                    Some(e)
                }
            };

            let mut running = JoinSet::new();
            loop {
                tokio::select! {
                    job = jobs_rx.recv() => {
                        let Some(job) = job else { break };
                        if let Some(e) = &model_error {
                            let _ = job.reply.send(Err(e.clone()));
                            continue;
                        }
                        let model = model.clone();
                        running.spawn(async move {
                            let result = model.generate(&job.prompt).await;
                            let _ = job.reply.send(result);
                        });
                    }
                    Some(_) = running.join_next(), if !running.is_empty() => {}
                }
            }
            debug!("Context worker job channel closed");
        });

        Worker {
            jobs: jobs_tx,
            ready: ready_rx,
            task
        }
    }
}

#[async_trait]
impl ContextHost for WorkerContextHost {
    async fn create(&self) -> Result<(), HostError> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            if !worker.task.is_finished() {
                return Err(HostError::AlreadyExists);
            }
        }
        *slot = Some(self.spawn_worker());
        Ok(())
    }

    async fn wait_ready(&self) -> Result<(), HostError> {
        let mut ready = self
            .worker
            .lock()
            .as_ref()
            .map(|w| w.ready.clone())
            .ok_or(HostError::NotRunning)?;

        ready
            .wait_for(|ready| *ready)
            .await
            .map_err(|_| HostError::Crashed {
                reason: "worker exited before handshake".to_string()
            })?;
        Ok(())
    }

    async fn dispatch(&self, job: ContextJob) -> Result<String, HostError> {
        let jobs = self
            .worker
            .lock()
            .as_ref()
            .map(|w| w.jobs.clone())
            .ok_or(HostError::NotRunning)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send(Job {
            prompt: job.prompt,
            reply: reply_tx
        })
        .await
        .map_err(|_| HostError::Crashed {
            reason: "worker stopped accepting jobs".to_string()
        })?;

        reply_rx.await.map_err(|_| HostError::Crashed {
            reason: format!("worker dropped {} job", job.task_type)
        })?
    }

    async fn close(&self) -> Result<(), HostError> {
        if let Some(worker) = self.worker.lock().take() {
            worker.task.abort();
            info!("Context worker closed");
        }
        Ok(())
    }
}
