use anyhow::Result;
use clap::Args;
use config::Config;
use engine::{Engine, EngineClient};
use task_core::{RequestEnvelope, ResponseEnvelope, TaskError, TaskResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 64, help = "Requests buffered before stdin is paused")]
    pub queue: usize
}

pub async fn run(args: ServeArgs, config: Config) -> Result<()> {
    let engine = Engine::builder(config).build()?;
    let (client, receiver) = EngineClient::channel(args.queue);
    let service = tokio::spawn({
        let engine = engine.clone();
        async move { engine.serve(receiver).await }
    });

    let (responses, mut outbox) = mpsc::channel::<ResponseEnvelope>(args.queue.max(1));
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = outbox.recv().await {
            let mut line = serde_json::to_vec(&response)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    info!("Reading request envelopes from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let responses = responses.clone();
        match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(envelope) => {
                let client = client.clone();
                tokio::spawn(async move {
                    match client.submit(envelope).await {
                        Ok(response) => {
                            let _ = responses.send(response).await;
                        }
                        Err(e) => warn!(error = %e, "Request was not answered")
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Malformed request envelope");
                let _ = responses.send(malformed(&line, &e)).await;
            }
        }
    }

    drop(client);
    drop(responses);
    writer.await??;
    service.await?;
    engine.shutdown().await;
    Ok(())
}

/// Failure response for a line that is not a valid envelope. Echoes the
/// request id when the line is at least a JSON object carrying one.
fn malformed(line: &str, error: &serde_json::Error) -> ResponseEnvelope {
    let request_id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("requestId")?.as_str().map(str::to_string))
        .unwrap_or_default();

    ResponseEnvelope {
        request_id,
        result: TaskResult::failure(
            TaskError::invalid_input(format!("malformed request: {error}")).fatal()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::TaskErrorKind;

    #[test]
    fn test_malformed_line_keeps_request_id() {
        let line = r#"{"requestId":"r-9","taskType":"teleport","payload":{}}"#;
        let error = serde_json::from_str::<RequestEnvelope>(line).unwrap_err();

        let response = malformed(line, &error);
        assert_eq!(response.request_id, "r-9");
        assert_eq!(
            response.result.error().map(|e| e.kind),
            Some(TaskErrorKind::InvalidInput)
        );
    }

    #[test]
    fn test_non_json_line_has_empty_request_id() {
        let error = serde_json::from_str::<RequestEnvelope>("hello").unwrap_err();
        assert_eq!(malformed("hello", &error).request_id, "");
    }
}
