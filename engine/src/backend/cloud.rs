use super::{TaskBackend, missing_context};
use crate::context::ContextHandle;
use crate::events::SkipReason;
use crate::prompt::{self, Prompt};
use async_trait::async_trait;
use config::CloudConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use task_core::{BackendKind, SettingsProvider, TaskError, TaskOutput, TaskRequest, TaskType};
use tracing::debug;

/// Hosted model reached over a Gemini-style `generateContent` API.
///
/// The credential is read from the [`SettingsProvider`] on every call, so a
/// key added at runtime takes effect on the next request.
pub struct CloudBackend {
    client: Client,
    endpoint: String,
    model: String,
    settings: Arc<dyn SettingsProvider>
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1]
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>
}

impl CloudBackend {
    pub fn new(config: &CloudConfig, settings: Arc<dyn SettingsProvider>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            settings
        })
    }

    async fn generate(&self, api_key: &str, prompt: &Prompt) -> Result<String, TaskError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: &prompt.system
                }]
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: &prompt.user }]
            }],
            generation_config: GenerationConfig { temperature: 0.2 }
        };

        debug!(url = %url, "Calling cloud model");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(map_status(status, &detail));
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| TaskError::processing_failed(format!("unreadable cloud reply: {e}")))?;

        if let Some(reason) = reply.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(TaskError::invalid_input(format!("cloud model refused the text: {reason}")));
        }

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(TaskError::processing_failed("cloud model returned no candidates"));
        }
        Ok(text)
    }
}

fn map_transport_error(err: reqwest::Error) -> TaskError {
    if err.is_timeout() {
        TaskError::timeout(format!("cloud request timed out: {err}"))
    } else if err.is_connect() {
        TaskError::unavailable(format!("cloud endpoint unreachable: {err}"))
    } else {
        TaskError::processing_failed(format!("cloud request failed: {err}"))
    }
}

fn map_status(status: StatusCode, detail: &str) -> TaskError {
    let message = format!("cloud model answered {status}: {}", detail.trim());
    match status {
        StatusCode::BAD_REQUEST => TaskError::invalid_input(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            TaskError::unavailable(message)
        }
        StatusCode::TOO_MANY_REQUESTS => TaskError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TaskError::timeout(message),
        _ => TaskError::processing_failed(message)
    }
}

#[async_trait]
impl TaskBackend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn supports(&self, _task_type: TaskType) -> bool {
        true
    }

    fn prerequisite(&self) -> Result<(), SkipReason> {
        match self.settings.cloud_api_key() {
            Some(_) => Ok(()),
            None => Err(SkipReason::MissingCredential)
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
        if context.is_none() {
            return Err(missing_context(self.kind()));
        }
        let api_key = self
            .settings
            .cloud_api_key()
            .ok_or_else(|| TaskError::unavailable("no cloud API key configured"))?;

        let raw = self.generate(&api_key, &prompt::build(request)).await?;
        prompt::parse_output(request, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::{StaticSettings, TaskErrorKind};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

    fn backend_for(server: &MockServer, key: Option<&str>) -> CloudBackend {
        let config = CloudConfig {
            api_key: None,
            endpoint: server.uri(),
            model: "gemini-2.0-flash".to_string(),
            request_timeout_ms: 2_000
        };
        let settings = StaticSettings {
            cloud_api_key: key.map(str::to_string),
            ..StaticSettings::default()
        };
        CloudBackend::new(&config, Arc::new(settings)).unwrap()
    }

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        })
    }

    async fn generate(server: &MockServer) -> Result<String, TaskError> {
        backend_for(server, Some("k-1"))
            .generate(
                "k-1",
                &Prompt {
                    system: "Translate".to_string(),
                    user: "Bonjour".to_string()
                }
            )
            .await
    }

    #[tokio::test]
    async fn test_generate_sends_key_and_reads_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "k-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Hello")))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(generate(&server).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (400, TaskErrorKind::InvalidInput, false),
            (401, TaskErrorKind::Unavailable, true),
            (403, TaskErrorKind::Unavailable, true),
            (429, TaskErrorKind::RateLimited, true),
            (500, TaskErrorKind::ProcessingFailed, true),
            (503, TaskErrorKind::ProcessingFailed, true)
        ];

        for (status, kind, retryable) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path(GENERATE_PATH))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = generate(&server).await.unwrap_err();
            assert_eq!(err.kind, kind, "status {status}");
            assert_eq!(err.retryable, retryable, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_invalid_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = generate(&server).await.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("late"))
                    .set_delay(Duration::from_secs(5))
            )
            .mount(&server)
            .await;

        let err = generate(&server).await.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let server = MockServer::start().await;
        let backend = backend_for(&server, Some("k-1"));
        drop(server);

        let err = backend
            .generate(
                "k-1",
                &Prompt {
                    system: String::new(),
                    user: "x".to_string()
                }
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_missing_key_is_a_skip() {
        let server = MockServer::start().await;
        assert_eq!(
            backend_for(&server, None).prerequisite(),
            Err(SkipReason::MissingCredential)
        );
        assert_eq!(backend_for(&server, Some("k")).prerequisite(), Ok(()));
    }
}
