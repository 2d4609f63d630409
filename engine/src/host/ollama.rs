use super::LocalModel;
use crate::prompt::Prompt;
use async_trait::async_trait;
use config::OnDeviceConfig;
use errors::HostError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// [`LocalModel`] served by an Ollama-compatible daemon on this machine.
pub struct OllamaModel {
    client: Client,
    endpoint: String,
    model: String,
    timeout_ms: u64
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>
}

#[derive(Deserialize)]
struct ModelTag {
    name: String
}

impl OllamaModel {
    pub fn new(config: &OnDeviceConfig) -> Result<Self, HostError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| HostError::SetupFailed {
                reason: format!("could not build HTTP client: {e}")
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_ms: config.request_timeout_ms
        })
    }
}

#[async_trait]
impl LocalModel for OllamaModel {
    /// Checks that the daemon answers and has the configured model pulled.
    async fn warm_up(&self) -> Result<(), HostError> {
        let url = format!("{}/api/tags", self.endpoint);
        debug!(url = %url, "Probing local model server");

        let setup_failed = |reason: String| HostError::SetupFailed { reason };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| setup_failed(format!("local model server unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(setup_failed(format!(
                "local model server answered {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| setup_failed(format!("unreadable model list: {e}")))?;
        let wanted = self.model.as_str();
        let installed = tags
            .models
            .iter()
            .any(|tag| tag.name == wanted || tag.name.strip_suffix(":latest") == Some(wanted));
        if !installed {
            return Err(setup_failed(format!("model {wanted} is not installed")));
        }
        Ok(())
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, HostError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &self.model,
            system: &prompt.system,
            prompt: &prompt.user,
            stream: false,
            options: GenerateOptions { temperature: 0.2 }
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HostError::JobTimedOut {
                        timeout_ms: self.timeout_ms
                    }
                } else {
                    HostError::JobFailed {
                        reason: e.to_string()
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(HostError::JobFailed {
                reason: format!("local model answered {status}: {detail}")
            });
        }

        let reply: GenerateResponse = response.json().await.map_err(|e| HostError::JobFailed {
            reason: format!("unreadable model reply: {e}")
        })?;
        Ok(reply.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model_for(server: &MockServer) -> OllamaModel {
        OllamaModel::new(&OnDeviceConfig {
            enabled: true,
            endpoint: server.uri(),
            model: "gemma3:4b".to_string(),
            request_timeout_ms: 2_000
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_warm_up_requires_installed_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3:latest"}]
            })))
            .mount(&server)
            .await;

        let err = model_for(&server).warm_up().await.unwrap_err();
        assert!(matches!(err, HostError::SetupFailed { ref reason } if reason.contains("gemma3:4b")));
    }

    #[tokio::test]
    async fn test_warm_up_and_generate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "gemma3:4b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "gemma3:4b",
                "stream": false,
                "prompt": "Bonjour"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "Hello"}))
            )
            .mount(&server)
            .await;

        let model = model_for(&server);
        model.warm_up().await.unwrap();
        let reply = model
            .generate(&Prompt {
                system: "Translate".to_string(),
                user: "Bonjour".to_string()
            })
            .await
            .unwrap();
        assert_eq!(reply, "Hello");
    }

    #[tokio::test]
    async fn test_generate_server_error_is_job_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .generate(&Prompt {
                system: String::new(),
                user: "x".to_string()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::JobFailed { ref reason } if reason.contains("out of memory")));
    }
}
