use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::Settings;
use crate::error::{PlannerError, Result};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const MISTRAL_URL: &str = "https://api.mistral.ai/v1/chat/completions";

/// Something that turns a prompt into raw model text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    /// `"{backend}:{model}"`, stored alongside each plan.
    fn model_id(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

pub struct OllamaGenerator {
    client: Client,
    host: String,
    model: String,
    sampling: Sampling,
}

impl OllamaGenerator {
    pub fn new(host: &str, model: &str, sampling: Sampling, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            sampling,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", system, prompt),
            "options": {
                "temperature": self.sampling.temperature,
                "top_p": self.sampling.top_p,
            },
            "stream": false,
        });
        let url = format!("{}/api/generate", self.host);
        let data = send_with_retry(|| self.client.post(&url).json(&body), "ollama").await?;

        data.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| PlannerError::Unavailable("ollama: no `response` field in reply".into()))
    }

    fn model_id(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

pub struct MistralGenerator {
    client: Client,
    api_key: String,
    model: String,
    sampling: Sampling,
}

impl MistralGenerator {
    pub fn new(api_key: &str, model: &str, sampling: Sampling, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            return Err(PlannerError::Unavailable(
                "mistral: set MISTRAL_API_KEY or PLANNER_MISTRAL_API_KEY".into(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            sampling,
        })
    }
}

#[async_trait]
impl Generator for MistralGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.sampling.temperature,
            "top_p": self.sampling.top_p,
            "max_tokens": self.sampling.max_tokens,
        });
        let data = send_with_retry(
            || {
                self.client
                    .post(MISTRAL_URL)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            "mistral",
        )
        .await?;

        data.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| PlannerError::Unavailable("mistral: no message content in reply".into()))
    }

    fn model_id(&self) -> String {
        format!("mistral:{}", self.model)
    }
}

/// Build the configured backend. `backend` overrides `settings.backend`.
pub fn from_settings(settings: &Settings, backend: Option<&str>) -> Result<Box<dyn Generator>> {
    let sampling = Sampling {
        temperature: settings.temperature,
        top_p: settings.top_p,
        max_tokens: settings.max_tokens,
    };
    let timeout = settings.request_timeout();

    match backend.unwrap_or(&settings.backend) {
        "ollama" => Ok(Box::new(OllamaGenerator::new(
            &settings.ollama_host,
            &settings.ollama_model,
            sampling,
            timeout,
        )?)),
        "mistral" => Ok(Box::new(MistralGenerator::new(
            &settings.mistral_api_key,
            &settings.mistral_model,
            sampling,
            timeout,
        )?)),
        other => Err(PlannerError::Unavailable(format!(
            "unknown backend '{}' (expected 'ollama' or 'mistral')",
            other
        ))),
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PlannerError::Unavailable(e.to_string()))
}

fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}

async fn send_with_retry<F>(request: F, backend: &str) -> Result<Value>
where
    F: Fn() -> RequestBuilder,
{
    for attempt in 0..=MAX_RETRIES {
        let response = request()
            .send()
            .await
            .map_err(|e| PlannerError::Unavailable(format!("{}: {}", backend, e)))?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| PlannerError::Unavailable(format!("{}: bad reply body: {}", backend, e)));
        }

        if !is_transient(status) || attempt == MAX_RETRIES {
            let text = response.text().await.unwrap_or_default();
            return Err(PlannerError::Unavailable(format!(
                "{}: HTTP {}: {}",
                backend,
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
        warn!(
            "{} returned {} (attempt {}/{}), backing off {:.1}s",
            backend,
            status,
            attempt + 1,
            MAX_RETRIES,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
    }

    Err(PlannerError::Unavailable(format!("{}: retries exhausted", backend)))
}
