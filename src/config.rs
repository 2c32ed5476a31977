use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::Result;

/// Runtime settings. Defaults below, overridden by `PLANNER_*` env vars,
/// then by whatever CLI flags the command exposes.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub output_dir: String,
    pub backend: String,
    pub ollama_host: String,
    pub ollama_model: String,
    pub mistral_api_key: String,
    pub mistral_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub request_timeout_secs: u64,
    pub max_topic_chars: usize,
    pub concurrency: usize,
    pub delay_ms: u64,
    pub claim_ttl_secs: i64,
    pub default_class: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut settings: Settings = Config::builder()
            .set_default("db_path", "data/planner.sqlite")?
            .set_default("output_dir", "data/topics")?
            .set_default("backend", "ollama")?
            .set_default("ollama_host", "http://localhost:11434")?
            .set_default("ollama_model", "mistral")?
            .set_default("mistral_api_key", "")?
            .set_default("mistral_model", "mistral-large-latest")?
            .set_default("max_tokens", 2048)?
            .set_default("temperature", 0.3)?
            .set_default("top_p", 0.9)?
            .set_default("request_timeout_secs", 300)?
            .set_default("max_topic_chars", 12000)?
            .set_default("concurrency", 1)?
            .set_default("delay_ms", 800)?
            .set_default("claim_ttl_secs", 1800)?
            .set_default("default_class", "Class 1")?
            .add_source(Environment::with_prefix("PLANNER"))
            .build()?
            .try_deserialize()?;

        if settings.mistral_api_key.is_empty() {
            if let Ok(key) = std::env::var("MISTRAL_API_KEY") {
                settings.mistral_api_key = key;
            }
        }
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
