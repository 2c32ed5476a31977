//! Lesson plan generation for stored topics.
//!
//! One call per topic: format the prompt, ask the [`Generator`], parse the
//! answer into a [`TeachingPlan`]. A reply that does not parse earns exactly
//! one retry with a stricter instruction appended.

pub mod agents;
pub mod backend;
pub mod batch;
pub mod prompt;
pub mod render;
pub mod schema;

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PlannerError, Result};
use backend::Generator;
use schema::TeachingPlan;

/// Characters of the last raw reply kept in `InvalidModelOutput`.
const RAW_PREFIX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct PlanContext {
    pub class_name: String,
    pub subject: String,
    pub chapter: String,
    pub topic_title: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub max_topic_chars: usize,
    /// Budget for each generator call; the retry gets a fresh one.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GeneratedPlan {
    pub plan: TeachingPlan,
    pub markdown: String,
}

pub async fn generate_plan(
    generator: &dyn Generator,
    ctx: &PlanContext,
    topic_text: &str,
    opts: &PlanOptions,
) -> Result<GeneratedPlan> {
    let user = prompt::user_prompt(ctx, topic_text, opts.max_topic_chars);

    let raw = call(generator, prompt::SYSTEM_PROMPT, &user, opts.timeout).await?;
    let raw = match parse_plan(&raw) {
        Some(plan) => return Ok(finish(plan)),
        None => {
            warn!("{}: reply was not valid JSON, retrying", ctx.topic_title);
            debug!("raw reply: {}", raw);
            call(generator, prompt::SYSTEM_PROMPT, &prompt::retry_prompt(&user), opts.timeout).await?
        }
    };

    match parse_plan(&raw) {
        Some(plan) => Ok(finish(plan)),
        None => Err(PlannerError::InvalidModelOutput {
            prefix: raw.chars().take(RAW_PREFIX_CHARS).collect(),
        }),
    }
}

async fn call(
    generator: &dyn Generator,
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<String> {
    tokio::time::timeout(timeout, generator.generate(system, user))
        .await
        .map_err(|_| PlannerError::Timeout(timeout))?
}

fn finish(plan: TeachingPlan) -> GeneratedPlan {
    let markdown = render::render_markdown(&plan);
    GeneratedPlan { plan, markdown }
}

/// Strict parse first, then again with code fences and a `json` tag removed.
/// Any non-empty JSON object is a plan; fields of an unexpected shape are
/// coerced by the schema rather than rejected.
pub fn parse_plan(raw: &str) -> Option<TeachingPlan> {
    parse_object(raw).or_else(|| parse_object(strip_fences(raw)))
}

fn parse_object(text: &str) -> Option<TeachingPlan> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(map) if !map.is_empty() => serde_json::from_value(Value::Object(map)).ok(),
        _ => None,
    }
}

/// Any JSON value in the reply, with the same fence handling as plans.
fn reply_json(raw: &str) -> Option<Value> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| serde_json::from_str(strip_fences(raw)).ok())
}

fn strip_fences(raw: &str) -> &str {
    let inner = raw.trim().trim_matches('`').trim_start();
    match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => inner[4..].trim(),
        _ => inner.trim(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::backend::Generator;
    use crate::error::{PlannerError, Result};

    /// Replays canned replies in order and records every prompt it saw.
    pub struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn repeat(reply: &str, n: usize) -> Self {
            Self::new((0..n).map(|_| Ok(reply.to_string())).collect())
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PlannerError::Unavailable("script exhausted".into())))
        }

        fn model_id(&self) -> String {
            "scripted:test".into()
        }
    }
}
