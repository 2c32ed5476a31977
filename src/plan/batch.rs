use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::backend::Generator;
use super::{generate_plan, GeneratedPlan, PlanContext, PlanOptions};
use crate::db::{self, TopicEntry};
use crate::error::Result;

const CLAIM_KEY: &str = "ai_plan_claim";
const DONE_KEY: &str = "ai_plan_json";

/// Which stored topics to plan.
#[derive(Debug, Clone, Default)]
pub struct TopicFilter {
    pub subject: Option<String>,
    pub chapter: Option<String>,
    /// Used when a chapter has no `class_name` of its own.
    pub default_class: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    /// Pause after each generator call, per worker.
    pub delay: Duration,
    pub claim_ttl: chrono::Duration,
    pub plan: PlanOptions,
}

#[derive(Debug, Default, PartialEq)]
pub struct BatchStats {
    pub total: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct Job {
    path: String,
    ctx: PlanContext,
    text: String,
}

/// Generate plans for every matching topic that does not have one yet.
///
/// Generation runs on `concurrency` workers; all store access stays on the
/// calling task. A topic is claimed in the store before its job is queued,
/// so concurrent runs never plan the same topic twice.
pub async fn run_batch(
    conn: &Connection,
    generator: Arc<dyn Generator>,
    filter: &TopicFilter,
    opts: &BatchOptions,
) -> Result<BatchStats> {
    let entries = db::fetch_topics(conn, filter.subject.as_deref(), filter.chapter.as_deref())?;
    let mut stats = BatchStats { total: entries.len(), ..Default::default() };

    let now = Utc::now();
    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let stale_before = (now - opts.claim_ttl).to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut jobs = Vec::new();
    for entry in entries {
        if filter.limit.is_some_and(|n| jobs.len() >= n) {
            stats.skipped += 1;
            continue;
        }
        if entry.content().is_empty() || entry.has_plan() {
            stats.skipped += 1;
            continue;
        }
        match db::claim_document(conn, &entry.path, CLAIM_KEY, DONE_KEY, &stamp, &stale_before) {
            Ok(true) => jobs.push(job_for(&entry, &filter.default_class)),
            Ok(false) => {
                info!("{}: claimed elsewhere, skipping", entry.path);
                stats.skipped += 1;
            }
            Err(e) => {
                warn!("{}: cannot claim: {}", entry.path, e);
                stats.failed += 1;
            }
        }
    }

    if jobs.is_empty() {
        info!("No topics need a plan ({} skipped)", stats.skipped);
        return Ok(stats);
    }

    let model = generator.model_id();
    let concurrency = opts.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let pb = ProgressBar::new(jobs.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    // Workers send results, main loop writes them
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(Job, Result<GeneratedPlan>)>(concurrency * 2);

    for job in jobs {
        let generator = Arc::clone(&generator);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let plan_opts = opts.plan;
        let delay = opts.delay;

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = generate_plan(generator.as_ref(), &job.ctx, &job.text, &plan_opts).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send((job, result)).await;
        });
    }

    // rx closes once every worker has finished
    drop(tx);

    while let Some((job, result)) = rx.recv().await {
        pb.set_message(job.ctx.topic_title.clone());
        match result.and_then(|generated| save_plan(conn, &job.path, &generated, &model)) {
            Ok(()) => stats.generated += 1,
            Err(e) => {
                warn!("{}: {}", job.path, e);
                stats.failed += 1;
                if let Err(e) = db::release_claim(conn, &job.path, CLAIM_KEY) {
                    warn!("{}: cannot release claim: {}", job.path, e);
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Planned {} topics ({} generated, {} skipped, {} failed)",
        stats.total, stats.generated, stats.skipped, stats.failed
    );
    Ok(stats)
}

fn job_for(entry: &TopicEntry, default_class: &str) -> Job {
    Job {
        path: entry.path.clone(),
        ctx: PlanContext {
            class_name: entry
                .class_name
                .clone()
                .unwrap_or_else(|| default_class.to_string()),
            subject: entry.subject_id.clone(),
            chapter: entry.chapter_id.clone(),
            topic_title: entry.title(),
        },
        text: entry.content().to_string(),
    }
}

/// Merge the plan fields into the topic and drop the claim.
fn save_plan(conn: &Connection, path: &str, generated: &GeneratedPlan, model: &str) -> Result<()> {
    let fields = db::object(json!({
        "ai_plan_json": serde_json::to_value(&generated.plan)?,
        "ai_plan_markdown": generated.markdown,
        "ai_model": model,
        "ai_timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        CLAIM_KEY: null,
    }));
    db::set_document(conn, path, &fields, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlannerError;
    use crate::plan::testing::ScriptedGenerator;
    use crate::segment::emitter::TopicRecord;
    use serde_json::Value;

    const PLAN: &str = r#"{"title": "Plan", "learning_objectives": ["Listen"]}"#;

    fn mem_with_topics(texts: &[&str]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let records: Vec<TopicRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| TopicRecord {
                filename: format!("{:02}_Topic.pdf", i + 1),
                document: Vec::new(),
                text: t.to_string(),
                pages: vec![i],
            })
            .collect();
        db::save_topics(&conn, "English", "Chapter 1", "Class 1", "ch1.pdf", &records, "t0").unwrap();
        conn
    }

    fn opts(concurrency: usize) -> BatchOptions {
        BatchOptions {
            concurrency,
            delay: Duration::ZERO,
            claim_ttl: chrono::Duration::minutes(30),
            plan: PlanOptions { max_topic_chars: 12000, timeout: Duration::from_secs(5) },
        }
    }

    fn filter() -> TopicFilter {
        TopicFilter { default_class: "Class 1".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn plans_then_skips_on_rerun() {
        let conn = mem_with_topics(&["sing", "", "body"]);
        let gen = Arc::new(ScriptedGenerator::repeat(PLAN, 2));

        let stats = run_batch(&conn, gen.clone(), &filter(), &opts(2)).await.unwrap();
        assert_eq!(stats, BatchStats { total: 3, generated: 2, skipped: 1, failed: 0 });
        assert_eq!(gen.calls(), 2);

        let doc = db::get_document(&conn, &db::topic_path("English", "Chapter 1", "topic1"))
            .unwrap()
            .unwrap();
        assert_eq!(doc["ai_plan_json"]["title"], Value::from("Plan"));
        assert_eq!(doc["ai_model"], Value::from("scripted:test"));
        assert!(doc["ai_plan_markdown"].as_str().unwrap().starts_with("# Plan"));
        assert!(doc["ai_timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(!doc.contains_key(CLAIM_KEY));

        let again = Arc::new(ScriptedGenerator::new(Vec::new()));
        let stats = run_batch(&conn, again.clone(), &filter(), &opts(2)).await.unwrap();
        assert_eq!(stats, BatchStats { total: 3, generated: 0, skipped: 3, failed: 0 });
        assert_eq!(again.calls(), 0);
    }

    #[tokio::test]
    async fn failure_does_not_stop_batch() {
        let conn = mem_with_topics(&["one", "two"]);
        let gen = Arc::new(ScriptedGenerator::new(vec![
            Err(PlannerError::Unavailable("down".into())),
            Ok(PLAN.into()),
        ]));

        let stats = run_batch(&conn, gen, &filter(), &opts(1)).await.unwrap();
        assert_eq!(stats.generated, 1);
        assert_eq!(stats.failed, 1);

        // The failed topic is released and can be picked up later.
        let s = db::get_stats(&conn).unwrap();
        assert_eq!(s.planned, 1);
        assert_eq!(s.claimed, 0);
    }

    #[tokio::test]
    async fn limit_and_chapter_filter() {
        let conn = mem_with_topics(&["a", "b", "c"]);
        let gen = Arc::new(ScriptedGenerator::repeat(PLAN, 3));
        let f = TopicFilter {
            chapter: Some("Chapter 1".into()),
            limit: Some(1),
            ..filter()
        };
        let stats = run_batch(&conn, gen.clone(), &f, &opts(1)).await.unwrap();
        assert_eq!(stats.generated, 1);
        assert_eq!(stats.skipped, 2);

        let missing = TopicFilter { chapter: Some("Chapter 9".into()), ..filter() };
        let stats = run_batch(&conn, gen, &missing, &opts(1)).await.unwrap();
        assert_eq!(stats, BatchStats::default());
    }

    #[tokio::test]
    async fn held_claim_is_respected() {
        let conn = mem_with_topics(&["a"]);
        let path = db::topic_path("English", "Chapter 1", "topic1");
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        assert!(db::claim_document(&conn, &path, CLAIM_KEY, DONE_KEY, &now, "").unwrap());

        let gen = Arc::new(ScriptedGenerator::repeat(PLAN, 1));
        let stats = run_batch(&conn, gen.clone(), &filter(), &opts(1)).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(gen.calls(), 0);
    }
}
