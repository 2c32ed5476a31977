mod config;
mod db;
mod error;
mod pdf;
mod plan;
mod segment;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::Settings;
use crate::plan::agents::{self, AgentKind, TeachingContext};
use crate::plan::batch::{BatchOptions, TopicFilter};
use crate::plan::schema::TeachingPlan;
use crate::plan::PlanOptions;

#[derive(Parser)]
#[command(name = "chapter_planner", about = "Split textbook chapters into topics and plan lessons")]
struct Cli {
    /// SQLite store (default: PLANNER_DB_PATH or data/planner.sqlite)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a chapter PDF into topic PDFs and store their text
    Split {
        /// Chapter PDF
        pdf: PathBuf,
        #[arg(short, long)]
        subject: String,
        #[arg(short, long)]
        chapter: String,
        /// Class the chapter belongs to (e.g. "Class 1")
        #[arg(long = "class")]
        class_name: Option<String>,
        /// Directory for topic PDFs (default: PLANNER_OUTPUT_DIR or data/topics)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Show the split without writing files or the store
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate lesson plans for stored topics that have none
    Plan {
        #[arg(short, long)]
        subject: Option<String>,
        #[arg(short, long)]
        chapter: Option<String>,
        /// Class used when a chapter has none recorded
        #[arg(long = "class")]
        class_name: Option<String>,
        /// Max topics to plan (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Pause after each model call
        #[arg(long)]
        delay_ms: Option<u64>,
        /// ollama or mistral
        #[arg(long)]
        backend: Option<String>,
    },
    /// Generate multigrade classroom material for one topic
    Generate {
        subject: String,
        chapter: String,
        /// e.g. topic3
        topic_id: String,
        /// Agents to run (repeatable)
        #[arg(short, long = "agent", value_enum, required_unless_present = "all")]
        agents: Vec<AgentKind>,
        /// Run every agent
        #[arg(long, conflicts_with = "agents")]
        all: bool,
        /// Grades taught together (default: the chapter's class)
        #[arg(short, long, value_delimiter = ',')]
        grades: Vec<String>,
        /// Subjects covered (default: the topic's subject)
        #[arg(long, value_delimiter = ',')]
        subjects: Vec<String>,
        /// Lesson length in minutes
        #[arg(long, default_value_t = 45)]
        duration: u32,
        #[arg(long, default_value_t = 20)]
        class_size: u32,
        /// Learning objective (repeatable)
        #[arg(long = "objective")]
        objectives: Vec<String>,
        /// Extra agent parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// ollama or mistral
        #[arg(long)]
        backend: Option<String>,
    },
    /// List stored topics
    Topics {
        #[arg(short, long)]
        subject: Option<String>,
        #[arg(short, long)]
        chapter: Option<String>,
    },
    /// Print the plan stored for one topic
    Show {
        subject: String,
        chapter: String,
        /// e.g. topic3
        topic_id: String,
        /// Raw plan JSON instead of markdown
        #[arg(long)]
        json: bool,
        /// Print stored agent output instead of the plan
        #[arg(short, long, value_enum)]
        agent: Option<AgentKind>,
    },
    /// Store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load().context("loading settings")?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let conn = db::connect(&settings.db_path)
        .with_context(|| format!("opening store {}", settings.db_path))?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Split { pdf: input, subject, chapter, class_name, out, dry_run } => {
            let bytes = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let source = pdf::SourcePdf::from_bytes(bytes)
                .with_context(|| format!("opening {}", input.display()))?;
            println!("Splitting {} ({} pages)...", input.display(), source.page_count());

            let texts = source.page_texts();
            let outcome = segment::split_topics(texts, &source);
            if let Some(reason) = nothing_to_store(&outcome) {
                println!("{}", reason);
                return Ok(());
            }

            println!("{:>3} | {:<36} | {:<9} | {:>6}", "#", "File", "Pages", "Chars");
            println!("{}", "-".repeat(63));
            for (i, r) in outcome.records.iter().enumerate() {
                println!(
                    "{:>3} | {:<36} | {:<9} | {:>6}",
                    i + 1,
                    truncate(&r.filename, 36),
                    page_range(&r.pages),
                    r.text.chars().count()
                );
            }
            if !outcome.skipped.is_empty() {
                println!("\nSkipped (could not write pages): {}", outcome.skipped.join(", "));
            }

            if dry_run {
                println!("\nDry run: {} topics, nothing written.", outcome.records.len());
                return Ok(());
            }

            let dir = out
                .unwrap_or_else(|| PathBuf::from(&settings.output_dir))
                .join(segment::slugify(&subject))
                .join(segment::slugify(&chapter));
            write_artifacts(&dir, &outcome.records)?;

            let class_name = class_name.unwrap_or_else(|| settings.default_class.clone());
            let source_file = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let saved = db::save_topics(
                &conn,
                &subject,
                &chapter,
                &class_name,
                &source_file,
                &outcome.records,
                &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            )?;
            println!(
                "\nSaved {} topics to {} and {}",
                saved,
                db::topics_path(&subject, &chapter),
                dir.display()
            );
            Ok(())
        }
        Commands::Plan { subject, chapter, class_name, limit, concurrency, delay_ms, backend } => {
            if let Some(n) = concurrency {
                settings.concurrency = n;
            }
            if let Some(ms) = delay_ms {
                settings.delay_ms = ms;
            }
            let generator: Arc<dyn plan::backend::Generator> =
                Arc::from(plan::backend::from_settings(&settings, backend.as_deref())?);
            println!("Planning with {}...", generator.model_id());

            let filter = TopicFilter {
                subject,
                chapter,
                default_class: class_name.unwrap_or_else(|| settings.default_class.clone()),
                limit,
            };
            let opts = BatchOptions {
                concurrency: settings.concurrency,
                delay: settings.delay(),
                claim_ttl: chrono::Duration::seconds(settings.claim_ttl_secs),
                plan: PlanOptions {
                    max_topic_chars: settings.max_topic_chars,
                    timeout: settings.request_timeout(),
                },
            };
            let stats = plan::batch::run_batch(&conn, generator, &filter, &opts).await?;
            println!(
                "Done: {} topics ({} generated, {} skipped, {} failed).",
                stats.total, stats.generated, stats.skipped, stats.failed
            );
            Ok(())
        }
        Commands::Generate {
            subject,
            chapter,
            topic_id,
            agents: picked,
            all,
            grades,
            subjects,
            duration,
            class_size,
            objectives,
            params,
            backend,
        } => {
            let path = db::topic_path(&subject, &chapter, &topic_id);
            let Some(topic) = db::get_document(&conn, &path)? else {
                bail!("no topic at {}", path);
            };
            let title = topic.get("title").and_then(Value::as_str).unwrap_or(&topic_id);
            let text = topic.get("content").and_then(Value::as_str).unwrap_or("");

            let grades = if grades.is_empty() {
                let chapter_doc = db::get_document(&conn, &db::chapter_path(&subject, &chapter))?;
                let class_name = chapter_doc
                    .as_ref()
                    .and_then(|c| c.get("class_name"))
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                    .unwrap_or(&settings.default_class);
                vec![class_name.to_string()]
            } else {
                grades
            };
            let ctx = TeachingContext {
                grades,
                subjects: if subjects.is_empty() { vec![subject.clone()] } else { subjects },
                topic: agents::topic_name(title),
                duration_minutes: duration,
                class_size,
                learning_objectives: objectives,
            };
            ctx.validate()?;

            let kinds: Vec<AgentKind> = if all { AgentKind::ALL.to_vec() } else { picked };
            let generator = plan::backend::from_settings(&settings, backend.as_deref())?;
            let model = generator.model_id();
            println!("Generating {} item(s) for {} with {}...", kinds.len(), path, model);

            let opts = PlanOptions {
                max_topic_chars: settings.max_topic_chars,
                timeout: settings.request_timeout(),
            };
            let mut failed = 0;
            for (i, kind) in kinds.iter().enumerate() {
                if i > 0 && !settings.delay().is_zero() {
                    tokio::time::sleep(settings.delay()).await;
                }
                let extra = agents::agent_params(*kind, &params);
                match agents::generate_content(generator.as_ref(), *kind, &ctx, text, &extra, &opts).await {
                    Ok(content) => {
                        agents::save_content(&conn, &path, &content, &model)?;
                        let note = if content.parsed { "" } else { " (raw text)" };
                        println!("  {:<24} saved{}", kind.id(), note);
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::warn!("{} failed for {}: {}", kind.id(), path, e);
                        println!("  {:<24} failed: {}", kind.id(), e);
                    }
                }
            }
            println!("Done: {} generated, {} failed.", kinds.len() - failed, failed);
            Ok(())
        }
        Commands::Topics { subject, chapter } => {
            let topics = db::fetch_topics(&conn, subject.as_deref(), chapter.as_deref())?;
            if topics.is_empty() {
                println!("No topics found. Run 'split' first.");
                return Ok(());
            }

            println!(
                "{:<16} | {:<20} | {:<8} | {:<30} | {:<9} | {:<4}",
                "Subject", "Chapter", "Id", "Title", "Pages", "Plan"
            );
            println!("{}", "-".repeat(100));
            for t in &topics {
                let pages: Vec<usize> = t
                    .fields
                    .get("pages")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|n| n as usize).collect())
                    .unwrap_or_default();
                println!(
                    "{:<16} | {:<20} | {:<8} | {:<30} | {:<9} | {:<4}",
                    truncate(&t.subject_id, 16),
                    truncate(&t.chapter_id, 20),
                    t.topic_id,
                    truncate(&t.title(), 30),
                    page_range(&pages),
                    if t.has_plan() { "yes" } else { "-" }
                );
            }
            let planned = topics.iter().filter(|t| t.has_plan()).count();
            println!("\n{} topics | {} planned", topics.len(), planned);
            Ok(())
        }
        Commands::Show { subject, chapter, topic_id, json, agent } => {
            let path = db::topic_path(&subject, &chapter, &topic_id);
            let Some(fields) = db::get_document(&conn, &path)? else {
                bail!("no topic at {}", path);
            };
            if let Some(kind) = agent {
                match db::get_document(&conn, &agents::content_path(&path, kind))? {
                    None => println!("{} has no {} output yet. Run 'generate' first.", path, kind.id()),
                    Some(doc) => match doc.get("content") {
                        Some(Value::String(raw)) => println!("{}", raw),
                        Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
                        None => println!("{}", serde_json::to_string_pretty(&doc)?),
                    },
                }
                return Ok(());
            }
            let plan_json = fields.get("ai_plan_json").filter(|v| !v.is_null());
            match (plan_json, json) {
                (None, _) => println!("{} has no plan yet. Run 'plan' first.", path),
                (Some(v), true) => println!("{}", serde_json::to_string_pretty(v)?),
                (Some(v), false) => match fields.get("ai_plan_markdown").and_then(Value::as_str) {
                    Some(md) if !md.is_empty() => println!("{}", md),
                    _ => {
                        let plan: TeachingPlan = serde_json::from_value(v.clone())
                            .with_context(|| format!("{}: stored plan does not match schema", path))?;
                        println!("{}", plan::render::render_markdown(&plan));
                    }
                },
            }
            let stored = agents::load_content(&conn, &path)?;
            if !stored.is_empty() {
                let ids: Vec<&str> = stored.iter().map(|(id, _)| id.as_str()).collect();
                println!("\nAgent outputs: {} (see --agent)", ids.join(", "));
            }
            Ok(())
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Subjects: {}", s.subjects);
            println!("Chapters: {}", s.chapters);
            println!("Topics:   {}", s.topics);
            println!("Planned:  {}", s.planned);
            println!("Pending:  {}", s.topics.saturating_sub(s.planned));
            println!("Claimed:  {}", s.claimed);
            println!("Agent outputs: {}", s.generated);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn write_artifacts(dir: &Path, records: &[segment::emitter::TopicRecord]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for r in records {
        let path = dir.join(&r.filename);
        std::fs::write(&path, &r.document).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

/// Why a split produced nothing to store, if it did.
fn nothing_to_store(outcome: &segment::SplitOutcome) -> Option<String> {
    match (outcome.records.is_empty(), outcome.skipped.is_empty()) {
        (false, _) => None,
        (true, true) => Some("No topic headers found; nothing to store.".into()),
        (true, false) => Some(format!(
            "All {} topics failed to write their pages; nothing stored. Skipped: {}",
            outcome.skipped.len(),
            outcome.skipped.join(", ")
        )),
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

/// 0-based page indices as a 1-based span, e.g. `3-5`.
fn page_range(pages: &[usize]) -> String {
    match (pages.first(), pages.last()) {
        (Some(a), Some(b)) if a == b => format!("{}", a + 1),
        (Some(a), Some(b)) => format!("{}-{}", a + 1, b + 1),
        _ => "-".into(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
