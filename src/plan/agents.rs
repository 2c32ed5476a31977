//! Multigrade classroom material for a stored topic.
//!
//! Each [`AgentKind`] has its own system prompt and JSON layout. Unlike
//! lesson plans, a reply that is not JSON is still kept, as raw text.

use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::backend::Generator;
use super::{call, reply_json, PlanOptions};
use crate::db::{self, Fields};
use crate::error::{PlannerError, Result};

/// Collection under each topic document that holds generated material.
pub const CONTENT_COLLECTION: &str = "ai_generated_content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum AgentKind {
    CoursePlanner,
    Activity,
    Worksheet,
    Assessment,
    VisualAids,
    PeerActivity,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::CoursePlanner,
        AgentKind::Activity,
        AgentKind::Worksheet,
        AgentKind::Assessment,
        AgentKind::VisualAids,
        AgentKind::PeerActivity,
    ];

    /// Document id of this agent's output under the topic.
    pub fn id(self) -> &'static str {
        match self {
            AgentKind::CoursePlanner => "course_planner",
            AgentKind::Activity => "activity_generator",
            AgentKind::Worksheet => "worksheet_generator",
            AgentKind::Assessment => "assessment_generator",
            AgentKind::VisualAids => "visual_aids_generator",
            AgentKind::PeerActivity => "peer_activity_generator",
        }
    }

    pub fn system(self) -> &'static str {
        match self {
            AgentKind::CoursePlanner => {
                "You are a multigrade classroom course planning specialist. You create comprehensive \
                 daily lesson plans that accommodate multiple grade levels (1-4) simultaneously, \
                 ensuring differentiated instruction and smooth transitions between activities for \
                 different grade groups."
            }
            AgentKind::Activity => {
                "You are a creative educational activity designer specializing in multigrade \
                 classrooms. You create engaging, hands-on activities that can be adapted for \
                 different grade levels while maintaining the core learning objectives."
            }
            AgentKind::Worksheet => {
                "You are a worksheet creation specialist for multigrade classrooms. You design \
                 printable worksheets that provide differentiated practice opportunities for \
                 students in grades 1-4."
            }
            AgentKind::Assessment => {
                "You are an assessment design expert for multigrade classrooms. You create fair, \
                 comprehensive assessments that evaluate student understanding across different \
                 grade levels and learning styles."
            }
            AgentKind::VisualAids => {
                "You are a visual learning specialist who creates descriptions for educational \
                 visual aids, charts, diagrams, and interactive displays suitable for multigrade \
                 classrooms."
            }
            AgentKind::PeerActivity => {
                "You are a collaborative learning specialist who designs peer-to-peer activities \
                 that promote cross-grade interaction, mentoring, and cooperative learning in \
                 multigrade settings."
            }
        }
    }

    fn task(self) -> &'static str {
        match self {
            AgentKind::CoursePlanner => "Create a detailed daily course plan for a multigrade classroom.",
            AgentKind::Activity => "Generate creative learning activities for a multigrade classroom.",
            AgentKind::Worksheet => "Create a comprehensive worksheet set for multigrade classroom practice.",
            AgentKind::Assessment => {
                "Design a comprehensive assessment strategy for multigrade classroom evaluation."
            }
            AgentKind::VisualAids => {
                "Design visual aids and learning materials for multigrade classroom instruction."
            }
            AgentKind::PeerActivity => {
                "Create peer-to-peer learning activities for multigrade classroom collaboration."
            }
        }
    }

    fn context_lines(self, ctx: &TeachingContext) -> Vec<String> {
        let mut lines = vec![
            format!("- Grades: {}", ctx.grades.join(", ")),
            format!("- Subject(s): {}", ctx.subjects.join(", ")),
            format!("- Topic: {}", ctx.topic),
        ];
        let duration = format!("- Duration: {} minutes", ctx.duration_minutes);
        let class_size = format!("- Class Size: {} students", ctx.class_size);
        match self {
            AgentKind::CoursePlanner => {
                lines.push(duration);
                lines.push(class_size);
                lines.push(format!("- Learning Objectives: {}", ctx.learning_objectives.join(", ")));
            }
            AgentKind::Activity => {
                lines.push(duration);
                lines.push(class_size);
            }
            AgentKind::Worksheet => lines.push("- Skill Level Range: Beginning to Advanced".into()),
            AgentKind::Assessment => lines.push("- Assessment Type: Formative and Summative".into()),
            AgentKind::VisualAids => {
                lines.push("- Visual Learning Objectives: Support comprehension and engagement".into())
            }
            AgentKind::PeerActivity => {
                lines.push(class_size);
                lines.push("- Collaboration Goal: Cross-grade learning and mentoring".into());
            }
        }
        lines
    }

    fn layout(self) -> &'static str {
        match self {
            AgentKind::CoursePlanner => COURSE_PLAN_LAYOUT,
            AgentKind::Activity => ACTIVITY_LAYOUT,
            AgentKind::Worksheet => WORKSHEET_LAYOUT,
            AgentKind::Assessment => ASSESSMENT_LAYOUT,
            AgentKind::VisualAids => VISUAL_AID_LAYOUT,
            AgentKind::PeerActivity => PEER_ACTIVITY_LAYOUT,
        }
    }

    /// The one tunable each agent takes, with its default.
    pub fn parameter(self) -> Option<(&'static str, &'static str)> {
        match self {
            AgentKind::CoursePlanner => None,
            AgentKind::Activity => Some(("activity_type", "group")),
            AgentKind::Worksheet => Some(("difficulty_level", "mixed")),
            AgentKind::Assessment => Some(("assessment_type", "formative")),
            AgentKind::VisualAids => Some(("aid_type", "poster")),
            AgentKind::PeerActivity => Some(("collaboration_type", "mixed_groups")),
        }
    }

    /// Objectives used when none are given.
    fn default_objectives(self, topic: &str, grades: &[String]) -> Vec<String> {
        let per_grade = |f: &dyn Fn(&str) -> String| -> Vec<String> {
            grades.iter().map(|g| f(g.as_str())).collect()
        };
        match self {
            AgentKind::CoursePlanner => per_grade(&|g| format!("Learn {} at {} level", topic, g)),
            AgentKind::Activity => per_grade(&|g| format!("Engage {} students in {}", g, topic)),
            AgentKind::Worksheet => per_grade(&|g| format!("Practice {} skills for {}", topic, g)),
            AgentKind::Assessment => per_grade(&|g| format!("Assess {} understanding for {}", topic, g)),
            AgentKind::VisualAids => {
                per_grade(&|g| format!("Support visual learning of {} for {}", topic, g))
            }
            AgentKind::PeerActivity => vec![format!("Foster peer learning in {} across grades", topic)],
        }
    }
}

/// The classroom a piece of content is written for.
#[derive(Debug, Clone)]
pub struct TeachingContext {
    pub grades: Vec<String>,
    pub subjects: Vec<String>,
    pub topic: String,
    pub duration_minutes: u32,
    pub class_size: u32,
    pub learning_objectives: Vec<String>,
}

impl TeachingContext {
    pub fn validate(&self) -> Result<()> {
        let missing = if self.grades.iter().all(|g| g.trim().is_empty()) {
            Some("at least one grade is required")
        } else if self.subjects.iter().all(|s| s.trim().is_empty()) {
            Some("at least one subject is required")
        } else if self.topic.trim().is_empty() {
            Some("topic is empty")
        } else if self.duration_minutes == 0 {
            Some("duration must be positive")
        } else if self.class_size == 0 {
            Some("class size must be positive")
        } else {
            None
        };
        match missing {
            Some(reason) => Err(PlannerError::InvalidContext(reason.into())),
            None => Ok(()),
        }
    }
}

/// Generated material as stored under the topic.
#[derive(Debug, Clone)]
pub struct AgentContent {
    pub kind: AgentKind,
    /// Parsed JSON, or the raw reply as a string when it was not JSON.
    pub content: Value,
    pub parsed: bool,
}

/// Topic name from a stored title: `03_Picture_Talk` becomes `Picture Talk`.
pub fn topic_name(title: &str) -> String {
    let rest = match title.split_once('_') {
        Some((n, rest)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => rest,
        _ => title,
    };
    rest.replace('_', " ").trim().to_string()
}

/// User prompt for one agent. `params` are appended verbatim; `topic_text`
/// is cut at `max_chars` characters.
pub fn agent_prompt(
    kind: AgentKind,
    ctx: &TeachingContext,
    topic_text: &str,
    params: &Map<String, Value>,
    max_chars: usize,
) -> String {
    let mut out = format!(
        "{}\n\nCONTEXT:\n{}\n\nReturn a JSON structure with:\n{}",
        kind.task(),
        kind.context_lines(ctx).join("\n"),
        kind.layout()
    );
    let text: String = topic_text.trim().chars().take(max_chars).collect();
    if !text.is_empty() {
        out.push_str(&format!("\n\nTOPIC TEXT:\n\"\"\"{}\"\"\"", text));
    }
    if !params.is_empty() {
        out.push_str(&format!("\n\nAdditional Parameters: {}", Value::Object(params.clone())));
    }
    out
}

/// Parameters for one agent: its default, overridden by any caller value
/// with the same key. Unrelated caller keys are passed through.
pub fn agent_params(kind: AgentKind, overrides: &[(String, String)]) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some((key, default)) = kind.parameter() {
        params.insert(key.into(), Value::from(default));
    }
    for (key, value) in overrides {
        params.insert(key.clone(), Value::from(value.as_str()));
    }
    params
}

pub async fn generate_content(
    generator: &dyn Generator,
    kind: AgentKind,
    ctx: &TeachingContext,
    topic_text: &str,
    params: &Map<String, Value>,
    opts: &PlanOptions,
) -> Result<AgentContent> {
    ctx.validate()?;
    let mut ctx = ctx.clone();
    if ctx.learning_objectives.is_empty() {
        ctx.learning_objectives = kind.default_objectives(&ctx.topic, &ctx.grades);
    }

    let user = agent_prompt(kind, &ctx, topic_text, params, opts.max_topic_chars);
    let raw = call(generator, kind.system(), &user, opts.timeout).await?;

    match reply_json(&raw) {
        Some(content) => Ok(AgentContent { kind, content, parsed: true }),
        None if raw.trim().is_empty() => Err(PlannerError::InvalidModelOutput { prefix: String::new() }),
        None => {
            warn!("{}: reply was not JSON, keeping raw text", kind.id());
            Ok(AgentContent { kind, content: Value::from(raw.trim()), parsed: false })
        }
    }
}

pub fn content_path(topic_path: &str, kind: AgentKind) -> String {
    format!("{}/{}/{}", topic_path, CONTENT_COLLECTION, kind.id())
}

/// Replace the stored output of `content.kind` for one topic.
pub fn save_content(conn: &Connection, topic_path: &str, content: &AgentContent, model: &str) -> Result<()> {
    let fields = db::object(json!({
        "agent": content.kind.id(),
        "content": content.content,
        "parsed": content.parsed,
        "model": model,
        "generated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }));
    db::set_document(conn, &content_path(topic_path, content.kind), &fields, false)?;
    info!("saved {} for {}", content.kind.id(), topic_path);
    Ok(())
}

/// Everything generated for one topic, keyed by agent id.
pub fn load_content(conn: &Connection, topic_path: &str) -> Result<Vec<(String, Fields)>> {
    db::stream_children(conn, &format!("{}/{}", topic_path, CONTENT_COLLECTION))
}

const COURSE_PLAN_LAYOUT: &str = r#"{
    "lesson_title": "string",
    "total_duration": "integer (minutes)",
    "grade_groupings": [
        {"grade": "string", "group_size": "integer", "specific_objectives": ["string"], "materials": ["string"]}
    ],
    "timeline": [
        {
            "time_slot": "string (e.g., 0-10 min)",
            "activity": "string",
            "grade_1_task": "string",
            "grade_2_task": "string",
            "grade_3_task": "string",
            "grade_4_task": "string",
            "teacher_role": "string",
            "transitions": "string"
        }
    ],
    "assessment_checkpoints": [
        {"time": "string", "grade": "string", "assessment_type": "string", "success_criteria": "string"}
    ],
    "classroom_management": {
        "setup": "string",
        "behavior_strategies": ["string"],
        "attention_signals": ["string"]
    },
    "differentiation_strategies": {
        "support_students": ["string"],
        "advanced_students": ["string"],
        "english_learners": ["string"]
    },
    "homework_assignments": [
        {"grade": "string", "task": "string", "estimated_time": "integer (minutes)"}
    ]
}"#;

const ACTIVITY_LAYOUT: &str = r#"{
    "activity_title": "string",
    "activity_type": "string (individual/group/whole-class/stations)",
    "estimated_duration": "integer (minutes)",
    "materials_needed": ["string"],
    "setup_instructions": "string",
    "grade_adaptations": [
        {
            "grade": "string",
            "instructions": "string",
            "examples": ["string"],
            "success_criteria": ["string"],
            "extension_activities": ["string"]
        }
    ],
    "step_by_step_process": [
        {"step": "integer", "instruction": "string", "time_estimate": "integer (minutes)", "teacher_notes": "string"}
    ],
    "assessment_rubric": [
        {"criteria": "string", "beginner": "string", "developing": "string", "proficient": "string", "advanced": "string"}
    ],
    "variations": [
        {"variation_name": "string", "description": "string", "suitable_for": ["string"]}
    ]
}"#;

const WORKSHEET_LAYOUT: &str = r#"{
    "worksheet_title": "string",
    "subject": "string",
    "topic": "string",
    "grade_levels": ["string"],
    "instructions": {
        "teacher_notes": "string",
        "student_instructions": "string",
        "time_estimate": "integer (minutes)"
    },
    "sections": [
        {
            "section_title": "string",
            "difficulty_level": "string (beginner/intermediate/advanced)",
            "grade_target": "string",
            "questions": [
                {
                    "question_number": "integer",
                    "question_text": "string",
                    "question_type": "string (multiple_choice/fill_blank/short_answer/drawing/matching)",
                    "options": ["string"] or null,
                    "correct_answer": "string",
                    "explanation": "string",
                    "points": "integer"
                }
            ]
        }
    ],
    "answer_key": {
        "section_answers": [
            {"section": "string", "answers": ["string"], "explanations": ["string"]}
        ]
    },
    "extension_activities": [
        {"activity": "string", "suitable_for": "string (grade level)", "materials_needed": ["string"]}
    ]
}"#;

const ASSESSMENT_LAYOUT: &str = r#"{
    "assessment_title": "string",
    "assessment_type": "string (formative/summative/diagnostic)",
    "duration": "integer (minutes)",
    "grade_adaptations": [
        {"grade": "string", "assessment_method": "string", "success_criteria": ["string"], "accommodations": ["string"]}
    ],
    "assessment_components": [
        {
            "component_name": "string",
            "weight_percentage": "integer",
            "description": "string",
            "grade_specific_tasks": [
                {
                    "grade": "string",
                    "task": "string",
                    "scoring_rubric": {
                        "excellent": "string",
                        "good": "string",
                        "satisfactory": "string",
                        "needs_improvement": "string"
                    }
                }
            ]
        }
    ],
    "formative_checks": [
        {"checkpoint": "string", "method": "string", "frequency": "string", "feedback_strategy": "string"}
    ],
    "data_collection": {
        "observation_checklist": ["string"],
        "portfolio_items": ["string"],
        "self_assessment_tools": ["string"]
    }
}"#;

const VISUAL_AID_LAYOUT: &str = r#"{
    "visual_aid_title": "string",
    "aid_type": "string (poster/chart/diagram/interactive_board/manipulatives)",
    "materials_needed": ["string"],
    "size_specifications": "string",
    "content_description": {
        "main_visual": "string (detailed description)",
        "text_elements": ["string"],
        "color_scheme": "string",
        "layout_description": "string"
    },
    "grade_specific_elements": [
        {"grade": "string", "visual_focus": "string", "interaction_method": "string", "learning_support": "string"}
    ],
    "usage_instructions": {
        "setup": "string",
        "introduction_script": "string",
        "interaction_activities": ["string"],
        "maintenance_tips": ["string"]
    },
    "digital_alternatives": [
        {"platform": "string", "description": "string", "accessibility_features": ["string"]}
    ]
}"#;

const PEER_ACTIVITY_LAYOUT: &str = r#"{
    "activity_title": "string",
    "collaboration_type": "string (buddy_system/mixed_groups/mentoring/stations)",
    "duration": "integer (minutes)",
    "grouping_strategy": {
        "group_size": "integer",
        "grade_mixing": "string",
        "pairing_criteria": ["string"],
        "rotation_schedule": "string"
    },
    "role_definitions": [
        {"role_name": "string", "suitable_grades": ["string"], "responsibilities": ["string"], "skills_developed": ["string"]}
    ],
    "activity_stations": [
        {
            "station_name": "string",
            "learning_objective": "string",
            "materials": ["string"],
            "instructions": {
                "mentor_guide": "string",
                "learner_tasks": "string",
                "collaboration_prompts": ["string"]
            },
            "time_allocation": "integer (minutes)"
        }
    ],
    "assessment_strategies": {
        "peer_feedback_forms": ["string"],
        "self_reflection_prompts": ["string"],
        "teacher_observation_points": ["string"]
    },
    "differentiation": {
        "support_strategies": ["string"],
        "challenge_extensions": ["string"],
        "inclusion_accommodations": ["string"]
    }
}"#;
