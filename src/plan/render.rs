use std::fmt::Write as _;

use super::schema::{Step, Task, TeachingPlan};

const DEFAULT_TITLE: &str = "Teaching Plan";

/// Markdown rendering of a plan for teachers. Every section is always
/// present; missing data leaves it empty.
pub fn render_markdown(plan: &TeachingPlan) -> String {
    let mut out: Vec<String> = Vec::new();

    let title = plan.title.as_deref().filter(|t| !t.trim().is_empty()).unwrap_or(DEFAULT_TITLE);
    out.push(format!("# {}", title));
    let duration = plan
        .estimated_duration_min
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".into());
    out.push(format!("**Estimated Duration:** {} minutes\n", duration));

    section(&mut out, "## Learning Objectives", &plan.learning_objectives);
    section(&mut out, "## Prerequisites", &plan.prerequisites);
    section(&mut out, "## Key Vocabulary", &plan.key_vocabulary);
    section(&mut out, "## Materials Needed", &plan.materials_needed);

    out.push("## Engagement & Warmup".into());
    out.extend(plan.engage_warmup.iter().map(step_line));
    out.push("\n## Explicit Instruction".into());
    out.extend(plan.explicit_instruction.iter().map(step_line));
    out.push("\n## Guided Practice".into());
    out.extend(plan.guided_practice.iter().map(step_line));

    out.push("\n## Independent Practice".into());
    for task in &plan.independent_practice {
        match task {
            Task::Detailed { task, success_criteria } => {
                out.push(format!("- **Task:** {}", task));
                if !success_criteria.is_empty() {
                    out.push("  - **Success criteria:**".into());
                    out.extend(success_criteria.iter().map(|c| format!("    - {}", c)));
                }
            }
            Task::Plain(t) => out.push(format!("- {}", t)),
        }
    }

    out.push("\n## Differentiation".into());
    section(&mut out, "### Support", &plan.differentiation.support);
    section(&mut out, "### Challenge", &plan.differentiation.challenge);

    out.push("## Assessment".into());
    section(&mut out, "### Formative Checks", &plan.assessment.formative_checks);
    out.push(format!(
        "### Exit Ticket\n{}\n",
        plan.assessment.exit_ticket.as_deref().unwrap_or("")
    ));
    section(&mut out, "### Rubric Points", &plan.assessment.rubric_points);

    section(&mut out, "## Common Misconceptions & Fixes", &plan.misconceptions_and_fixes);
    section(&mut out, "## Blackboard Notes", &plan.blackboard_notes);
    section(&mut out, "## Home Connection", &plan.home_connection);
    section(&mut out, "## Teacher Tips", &plan.teacher_tips);

    out.join("\n")
}

fn section(out: &mut Vec<String>, heading: &str, items: &[String]) {
    out.push(heading.to_string());
    out.push(bullets(items));
}

fn bullets(items: &[String]) -> String {
    let mut s = String::new();
    for it in items {
        let _ = writeln!(s, "- {}", it);
    }
    s
}

fn step_line(step: &Step) -> String {
    match step {
        Step::Numbered { step: Some(n), instruction } => format!("- **Step {}:** {}", n, instruction),
        Step::Numbered { step: None, instruction } => format!("- **Step:** {}", instruction),
        Step::Plain(s) => format!("- {}", s),
    }
}
