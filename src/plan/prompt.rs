use super::PlanContext;

pub const SYSTEM_PROMPT: &str = "You are an expert K-12 lesson designer who creates concise, \
classroom-ready teaching plans. Output should be practical, specific, and age-appropriate. \
Avoid fluff.";

/// Appended to the user prompt when the first answer could not be parsed.
pub const RETRY_SUFFIX: &str =
    "\n\nYour previous output was not valid JSON. Return ONLY valid JSON now, no explanations.";

const SCHEMA: &str = r#"{
  "title": string,
  "estimated_duration_min": integer,
  "learning_objectives": [string, ...],
  "prerequisites": [string, ...],
  "key_vocabulary": [string, ...],
  "materials_needed": [string, ...],
  "engage_warmup": [{"step": integer, "instruction": string}],
  "explicit_instruction": [{"step": integer, "instruction": string}],
  "guided_practice": [{"step": integer, "instruction": string}],
  "independent_practice": [{"task": string, "success_criteria": [string, ...]}],
  "differentiation": {
      "support": [string, ...],
      "challenge": [string, ...]
  },
  "assessment": {
      "formative_checks": [string, ...],
      "exit_ticket": string,
      "rubric_points": [string, ...]
  },
  "misconceptions_and_fixes": [string, ...],
  "blackboard_notes": [string, ...],
  "home_connection": [string, ...],
  "teacher_tips": [string, ...]
}"#;

const CONSTRAINTS: &str = "Constraints:
- Keep it focused on THIS topic only.
- If the text is mostly sight words/new words, tailor for phonics/recognition games.
- If it's picture talk/time, emphasize observation, questioning, and speaking.
- Keep steps actionable; avoid long paragraphs.
- Produce VALID JSON only.";

/// User prompt for one topic. Text beyond `max_chars` characters is dropped.
pub fn user_prompt(ctx: &PlanContext, topic_text: &str, max_chars: usize) -> String {
    format!(
        "You will receive the topic text extracted from a textbook chapter.\n\n\
         Return a STRUCTURED plan as compact JSON (no Markdown fences) with the keys below:\n\n\
         {schema}\n\n\
         {constraints}\n\n\
         CONTEXT:\n\
         Class: {class}\n\
         Subject: {subject}\n\
         Chapter: {chapter}\n\
         Topic title (from filename): {title}\n\n\
         TOPIC TEXT:\n\
         \"\"\"{text}\"\"\"\n",
        schema = SCHEMA,
        constraints = CONSTRAINTS,
        class = ctx.class_name,
        subject = ctx.subject,
        chapter = ctx.chapter,
        title = ctx.topic_title,
        text = truncate_chars(topic_text, max_chars),
    )
}

pub fn retry_prompt(user_prompt: &str) -> String {
    format!("{}{}", user_prompt, RETRY_SUFFIX)
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PlanContext {
        PlanContext {
            class_name: "Class 1".into(),
            subject: "English".into(),
            chapter: "My Body".into(),
            topic_title: "01_Let_us_Sing".into(),
        }
    }

    #[test]
    fn fills_context() {
        let p = user_prompt(&ctx(), "Head and shoulders", 12000);
        assert!(p.contains("Class: Class 1\n"));
        assert!(p.contains("Subject: English\n"));
        assert!(p.contains("Chapter: My Body\n"));
        assert!(p.contains("Topic title (from filename): 01_Let_us_Sing\n"));
        assert!(p.contains("\"\"\"Head and shoulders\"\"\""));
        assert!(p.contains("\"exit_ticket\": string"));
    }

    #[test]
    fn truncates_by_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");

        let long = "x".repeat(20);
        let p = user_prompt(&ctx(), &long, 5);
        assert!(p.contains("\"\"\"xxxxx\"\"\""));
        assert!(!p.contains("xxxxxx"));
    }

    #[test]
    fn retry_appends_suffix() {
        let r = retry_prompt("base");
        assert!(r.starts_with("base\n\n"));
        assert!(r.ends_with("no explanations."));
    }
}
