use serde::{Deserialize, Serialize};

/// Structured teaching plan as requested from the model.
///
/// Every field is optional on the wire. Absent keys, `null`s and values of
/// an unexpected shape all land as an empty value or as plain text, so any
/// JSON object the model returns becomes a plan the renderer can print.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeachingPlan {
    #[serde(deserialize_with = "loose::opt_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "loose::or_default")]
    pub estimated_duration_min: Option<Duration>,
    #[serde(deserialize_with = "loose::list")]
    pub learning_objectives: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub prerequisites: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub key_vocabulary: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub materials_needed: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub engage_warmup: Vec<Step>,
    #[serde(deserialize_with = "loose::list")]
    pub explicit_instruction: Vec<Step>,
    #[serde(deserialize_with = "loose::list")]
    pub guided_practice: Vec<Step>,
    #[serde(deserialize_with = "loose::list")]
    pub independent_practice: Vec<Task>,
    #[serde(deserialize_with = "loose::or_default")]
    pub differentiation: Differentiation,
    #[serde(deserialize_with = "loose::or_default")]
    pub assessment: Assessment,
    #[serde(deserialize_with = "loose::list")]
    pub misconceptions_and_fixes: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub blackboard_notes: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub home_connection: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub teacher_tips: Vec<String>,
}

/// Models answer `45`, `42.5` or `"40-45"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Duration {
    Minutes(u32),
    Decimal(f64),
    Text(String),
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Duration::Minutes(m) => write!(f, "{}", m),
            Duration::Decimal(m) => write!(f, "{}", m),
            Duration::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Numbered {
        #[serde(default, deserialize_with = "loose::or_default")]
        step: Option<StepNumber>,
        #[serde(deserialize_with = "loose::string")]
        instruction: String,
    },
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepNumber {
    Number(u32),
    Label(String),
}

impl std::fmt::Display for StepNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepNumber::Number(n) => write!(f, "{}", n),
            StepNumber::Label(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Task {
    Detailed {
        #[serde(deserialize_with = "loose::string")]
        task: String,
        #[serde(default, deserialize_with = "loose::list")]
        success_criteria: Vec<String>,
    },
    Plain(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Differentiation {
    #[serde(deserialize_with = "loose::list")]
    pub support: Vec<String>,
    #[serde(deserialize_with = "loose::list")]
    pub challenge: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assessment {
    #[serde(deserialize_with = "loose::list")]
    pub formative_checks: Vec<String>,
    #[serde(deserialize_with = "loose::opt_text")]
    pub exit_ticket: Option<String>,
    #[serde(deserialize_with = "loose::list")]
    pub rubric_points: Vec<String>,
}

impl loose::FromText for String {
    fn from_text(text: String) -> Self {
        text
    }
}

impl loose::FromText for Step {
    fn from_text(text: String) -> Self {
        Step::Plain(text)
    }
}

impl loose::FromText for Task {
    fn from_text(text: String) -> Self {
        Task::Plain(text)
    }
}

/// Field deserializers that never fail: they read any JSON value and fall
/// back to text or the empty value.
mod loose {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub(super) trait FromText: DeserializeOwned {
        fn from_text(text: String) -> Self;
    }

    /// Flatten a value to one line: arrays join with `; `, object values
    /// join with ` - ` in key order, nulls vanish.
    pub(super) fn text(value: &Value) -> String {
        let join = |parts: Vec<String>, sep: &str| {
            parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(sep)
        };
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => join(items.iter().map(text).collect(), "; "),
            Value::Object(map) => join(map.values().map(text).collect(), " - "),
            other => other.to_string(),
        }
    }

    /// A list of `T`. `null` is empty, a lone value is a one-item list, and
    /// items that do not fit `T` are kept as their text.
    pub(super) fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromText,
    {
        let items = match Value::deserialize(d)? {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        };
        Ok(items
            .into_iter()
            .filter_map(|v| {
                let fallback = text(&v);
                match serde_json::from_value::<T>(v) {
                    Ok(item) => Some(item),
                    Err(_) if fallback.is_empty() => None,
                    Err(_) => Some(T::from_text(fallback)),
                }
            })
            .collect())
    }

    pub(super) fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(text(&Value::deserialize(d)?))
    }

    pub(super) fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let t = string(d)?;
        Ok((!t.is_empty()).then_some(t))
    }

    pub(super) fn or_default<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(serde_json::from_value(Value::deserialize(d)?).unwrap_or_default())
    }
}
