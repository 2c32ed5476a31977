use std::time::Duration;

/// Errors raised by the splitting, storage and planning stages.
///
/// The CLI wraps these in `anyhow` at the command boundary; batch loops
/// match on them to decide whether an item is skipped or the run aborts.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// A page produced no text. Callers degrade this to an empty page.
    #[error("page {page}: text extraction failed: {reason}")]
    Extraction { page: usize, reason: String },

    /// A topic's page range could not be written out.
    #[error("{filename}: cannot serialize page range: {reason}")]
    Serialization { filename: String, reason: String },

    /// The model never returned a parseable plan, even after the retry.
    #[error("model did not return valid JSON after retry. Raw response: {prefix}")]
    InvalidModelOutput { prefix: String },

    /// The text generator could not be reached or answered with an error.
    /// The classroom description given for content generation is incomplete.
    #[error("invalid teaching context: {0}")]
    InvalidContext(String),

    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("document store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The source file is not a readable PDF.
    #[error("pdf: {0}")]
    Pdf(String),

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
