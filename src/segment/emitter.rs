use super::accumulator::TopicSpan;
use crate::error::{PlannerError, Result};

const TOPIC_EXTENSION: &str = "pdf";

/// Builds a standalone document from a subset of the source pages.
pub trait PageWriter {
    fn write_pages(&self, pages: &[usize]) -> Result<Vec<u8>>;
}

/// A finished topic: its page-range document plus the text that was on it.
#[derive(Debug, Clone)]
pub struct TopicRecord {
    pub filename: String,
    pub document: Vec<u8>,
    pub text: String,
    pub pages: Vec<usize>,
}

impl TopicRecord {
    /// Filename without the extension, used as the stored topic title.
    pub fn title(&self) -> &str {
        self.filename
            .strip_suffix(&format!(".{}", TOPIC_EXTENSION))
            .unwrap_or(&self.filename)
    }
}

pub fn topic_filename(count: u32, slug: &str) -> String {
    format!("{:02}_{}.{}", count, slug, TOPIC_EXTENSION)
}

/// Turn a closed span into a record. Nothing is returned unless the whole
/// page range serialized.
pub fn emit(span: TopicSpan, writer: &dyn PageWriter) -> Result<TopicRecord> {
    let filename = topic_filename(span.count, &span.slug);
    let document = writer.write_pages(&span.pages).map_err(|e| match e {
        PlannerError::Serialization { reason, .. } => PlannerError::Serialization {
            filename: filename.clone(),
            reason,
        },
        other => other,
    })?;
    let text = span.texts.join("\n").trim().to_string();

    Ok(TopicRecord {
        filename,
        document,
        text,
        pages: span.pages,
    })
}
