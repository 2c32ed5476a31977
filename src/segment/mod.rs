pub mod accumulator;
pub mod emitter;
pub mod headers;

use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use tracing::{info, warn};

use accumulator::Page;
use emitter::{PageWriter, TopicRecord};
use headers::HeaderMatch;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to `_`. Case is kept.
pub fn slugify(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), "_").to_string()
}

/// Pass 1: header detection per page. Pages are independent here.
pub fn classify_pages(pages: &[Page]) -> Vec<Option<HeaderMatch>> {
    pages
        .par_iter()
        .map(|p| headers::match_header(&p.text))
        .collect()
}

pub struct SplitOutcome {
    pub records: Vec<TopicRecord>,
    /// Filenames of topics dropped because their pages failed to serialize.
    pub skipped: Vec<String>,
}

/// Split a chapter's page texts into topic records.
///
/// `texts[i]` is the text of page `i`; `writer` produces the per-topic
/// document from the same page indices.
pub fn split_topics(texts: Vec<String>, writer: &dyn PageWriter) -> SplitOutcome {
    let pages: Vec<Page> = texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Page { index, text })
        .collect();

    let page_total = pages.len();
    let headers = classify_pages(&pages);
    let spans = accumulator::segment(&pages, &headers);

    let mut records = Vec::with_capacity(spans.len());
    let mut skipped = Vec::new();
    for span in spans {
        let filename = emitter::topic_filename(span.count, &span.slug);
        match emitter::emit(span, writer) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping topic {}: {}", filename, e);
                skipped.push(filename);
            }
        }
    }

    info!("Split {} pages into {} topics ({} skipped)", page_total, records.len(), skipped.len());
    SplitOutcome { records, skipped }
}
