use tracing::debug;

use super::headers::{Boundary, HeaderMatch};
use super::slugify;

/// One page as the fold sees it: its position and extracted text.
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub text: String,
}

/// A closed topic, ready for the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpan {
    pub count: u32,
    pub slug: String,
    pub pages: Vec<usize>,
    pub texts: Vec<String>,
}

/// Scan state for a single pass over a chapter.
///
/// `pages` and `texts` always describe the same open topic: both are
/// appended in the same step and taken together on flush.
#[derive(Debug, Default)]
pub struct TopicAccumulator {
    current_topic: Option<String>,
    topic_count: u32,
    pages: Vec<usize>,
    texts: Vec<String>,
}

impl TopicAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn topic_count(&self) -> u32 {
        self.topic_count
    }

    /// Feed one page. Returns the previous topic if this page starts a new one.
    pub fn step(&mut self, page: &Page, header: Option<&HeaderMatch>) -> Option<TopicSpan> {
        let mut closed = None;

        // Continuation markers merge into the open topic, or are plain text
        // when nothing is open yet. Either way they never close a topic.
        if let Some(m) = header.filter(|m| m.boundary() == Boundary::Starter) {
            closed = self.flush();
            self.current_topic = Some(slugify(&m.phrase));
            self.topic_count += 1;
        }

        // The header page belongs to the topic it opens.
        self.pages.push(page.index);
        let text = page.text.trim();
        if !text.is_empty() {
            self.texts.push(text.to_string());
        }

        closed
    }

    /// Close the last open topic after the final page.
    pub fn finish(mut self) -> Option<TopicSpan> {
        self.flush()
    }

    fn flush(&mut self) -> Option<TopicSpan> {
        let slug = self.current_topic.as_ref()?;
        if self.pages.is_empty() {
            return None;
        }
        Some(TopicSpan {
            count: self.topic_count,
            slug: slug.clone(),
            pages: std::mem::take(&mut self.pages),
            texts: std::mem::take(&mut self.texts),
        })
    }
}

/// Fold an ordered page sequence into topic spans.
///
/// `headers[i]` is the header match for `pages[i]`; pass 1 (classification)
/// may run in parallel, this pass must not.
pub fn segment(pages: &[Page], headers: &[Option<HeaderMatch>]) -> Vec<TopicSpan> {
    let mut acc = TopicAccumulator::new();
    let mut spans = Vec::new();

    for (page, header) in pages.iter().zip(headers) {
        if let Some(span) = acc.step(page, header.as_ref()) {
            spans.push(span);
        }
        if let Some(m) = header {
            debug!(
                page = page.index,
                phrase = %m.phrase,
                boundary = ?m.boundary(),
                topic = ?acc.current_topic(),
                count = acc.topic_count(),
                "header"
            );
        }
    }

    if let Some(span) = acc.finish() {
        spans.push(span);
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::headers::match_header;

    fn pages(texts: &[&str]) -> Vec<Page> {
        texts
            .iter()
            .enumerate()
            .map(|(index, t)| Page {
                index,
                text: t.to_string(),
            })
            .collect()
    }

    fn run(texts: &[&str]) -> Vec<TopicSpan> {
        let pages = pages(texts);
        let headers: Vec<_> = pages.iter().map(|p| match_header(&p.text)).collect();
        segment(&pages, &headers)
    }

    #[test]
    fn one_topic_per_starter_page() {
        let spans = run(&["Two Little Hands", "Parts of the Body", "Let us Play", "Odd One Out"]);
        assert_eq!(spans.len(), 4);
        for (i, s) in spans.iter().enumerate() {
            assert_eq!(s.pages, vec![i]);
            assert_eq!(s.count, i as u32 + 1);
        }
    }

    #[test]
    fn continuation_merges_into_open_topic() {
        let spans = run(&["Let us Read", "New words\ncat hat", "Alphabet song"]);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].pages, vec![0, 1]);
        assert_eq!(spans[1].pages, vec![2]);
        assert_eq!(spans[1].count, 2);
    }

    #[test]
    fn last_topic_flushed_after_loop() {
        let spans = run(&["Picture Time", "a plain page"]);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].pages, vec![0, 1]);
        assert_eq!(spans[0].slug, "Picture_Time");
    }

    #[test]
    fn no_starters_no_topics() {
        assert!(run(&["intro", "more intro", ""]).is_empty());
        assert!(run(&[]).is_empty());
    }

    #[test]
    fn continuation_without_open_topic_is_plain() {
        let spans = run(&["Sight words", "Letter sounds", "body"]);
        assert_eq!(spans.len(), 1);
        // Page 0 stayed in the unnamed buffer and rides along with topic 1.
        assert_eq!(spans[0].pages, vec![0, 1, 2]);
        assert_eq!(spans[0].slug, "Letter_sounds");
        assert_eq!(spans[0].count, 1);
    }

    #[test]
    fn leading_pages_join_first_topic() {
        let spans = run(&["cover page", "Let us Draw", "Two Little Hands"]);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].pages, vec![0, 1]);
        assert_eq!(spans[1].pages, vec![2]);
    }

    #[test]
    fn starter_on_first_page_has_no_empty_record() {
        let spans = run(&["Let us Sing"]);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].count, 1);
    }

    #[test]
    fn blank_texts_skipped_but_pages_kept() {
        let spans = run(&["Let us Sing\n", "   ", "  la la  "]);
        assert_eq!(spans[0].pages, vec![0, 1, 2]);
        assert_eq!(spans[0].texts, vec!["Let us Sing".to_string(), "la la".to_string()]);
    }

    #[test]
    fn count_only_moves_on_starters() {
        let mut acc = TopicAccumulator::new();
        let p = |i: usize, t: &str| Page { index: i, text: t.into() };
        assert!(acc.step(&p(0, "Let us Sing"), match_header("Let us Sing").as_ref()).is_none());
        assert!(acc.step(&p(1, "Sight words"), match_header("Sight words").as_ref()).is_none());
        assert_eq!(acc.topic_count(), 1);
        assert_eq!(acc.current_topic(), Some("Let_us_Sing"));
        let closed = acc.step(&p(2, "Picture Talk"), match_header("Picture Talk").as_ref());
        assert_eq!(closed.unwrap().pages, vec![0, 1]);
        assert_eq!(acc.topic_count(), 2);
    }

    #[test]
    fn chapter_walkthrough() {
        let spans = run(&[
            "Let us Sing\n...",
            "some body text",
            "Sight words\n...",
            "Parts of the Body\n...",
        ]);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].slug, "Let_us_Sing");
        assert_eq!(spans[0].pages, vec![0, 1, 2]);
        assert_eq!(spans[1].slug, "Parts_of_the_Body");
        assert_eq!(spans[1].pages, vec![3]);
    }
}
