//! Chapter PDFs: page text for the splitter and page-range documents for
//! each emitted topic.
//!
//! Text comes from [`pdf_extract`] when it can read the whole file, with a
//! per-page [`lopdf`] fallback. `pdf_extract` can panic on malformed input,
//! so that call runs behind [`std::panic::catch_unwind`].

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use lopdf::Document;
use tracing::{debug, warn};

use crate::error::{PlannerError, Result};
use crate::segment::emitter::PageWriter;

pub struct SourcePdf {
    bytes: Vec<u8>,
    doc: Document,
}

impl SourcePdf {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let doc = Document::load_mem(&bytes).map_err(|e| PlannerError::Pdf(e.to_string()))?;
        Ok(Self { bytes, doc })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Text of every page, in page order. Pages that cannot be read come
    /// back empty.
    pub fn page_texts(&self) -> Vec<String> {
        match extract_with_pdf_extract(&self.bytes) {
            Ok(pages) if pages.len() == self.page_count() => pages,
            Ok(pages) => {
                warn!(
                    "pdf-extract returned {} pages, document has {}; using lopdf",
                    pages.len(),
                    self.page_count()
                );
                self.extract_with_lopdf()
            }
            Err(e) => {
                warn!("{}; using lopdf", e);
                self.extract_with_lopdf()
            }
        }
    }

    fn extract_with_lopdf(&self) -> Vec<String> {
        self.doc
            .get_pages()
            .keys()
            .enumerate()
            .map(|(index, number)| match self.page_text(index, *number) {
                Ok(text) => text,
                Err(e) => {
                    warn!("{}", e);
                    String::new()
                }
            })
            .collect()
    }

    fn page_text(&self, index: usize, number: u32) -> Result<String> {
        self.doc
            .extract_text(&[number])
            .map_err(|e| PlannerError::Extraction {
                page: index,
                reason: e.to_string(),
            })
    }
}

fn extract_with_pdf_extract(bytes: &[u8]) -> Result<Vec<String>> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(PlannerError::Pdf(format!("pdf-extract failed: {}", e))),
        Err(_) => Err(PlannerError::Pdf("pdf-extract panicked (malformed document)".into())),
    }
}

impl PageWriter for SourcePdf {
    /// Copy of the source with every page outside `pages` removed.
    fn write_pages(&self, pages: &[usize]) -> Result<Vec<u8>> {
        let numbers: Vec<u32> = self.doc.get_pages().keys().copied().collect();
        let serialization = |reason: String| PlannerError::Serialization {
            filename: String::new(),
            reason,
        };

        let mut keep = HashSet::new();
        for &index in pages {
            let number = numbers
                .get(index)
                .ok_or_else(|| serialization(format!("page {} out of range ({} pages)", index, numbers.len())))?;
            keep.insert(*number);
        }
        if keep.is_empty() {
            return Err(serialization("empty page range".into()));
        }

        let drop: Vec<u32> = numbers.iter().copied().filter(|n| !keep.contains(n)).collect();
        let mut doc = self.doc.clone();
        doc.delete_pages(&drop);
        doc.prune_objects();
        doc.renumber_objects();
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out).map_err(|e| serialization(e.to_string()))?;
        debug!(pages = keep.len(), bytes = out.len(), "wrote page range");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object};

    /// A document with `n` empty pages.
    fn blank_pdf(n: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..n)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => n as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn counts_pages() {
        let pdf = SourcePdf::from_bytes(blank_pdf(4)).unwrap();
        assert_eq!(pdf.page_count(), 4);
    }

    #[test]
    fn texts_line_up_with_pages() {
        let pdf = SourcePdf::from_bytes(blank_pdf(3)).unwrap();
        assert_eq!(pdf.page_texts().len(), 3);
    }

    #[test]
    fn writes_only_requested_pages() {
        let pdf = SourcePdf::from_bytes(blank_pdf(5)).unwrap();
        let bytes = pdf.write_pages(&[1, 2, 3]).unwrap();
        let out = Document::load_mem(&bytes).unwrap();
        assert_eq!(out.get_pages().len(), 3);
    }

    #[test]
    fn out_of_range_page_fails() {
        let pdf = SourcePdf::from_bytes(blank_pdf(2)).unwrap();
        assert!(matches!(
            pdf.write_pages(&[0, 7]),
            Err(PlannerError::Serialization { .. })
        ));
        assert!(matches!(pdf.write_pages(&[]), Err(PlannerError::Serialization { .. })));
    }

    #[test]
    fn not_a_pdf() {
        assert!(matches!(
            SourcePdf::from_bytes(b"hello".to_vec()),
            Err(PlannerError::Pdf(_))
        ));
    }
}
