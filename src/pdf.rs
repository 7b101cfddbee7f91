//! PDF document access behind swappable seams
//!
//! Passes read page text and split page ranges through [`DocumentSource`]
//! so the pipeline can be exercised with synthetic documents in tests. The
//! production implementation is backed by lopdf.

use crate::error::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// One loaded source document
pub trait DocumentSource: Send + Sync {
    /// Number of pages in the document
    fn page_count(&self) -> usize;

    /// Extract the text layer of a page (1-based). Pages without a text
    /// layer yield an empty string.
    fn page_text(&self, page: usize) -> Result<String>;

    /// Write the inclusive 1-based page range into a standalone document
    /// at `dest`, returning the bytes written.
    fn write_page_range(&self, page_start: usize, page_end: usize, dest: &Path) -> Result<u64>;
}

/// Factory that opens documents from disk
pub trait DocumentOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSource>>;
}

/// lopdf-backed document
pub struct LopdfDocument {
    doc: lopdf::Document,
    pages: BTreeMap<u32, lopdf::ObjectId>,
}

impl LopdfDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let doc = lopdf::Document::load(path)?;
        let pages = doc.get_pages();
        debug!("loaded {} ({} pages)", path.display(), pages.len());
        Ok(Self { doc, pages })
    }
}

impl DocumentSource for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String> {
        if page == 0 || page > self.pages.len() {
            return Ok(String::new());
        }
        match self.doc.extract_text(&[page as u32]) {
            Ok(text) => Ok(text),
            Err(e) => {
                // Scanned or image-only pages routinely have no text layer
                warn!("no text layer on page {}: {}", page, e);
                Ok(String::new())
            }
        }
    }

    fn write_page_range(&self, page_start: usize, page_end: usize, dest: &Path) -> Result<u64> {
        let mut part = self.doc.clone();
        let to_delete: Vec<u32> = self
            .pages
            .keys()
            .copied()
            .filter(|p| (*p as usize) < page_start || (*p as usize) > page_end)
            .collect();
        if !to_delete.is_empty() {
            part.delete_pages(&to_delete);
        }
        part.prune_objects();
        part.renumber_objects();
        part.save(dest)?;
        Ok(std::fs::metadata(dest)?.len())
    }
}

/// Opener that loads PDFs with lopdf
#[derive(Debug, Default, Clone)]
pub struct LopdfOpener;

impl DocumentOpener for LopdfOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSource>> {
        Ok(Box::new(LopdfDocument::load(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A synthetic document; the production opener is exercised against
    // real PDFs in integration environments.
    struct FixedDocument {
        pages: Vec<String>,
    }

    impl DocumentSource for FixedDocument {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn page_text(&self, page: usize) -> Result<String> {
            Ok(self
                .pages
                .get(page.saturating_sub(1))
                .cloned()
                .unwrap_or_default())
        }

        fn write_page_range(
            &self,
            page_start: usize,
            page_end: usize,
            dest: &Path,
        ) -> Result<u64> {
            let body = self.pages[page_start - 1..page_end].join("\n");
            std::fs::write(dest, &body)?;
            Ok(body.len() as u64)
        }
    }

    #[test]
    fn test_document_source_contract() {
        let doc = FixedDocument {
            pages: vec!["one".into(), "two".into(), "three".into()],
        };
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page_text(2).unwrap(), "two");
        assert_eq!(doc.page_text(9).unwrap(), "");

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("part.pdf");
        let written = doc.write_page_range(1, 2, &dest).unwrap();
        assert!(written > 0);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "one\ntwo");
    }
}
