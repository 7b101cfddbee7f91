//! External PDF-extractor contract
//!
//! The layout-aware extractor is an external collaborator; the pipeline
//! only depends on this partitioning seam. Pass C asks for title-based
//! chunking and falls back to text-layer extraction when no partitioner
//! is wired or the call fails.

use crate::chunk::Coordinates;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Options forwarded to the extractor's title-based chunker
#[derive(Debug, Clone)]
pub struct PartitionOptions {
    pub max_characters: usize,
    pub new_after_n_chars: usize,
    pub combine_text_under_n_chars: usize,
    pub infer_table_structure: bool,
    pub include_page_breaks: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            max_characters: 2000,
            new_after_n_chars: 1500,
            combine_text_under_n_chars: 500,
            infer_table_structure: true,
            include_page_breaks: true,
        }
    }
}

/// One extracted element, already combined by the title-based chunker
#[derive(Debug, Clone)]
pub struct PartitionedElement {
    /// Extractor category, e.g. "NarrativeText" or "Table"
    pub category: String,
    pub text: String,
    pub page_number: Option<usize>,
    pub coordinates: Option<Coordinates>,
}

/// Section-aware document partitioner
#[async_trait]
pub trait Partitioner: Send + Sync {
    /// Short name recorded as the extraction method in chunk metadata
    fn name(&self) -> &str;

    /// Partition a document into section-aware elements
    async fn partition(
        &self,
        file: &Path,
        options: &PartitionOptions,
    ) -> Result<Vec<PartitionedElement>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_match_extractor_contract() {
        let options = PartitionOptions::default();
        assert_eq!(options.max_characters, 2000);
        assert_eq!(options.new_after_n_chars, 1500);
        assert_eq!(options.combine_text_under_n_chars, 500);
        assert!(options.infer_table_structure);
        assert!(options.include_page_breaks);
    }
}
