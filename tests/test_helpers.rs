//! Shared fixtures for integration tests: synthetic documents, a stub
//! partitioner, and a pipeline context wired to the in-memory backends.

#![allow(dead_code)]

use async_trait::async_trait;
use loreforge::config::{EnvName, IngestConfig};
use loreforge::context::PipelineContext;
use loreforge::dictionary::MemoryDictionaryStore;
use loreforge::embedding::EmbeddingClient;
use loreforge::error::Result;
use loreforge::partition::{PartitionOptions, PartitionedElement, Partitioner};
use loreforge::pdf::{DocumentOpener, DocumentSource};
use loreforge::vector_store::MemoryVectorStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Synthetic document with fixed page texts
pub struct StubDocument {
    pub pages: Vec<String>,
}

impl DocumentSource for StubDocument {
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

    fn write_page_range(&self, page_start: usize, page_end: usize, dest: &Path) -> Result<u64> {
        let end = page_end.min(self.pages.len());
        let body = self.pages[page_start - 1..end].join("\n\n");
        std::fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }
}

/// Opener that serves the same synthetic pages for every path
pub struct StubOpener {
    pub pages: Vec<String>,
}

impl DocumentOpener for StubOpener {
    fn open(&self, _path: &Path) -> Result<Box<dyn DocumentSource>> {
        Ok(Box::new(StubDocument {
            pages: self.pages.clone(),
        }))
    }
}

/// Stub extractor behaviours
pub enum StubBehaviour {
    Elements(Vec<PartitionedElement>),
    Empty,
    Fail,
}

pub struct StubPartitioner {
    pub behaviour: StubBehaviour,
}

#[async_trait]
impl Partitioner for StubPartitioner {
    fn name(&self) -> &str {
        "stub"
    }

    async fn partition(
        &self,
        _file: &Path,
        _options: &PartitionOptions,
    ) -> Result<Vec<PartitionedElement>> {
        match &self.behaviour {
            StubBehaviour::Elements(elements) => Ok(elements.clone()),
            StubBehaviour::Empty => Ok(Vec::new()),
            StubBehaviour::Fail => Err(loreforge::error::IngestError::Pdf(
                "stub extractor offline".to_string(),
            )),
        }
    }
}

/// A five-page document whose first page is a parseable ToC
pub fn toc_pages() -> Vec<String> {
    vec![
        "Table of Contents\nChapter 1: Spells ........ 1\nChapter 2: Feats ........ 3\nChapter 3: Classes ........ 5".to_string(),
        "Spell descriptions for the adventuring wizard.".to_string(),
        "Feats grant special combat options.".to_string(),
        "More feats and talents.".to_string(),
        "Character classes from Barbarian to Wizard.".to_string(),
    ]
}

/// Three distinct rule paragraphs long enough to survive deduplication
pub fn rule_elements() -> Vec<PartitionedElement> {
    let texts = [
        "The Rogue relies on Sneak Attack to punish distracted enemies. When a foe is engaged \
         with an ally, the Rogue adds bonus dice to weapon damage on a successful strike.",
        "A Cleric prepares divine magic each dawn. Spell slots limit how much healing and \
         protective magic can be channelled before the next long rest restores them fully.",
        "Attack of Opportunity rules reward positioning. A Fighter controls space around them, \
         striking any careless enemy that moves out of reach without disengaging first.",
    ];
    texts
        .iter()
        .map(|text| PartitionedElement {
            category: "NarrativeText".to_string(),
            text: text.to_string(),
            page_number: Some(2),
            coordinates: None,
        })
        .collect()
}

/// Build a context over in-memory stores and synthetic documents
pub fn build_context(
    artifacts_root: &Path,
    env: EnvName,
    pages: Vec<String>,
    behaviour: StubBehaviour,
) -> PipelineContext {
    let mut config = IngestConfig::default();
    config.env = env;
    config.threads = 1;
    config.artifacts_root = artifacts_root.to_path_buf();

    let embedder =
        EmbeddingClient::new(config.embedding.clone()).expect("embedding client builds");

    PipelineContext {
        config,
        vector_store: Arc::new(MemoryVectorStore::new(env.as_str())),
        dictionary: Arc::new(MemoryDictionaryStore::new()),
        embedder: Arc::new(embedder),
        opener: Arc::new(StubOpener { pages }),
        partitioner: Some(Arc::new(StubPartitioner { behaviour })),
        seeder: None,
    }
}

/// Write a placeholder PDF file of the given size
pub fn write_stub_pdf(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(size.max(bytes.len()), b'0');
    std::fs::write(&path, bytes).expect("writing stub pdf");
    path
}

/// Collect (path, mtime) pairs for every file under a directory
pub fn snapshot_mtimes(dir: &Path) -> Vec<(PathBuf, std::time::SystemTime)> {
    let mut out = Vec::new();
    fn visit(dir: &Path, out: &mut Vec<(PathBuf, std::time::SystemTime)>) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    visit(&path, out);
                } else if let Ok(meta) = entry.metadata() {
                    if let Ok(modified) = meta.modified() {
                        out.push((path, modified));
                    }
                }
            }
        }
    }
    visit(dir, &mut out);
    out.sort();
    out
}
