//! Table-of-contents and heading structure parsing
//!
//! Detects ToC pages by indicator phrases, parses leader-dotted entry
//! lines into titled page references, and falls back to heading pattern
//! extraction over the document body when no usable ToC exists.

use crate::error::Result;
use crate::pdf::DocumentSource;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One entry of the parsed document outline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// 1-based page number
    pub page: usize,
    /// 1 = chapter/appendix, 2 = subsection, 3+ = deeper
    pub level: u8,
    pub section_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Hierarchical document structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentOutline {
    pub entries: Vec<TocEntry>,
    pub has_toc: bool,
    pub toc_pages: Vec<usize>,
    pub total_pages: usize,
}

/// Parser for ToC pages and content headings
pub struct TocParser {
    toc_indicators: Vec<Regex>,
    heading_patterns: Vec<(u8, Regex)>,
    page_patterns: Vec<Regex>,
    level_patterns: Vec<(u8, Regex)>,
    leaders: Regex,
}

impl Default for TocParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TocParser {
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("static pattern");

        Self {
            toc_indicators: vec![
                compile(r"(?i)table\s+of\s+contents"),
                compile(r"(?im)^\s*contents\s*$"),
                compile(r"(?im)^\s*index\s*$"),
                compile(r"(?i)chapter\s+list"),
                compile(r"(?i)section\s+overview"),
            ],
            heading_patterns: vec![
                // Level 1: chapters and major sections
                (1, compile(r"^(Chapter \d+|CHAPTER \d+|Part \d+|PART \d+):?\s*(.+)$")),
                (1, compile(r"^([A-Z][A-Z\s]{10,})$")),
                (1, compile(r"^(Appendix [A-Z]):?\s*(.+)$")),
                // Level 2: subsections
                (2, compile(r"^(\d+\.\d+)\s+(.+)$")),
                (2, compile(r"^([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3})$")),
                // Level 3: sub-subsections
                (3, compile(r"^(\d+\.\d+\.\d+)\s+(.+)$")),
                (3, compile(r"^([A-Z][a-z]+\s+[A-Z][a-z]+):\s*(.+)$")),
            ],
            page_patterns: vec![
                compile(r"\.+\s*(\d+)$"),
                compile(r"\s+(\d+)$"),
                compile(r"\t+(\d+)$"),
                compile(r"-+\s*(\d+)$"),
            ],
            level_patterns: vec![
                (1, compile(r"(?i)^(Chapter|Part)\s+\d+")),
                (1, compile(r"(?i)^Appendix\s+[A-Z]")),
                (2, compile(r"^\d+\.\s+")),
                (3, compile(r"^\d+\.\d+\s+")),
            ],
            leaders: compile(r"[.\-]{3,}"),
        }
    }

    /// Parse document structure from ToC pages and heading fallback
    pub fn parse_document_structure(&self, doc: &dyn DocumentSource) -> DocumentOutline {
        let total_pages = doc.page_count();
        let (mut entries, toc_pages, has_toc) = self.find_and_parse_toc(doc, total_pages);

        if !has_toc || entries.len() < 3 {
            info!("no comprehensive ToC found, extracting headings from content");
            let headings = self.extract_headings_from_content(doc, total_pages);
            if headings.len() > entries.len() {
                entries = headings;
            }
        }

        let entries = build_hierarchy(entries);
        info!(
            "document structure parsed: {} sections, ToC pages: {:?}",
            entries.len(),
            toc_pages
        );

        DocumentOutline {
            entries,
            has_toc,
            toc_pages,
            total_pages,
        }
    }

    fn find_and_parse_toc(
        &self,
        doc: &dyn DocumentSource,
        total_pages: usize,
    ) -> (Vec<TocEntry>, Vec<usize>, bool) {
        let mut toc_pages = Vec::new();
        let mut entries = Vec::new();

        let search_pages = total_pages.min(10);
        for page in 1..=search_pages {
            let text = match doc.page_text(page) {
                Ok(text) => text,
                Err(e) => {
                    warn!("error reading page {} for ToC scan: {}", page, e);
                    continue;
                }
            };
            if self.toc_indicators.iter().any(|p| p.is_match(&text)) {
                info!("found ToC on page {}", page);
                toc_pages.push(page);
                let page_entries = self.parse_toc_page(&text, entries.len());
                entries.extend(page_entries);
            }
        }

        // ToC tables frequently span multiple pages; keep parsing until a
        // page yields no entries.
        if toc_pages.len() == 1 {
            let toc_start = toc_pages[0];
            for page in (toc_start + 1)..=(toc_start + 5).min(total_pages) {
                let text = match doc.page_text(page) {
                    Ok(text) => text,
                    Err(_) => break,
                };
                let page_entries = self.parse_toc_page(&text, entries.len());
                if page_entries.is_empty() {
                    break;
                }
                toc_pages.push(page);
                entries.extend(page_entries);
            }
        }

        let has_toc = !entries.is_empty();
        debug!(
            "ToC parsing complete: {} entries found on pages {:?}",
            entries.len(),
            toc_pages
        );
        (entries, toc_pages, has_toc)
    }

    fn parse_toc_page(&self, text: &str, base_count: usize) -> Vec<TocEntry> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim_end();
            if line.trim().len() < 5 {
                continue;
            }
            if let Some(entry) = self.parse_toc_line(line, base_count + entries.len()) {
                entries.push(entry);
            }
        }
        entries
    }

    fn parse_toc_line(&self, line: &str, entry_count: usize) -> Option<TocEntry> {
        let clean_line = self.leaders.replace_all(line, " ").into_owned();

        let mut page = None;
        let mut title = clean_line.trim().to_string();
        for pattern in &self.page_patterns {
            if let Some(caps) = pattern.captures(clean_line.trim_end()) {
                if let Ok(number) = caps[1].parse::<usize>() {
                    page = Some(number);
                    title = pattern
                        .replace(clean_line.trim_end(), "")
                        .trim()
                        .to_string();
                    break;
                }
            }
        }

        // Lines without a trailing page number are not ToC entries
        let page = page?;
        if title.is_empty() {
            return None;
        }

        let level = self.determine_heading_level(line, &title);
        Some(TocEntry {
            title,
            page,
            level,
            section_id: format!("section_{:03}", entry_count),
            parent_id: None,
            children: Vec::new(),
        })
    }

    fn determine_heading_level(&self, original_line: &str, title: &str) -> u8 {
        for (level, pattern) in &self.level_patterns {
            if pattern.is_match(title) {
                return *level;
            }
        }

        let leading_spaces = original_line.len() - original_line.trim_start().len();
        if leading_spaces > 10 {
            3
        } else if leading_spaces > 5 {
            2
        } else {
            1
        }
    }

    fn extract_headings_from_content(
        &self,
        doc: &dyn DocumentSource,
        total_pages: usize,
    ) -> Vec<TocEntry> {
        let mut headings: Vec<TocEntry> = Vec::new();

        // Skip front matter; headings in the opening pages are usually
        // title-page noise.
        let start_index = 5.max(total_pages / 10);
        for page in (start_index + 1)..=total_pages {
            let text = match doc.page_text(page) {
                Ok(text) => text,
                Err(e) => {
                    warn!("error extracting headings from page {}: {}", page, e);
                    continue;
                }
            };
            let page_headings = self.extract_page_headings(&text, page, headings.len());
            headings.extend(page_headings);
        }

        info!("extracted {} headings from document content", headings.len());
        headings
    }

    fn extract_page_headings(&self, text: &str, page: usize, base_count: usize) -> Vec<TocEntry> {
        let mut headings = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            for (level, pattern) in &self.heading_patterns {
                if let Some(caps) = pattern.captures(line) {
                    let title = match (caps.get(1), caps.get(2)) {
                        (Some(a), Some(b)) => format!("{}: {}", a.as_str(), b.as_str()),
                        (Some(a), None) => a.as_str().to_string(),
                        _ => line.to_string(),
                    };
                    let title: String = title.chars().take(100).collect();

                    headings.push(TocEntry {
                        title,
                        page,
                        level: *level,
                        section_id: format!("section_{:03}", base_count + headings.len()),
                        parent_id: None,
                        children: Vec::new(),
                    });
                    break;
                }
            }
        }
        headings
    }
}

/// Link entries into a parent/child hierarchy by walking a level stack
/// over the page-sorted list
pub fn build_hierarchy(mut entries: Vec<TocEntry>) -> Vec<TocEntry> {
    entries.sort_by_key(|e| e.page);

    let mut stack: Vec<usize> = Vec::new();
    for index in 0..entries.len() {
        let level = entries[index].level;
        while let Some(&top) = stack.last() {
            if entries[top].level >= level {
                stack.pop();
            } else {
                break;
            }
        }

        if let Some(&parent_index) = stack.last() {
            let parent_id = entries[parent_index].section_id.clone();
            let child_id = entries[index].section_id.clone();
            entries[index].parent_id = Some(parent_id);
            entries[parent_index].children.push(child_id);
        }
        stack.push(index);
    }

    entries
}
