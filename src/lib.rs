//! Heading outline extraction for PDF documents.
//!
//! The outline is rebuilt from typography rather than embedded bookmarks:
//! spans are scored against document-wide font statistics and a fixed set
//! of numbering patterns, assigned a level H1-H3, then deduplicated and
//! ordered by page and vertical position.

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub mod config;
pub mod error;
pub mod font_utils;
pub mod functions;

pub use config::Config;
pub use error::{Error, Result};
pub use font_utils::{load_document, load_document_from_mem, BoundingBox, Span, SpanDocument, StyleFlags};
pub use functions::{classify, clean, resolve_title, DocumentStatistics, HeadingCandidate, UNTITLED};

// Prefix patterns that mark a heading, in precedence order.
pub static HEADING_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d+\.\s+",
        r"^\d+\.\d+\s+",
        r"^\d+\.\d+\.\d+\s+",
        r"^[IVX]+\.\s+",
        r"^[A-Z]\.\s+",
        r"^Chapter\s+\d+",
        r"^Section\s+\d+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});
pub static H1_NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s+").unwrap());
pub static H2_NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\s+").unwrap());
pub static H3_NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+\s+").unwrap());
pub static NOISE_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s\-_\.]+$").unwrap());
pub static NUMBERS_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
pub static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutlineEntry {
    pub level: HeadingLevel,
    pub text: String,
    pub page: usize,
    /// Top edge of the originating span; orders entries within a page.
    #[serde(skip)]
    pub position: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Outline {
    pub title: String,
    pub outline: Vec<OutlineEntry>,
}

impl Outline {
    /// Check the output contract: a title, and entries on real pages with
    /// enough text to be useful.
    pub fn is_well_formed(&self, config: &Config) -> bool {
        !self.title.trim().is_empty()
            && self.outline.iter().all(|entry| {
                entry.page >= 1 && entry.text.chars().count() >= config.min_heading_length
            })
    }
}

/// Build the outline of an already extracted document.
pub fn extract(document: &SpanDocument, config: &Config) -> Outline {
    let title = resolve_title(&document.metadata_title, document.first_page(), config);
    let candidates = classify(document.spans(), config);
    let outline = clean(&candidates, config);

    Outline { title, outline }
}

/// Load the PDF at `path` and build its outline.
pub fn extract_outline(path: &Path, config: &Config) -> Result<Outline> {
    info!("Analyzing PDF: {}", path.display());
    let document = load_document(path)?;
    let outline = extract(&document, config);
    info!("Extracted {} headings", outline.outline.len());
    Ok(outline)
}

/// Write `outline` as pretty-printed JSON.
pub fn write_outline(outline: &Outline, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(outline)?;
    fs::write(path, json).map_err(|source| Error::OutputWrite {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Results saved to: {}", path.display());
    Ok(())
}
