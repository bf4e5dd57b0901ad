use crate::{
    Config, HeadingLevel, OutlineEntry, Span, H1_NUMBERING, H2_NUMBERING, H3_NUMBERING,
    HEADING_PATTERNS, NOISE_TEXT, NUMBERS_ONLY, WHITESPACE_RUN,
};
use log::{debug, info};
use std::collections::HashSet;

pub const UNTITLED: &str = "Untitled Document";

const DEFAULT_MEAN_FONT_SIZE: f64 = 12.0;
const DEFAULT_FONT_SIZE_STDDEV: f64 = 2.0;

const LARGE_FONT_SCORE: u32 = 3;
const BOLD_SCORE: u32 = 2;
const PATTERN_SCORE: u32 = 4;
const LENGTH_SCORE: u32 = 1;
const ACCEPT_SCORE: u32 = 3;
const MIN_REASONABLE_LENGTH: usize = 5;

const MIN_TITLE_LENGTH: usize = 6;
const MAX_TITLE_LENGTH: usize = 199;

#[derive(Debug, Clone, PartialEq)]
pub struct HeadingCandidate {
    pub level: HeadingLevel,
    pub text: String,
    pub page: usize,
    pub font_size: f64,
    /// Top edge of the span, carried through for the final ordering.
    pub position: f64,
}

/// Font size distribution of one document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentStatistics {
    pub mean_font_size: f64,
    pub font_size_stddev: f64,
}

impl DocumentStatistics {
    /// Mean and sample standard deviation over every span. With no spans the
    /// mean is 12; with fewer than two the deviation is 2.
    pub fn from_spans<'a>(spans: impl IntoIterator<Item = &'a Span>) -> Self {
        let sizes: Vec<f64> = spans.into_iter().map(|span| span.font_size).collect();

        let mean_font_size = if sizes.is_empty() {
            DEFAULT_MEAN_FONT_SIZE
        } else {
            sizes.iter().sum::<f64>() / sizes.len() as f64
        };

        let font_size_stddev = if sizes.len() < 2 {
            DEFAULT_FONT_SIZE_STDDEV
        } else {
            let variance = sizes
                .iter()
                .map(|size| (size - mean_font_size).powi(2))
                .sum::<f64>()
                / (sizes.len() - 1) as f64;
            variance.sqrt()
        };

        Self {
            mean_font_size,
            font_size_stddev,
        }
    }

    pub fn large_font_threshold(&self, variance_multiplier: f64) -> f64 {
        self.mean_font_size + variance_multiplier * self.font_size_stddev
    }
}

/// Pick the document title: metadata first, otherwise the largest (then
/// topmost) suitable span on the first page.
pub fn resolve_title(metadata_title: &str, first_page: &[Span], config: &Config) -> String {
    let metadata_title = metadata_title.trim();
    if metadata_title.chars().count() > 3 {
        info!("Title from metadata: {}", metadata_title);
        return metadata_title.to_string();
    }

    let best = first_page
        .iter()
        .filter(|span| is_title_candidate(span, config))
        .min_by(|a, b| {
            b.font_size
                .total_cmp(&a.font_size)
                .then(a.vertical_position().total_cmp(&b.vertical_position()))
        });

    match best {
        Some(span) => {
            let title = span.text.trim().to_string();
            info!("Title from content analysis: {}", title);
            title
        }
        None => UNTITLED.to_string(),
    }
}

fn is_title_candidate(span: &Span, config: &Config) -> bool {
    let text = span.text.trim();
    let len = text.chars().count();

    (MIN_TITLE_LENGTH..=MAX_TITLE_LENGTH).contains(&len)
        && span.font_size > config.min_font_size_threshold
        && !NUMBERS_ONLY.is_match(text)
}

/// Score every span against the document's font statistics and keep the
/// ones that read as headings, in input order.
pub fn classify<'a, I>(spans: I, config: &Config) -> Vec<HeadingCandidate>
where
    I: IntoIterator<Item = &'a Span>,
    I::IntoIter: Clone,
{
    let spans = spans.into_iter();
    let stats = DocumentStatistics::from_spans(spans.clone());
    debug!(
        "Font statistics: mean {:.2}, stddev {:.2}",
        stats.mean_font_size, stats.font_size_stddev
    );

    spans
        .filter(|span| is_heading_candidate(span, &stats, config))
        .map(|span| HeadingCandidate {
            level: determine_heading_level(&span.text, span.font_size, stats.mean_font_size),
            text: span.text.clone(),
            page: span.page,
            font_size: span.font_size,
            position: span.vertical_position(),
        })
        .collect()
}

pub fn heading_score(span: &Span, stats: &DocumentStatistics, config: &Config) -> u32 {
    let text = span.text.as_str();
    let len = text.chars().count();
    let mut score = 0;

    if span.font_size > stats.large_font_threshold(config.font_size_variance_threshold) {
        score += LARGE_FONT_SCORE;
    }
    if span.flags.is_bold() {
        score += BOLD_SCORE;
    }
    if HEADING_PATTERNS.iter().any(|pattern| pattern.is_match(text)) {
        score += PATTERN_SCORE;
    }
    if (MIN_REASONABLE_LENGTH..=config.max_heading_length).contains(&len) {
        score += LENGTH_SCORE;
    }

    score
}

pub fn is_heading_candidate(span: &Span, stats: &DocumentStatistics, config: &Config) -> bool {
    let text = span.text.as_str();
    if text.chars().count() <= config.min_heading_length {
        return false;
    }

    heading_score(span, stats, config) >= ACCEPT_SCORE && !is_noise(text)
}

// Bare numbers and rules, links, and addresses
fn is_noise(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOISE_TEXT.is_match(text) || lower.contains("http") || lower.contains("www") || text.contains('@')
}

/// Numbering decides the level when present; otherwise the distance above
/// the mean font size does.
pub fn determine_heading_level(text: &str, font_size: f64, mean_font_size: f64) -> HeadingLevel {
    if H1_NUMBERING.is_match(text) {
        return HeadingLevel::H1;
    }
    if H2_NUMBERING.is_match(text) {
        return HeadingLevel::H2;
    }
    if H3_NUMBERING.is_match(text) {
        return HeadingLevel::H3;
    }

    let size_diff = font_size - mean_font_size;
    if size_diff > 6.0 {
        HeadingLevel::H1
    } else if size_diff > 3.0 {
        HeadingLevel::H2
    } else {
        HeadingLevel::H3
    }
}

/// Drop repeated and too-short headings, collapse whitespace, and order by
/// page then vertical position. The first occurrence of a text wins.
pub fn clean(candidates: &[HeadingCandidate], config: &Config) -> Vec<OutlineEntry> {
    let mut seen_texts: HashSet<&str> = HashSet::new();
    let mut cleaned = Vec::new();

    for candidate in candidates {
        let text = candidate.text.trim();

        if seen_texts.contains(text) {
            continue;
        }
        if text.chars().count() < config.min_heading_length {
            continue;
        }

        cleaned.push(OutlineEntry {
            level: candidate.level,
            text: WHITESPACE_RUN.replace_all(text, " ").into_owned(),
            page: candidate.page,
            position: candidate.position,
        });
        seen_texts.insert(text);
    }

    cleaned.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.position.total_cmp(&b.position))
    });
    cleaned
}
