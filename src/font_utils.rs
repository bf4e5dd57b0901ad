use crate::error::{Error, Result};
use bitflags::bitflags;
use log::{debug, warn};
use lopdf::{content::Content, Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

// Top of a US Letter MediaBox, for pages without one.
const DEFAULT_PAGE_TOP: f64 = 792.0;
const DEFAULT_FONT_SIZE: f64 = 12.0;
// Average glyph advance in em units, used to estimate span widths.
const AVG_GLYPH_WIDTH: f64 = 0.5;
// TJ offsets (thousandths of an em) more negative than this read as a word gap.
const TJ_SPACE_THRESHOLD: f64 = -200.0;
const FALLBACK_LINE_HEIGHT: f64 = 14.0;
const MAX_TREE_DEPTH: usize = 32;
const STANDARD_ENCODING: &str = "StandardEncoding";
const MAX_UNREADABLE_RATIO: f64 = 0.3;

bitflags! {
    /// Style bits of a span, laid out like the usual span-flag convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StyleFlags: u32 {
        const ITALIC = 1 << 1;
        const BOLD = 1 << 4;
    }
}

impl StyleFlags {
    pub fn is_bold(self) -> bool {
        self.contains(Self::BOLD)
    }

    pub fn is_italic(self) -> bool {
        self.contains(Self::ITALIC)
    }

    // Infer style from the font name
    pub fn from_font_name(font_name: &str) -> Self {
        let font_lower = font_name.to_lowercase();
        let mut flags = Self::empty();

        if font_lower.contains("bold")
            || font_lower.contains("black")
            || font_lower.contains("heavy")
            || font_lower.contains("semibold")
        {
            flags |= Self::BOLD;
        }
        if font_lower.contains("italic") || font_lower.contains("oblique") {
            flags |= Self::ITALIC;
        }

        flags
    }
}

/// Span extent in top-down page coordinates: `y0` is the top edge and grows
/// toward the bottom of the page.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// A run of text sharing one font, size and style.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub font_size: f64,
    pub font_name: String,
    pub flags: StyleFlags,
    pub page: usize,
    pub bbox: BoundingBox,
}

impl Span {
    pub fn new(text: impl Into<String>, font_size: f64, page: usize) -> Self {
        Self {
            text: text.into(),
            font_size,
            font_name: String::new(),
            flags: StyleFlags::empty(),
            page,
            bbox: BoundingBox::default(),
        }
    }

    pub fn with_flags(mut self, flags: StyleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_font_name(mut self, font_name: impl Into<String>) -> Self {
        self.font_name = font_name.into();
        self
    }

    /// Place the span's top edge at `y`, keeping its height.
    pub fn with_position(mut self, y: f64) -> Self {
        self.bbox.y0 = y;
        self.bbox.y1 = y + self.font_size;
        self
    }

    /// Reading-order proxy within a page.
    pub fn vertical_position(&self) -> f64 {
        self.bbox.y0
    }
}

/// Everything the outline core needs from one PDF.
#[derive(Debug, Clone, Default)]
pub struct SpanDocument {
    /// `/Title` from the document information dictionary, possibly empty.
    pub metadata_title: String,
    /// Spans of each page, in page order.
    pub pages: Vec<Vec<Span>>,
}

impl SpanDocument {
    pub fn first_page(&self) -> &[Span] {
        self.pages.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn spans(&self) -> impl Iterator<Item = &Span> + Clone {
        self.pages.iter().flatten()
    }

    pub fn span_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }
}

pub fn load_document(path: &Path) -> Result<SpanDocument> {
    let bytes = fs::read(path)?;
    load_document_from_mem(&bytes)
}

pub fn load_document_from_mem(bytes: &[u8]) -> Result<SpanDocument> {
    let doc = Document::load_mem(bytes)?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(Error::Encrypted);
    }

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(Error::NoPages);
    }

    let mut document = SpanDocument {
        metadata_title: metadata_title(&doc),
        pages: pages
            .values()
            .enumerate()
            .map(|(idx, &page_id)| extract_page_spans(&doc, page_id, idx + 1))
            .collect(),
    };

    if document.span_count() == 0 || mostly_unreadable(&document) {
        warn!("No readable text runs in content streams, falling back to plain text extraction");
        match extract_plain_text(bytes) {
            Ok(text) => document.pages = spans_from_plain_text(&text),
            Err(e) => warn!("Plain text extraction failed: {}", e),
        }
    }

    debug!(
        "Extracted {} spans from {} pages",
        document.span_count(),
        document.pages.len()
    );
    Ok(document)
}

fn metadata_title(doc: &Document) -> String {
    doc.trailer
        .get(b"Info")
        .ok()
        .and_then(|info| resolve_dict(doc, info))
        .and_then(|info| info.get(b"Title").ok())
        .and_then(|title| resolve(doc, title))
        .and_then(|title| match title {
            Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
            _ => None,
        })
        .unwrap_or_default()
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

// Look up a page attribute, walking up the page tree for inherited values.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return resolve(doc, value);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

// Upper edge of the MediaBox in default user space. Top-down positions are
// measured from here, so boxes with a non-zero origin keep their offset.
fn page_top(doc: &Document, page_id: ObjectId) -> f64 {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|values| {
            let nums: Vec<f64> = values
                .iter()
                .filter_map(|v| resolve(doc, v).and_then(as_number))
                .collect();
            match nums.as_slice() {
                [_, y0, _, y1] if (y1 - y0).abs() > 0.0 => Some(y0.max(*y1)),
                _ => None,
            }
        })
        .unwrap_or(DEFAULT_PAGE_TOP)
}

/// What the walker needs to know about one font resource.
#[derive(Debug, Clone, PartialEq)]
struct FontInfo<'a> {
    base_font: String,
    encoding: &'a str,
}

impl FontInfo<'_> {
    fn unknown(key: &[u8]) -> Self {
        Self {
            base_font: String::from_utf8_lossy(key).into_owned(),
            encoding: STANDARD_ENCODING,
        }
    }
}

// Map font resource names to base font names and encodings
fn page_fonts(doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, FontInfo<'_>> {
    doc.get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| {
            let base_font = font
                .get(b"BaseFont")
                .and_then(Object::as_name_str)
                .map(|base| strip_subset_prefix(base).to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&name).into_owned());
            let info = FontInfo {
                base_font,
                encoding: font_encoding(doc, font),
            };
            (name, info)
        })
        .collect()
}

// An /Encoding dictionary names its base table; /Differences are not applied.
fn font_encoding<'a>(doc: &'a Document, font: &'a Dictionary) -> &'a str {
    match font.get(b"Encoding").ok().and_then(|enc| resolve_dict(doc, enc)) {
        Some(encoding) => encoding
            .get(b"BaseEncoding")
            .and_then(Object::as_name_str)
            .unwrap_or(STANDARD_ENCODING),
        None => font.get_font_encoding(),
    }
}

// Embedded subsets are named like "ABCDEF+Helvetica-Bold".
fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

fn as_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if let [0xFE, 0xFF, rest @ ..] = bytes {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// Show strings are decoded through the font's simple encoding. Composite
// fonts map two-byte CIDs through a ToUnicode CMap, which is not read here,
// so each code becomes a replacement character.
fn decode_show_string(bytes: &[u8], encoding: &str) -> String {
    match encoding {
        "Identity-H" | "Identity-V" => bytes
            .chunks(2)
            .map(|_| char::REPLACEMENT_CHARACTER)
            .collect(),
        _ => Document::decode_text(Some(encoding), bytes),
    }
}

fn is_readable(c: char) -> bool {
    !c.is_control()
        && c != char::REPLACEMENT_CHARACTER
        && !('\u{E000}'..='\u{F8FF}').contains(&c)
}

// True when too much of the extracted text is control, private-use or
// replacement characters to be worth scoring.
fn mostly_unreadable(document: &SpanDocument) -> bool {
    let (total, unreadable) = document
        .spans()
        .flat_map(|span| span.text.chars())
        .filter(|c| !c.is_whitespace())
        .fold((0usize, 0usize), |(total, bad), c| {
            (total + 1, bad + usize::from(!is_readable(c)))
        });
    total > 0 && unreadable as f64 / total as f64 > MAX_UNREADABLE_RATIO
}

/// Affine matrix `[a b c d e f]`, applied to row vectors as in PDF.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f64> = operands.iter().filter_map(as_number).collect();
        match values.as_slice() {
            &[a, b, c, d, e, f] => Some(Matrix([a, b, c, d, e, f])),
            _ => None,
        }
    }

    /// `self × other`: apply `self` first, then `other`.
    fn multiply(self, other: Matrix) -> Self {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    // Pre-multiply by a translation in text space.
    fn translate(self, tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty]).multiply(self)
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn vertical_scale(&self) -> f64 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }

    fn origin(&self) -> (f64, f64) {
        (self.0[4], self.0[5])
    }
}

/// The part of the graphics state saved by `q` and restored by `Q`.
#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font_key: Vec<u8>,
    font_size: f64,
    leading: f64,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            font_key: Vec::new(),
            font_size: DEFAULT_FONT_SIZE,
            leading: 0.0,
        }
    }
}

struct TextState {
    gs: GraphicsState,
    saved: Vec<GraphicsState>,
    tm: Matrix,
    tlm: Matrix,
}

impl TextState {
    fn new() -> Self {
        Self {
            gs: GraphicsState::default(),
            saved: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
        }
    }

    fn save(&mut self) {
        self.saved.push(self.gs.clone());
    }

    // An unbalanced Q leaves the state alone.
    fn restore(&mut self) {
        if let Some(gs) = self.saved.pop() {
            self.gs = gs;
        }
    }

    fn concat(&mut self, m: Matrix) {
        self.gs.ctm = m.multiply(self.gs.ctm);
    }

    fn set_line_matrix(&mut self, m: Matrix) {
        self.tlm = m;
        self.tm = m;
    }

    fn next_line(&mut self, tx: f64, ty: f64) {
        self.set_line_matrix(self.tlm.translate(tx, ty));
    }

    /// Text space to device space.
    fn rendering_matrix(&self) -> Matrix {
        self.tm.multiply(self.gs.ctm)
    }

    /// Rendered glyph height. A negative `Tf` size only mirrors the glyphs.
    fn effective_size(&self) -> f64 {
        let size = self.gs.font_size.abs();
        let scale = self.rendering_matrix().vertical_scale();
        if scale > f64::EPSILON {
            size * scale
        } else {
            size
        }
    }
}

/// Where a text run lands on the page, in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    x: f64,
    width: f64,
    baseline: f64,
    // Signed offset from the baseline to the glyph top.
    ascent: f64,
}

/// Merges consecutive text runs on one baseline into spans.
struct SpanCollector {
    page: usize,
    page_top: f64,
    spans: Vec<Span>,
    pending: Option<(Span, f64)>,
}

impl SpanCollector {
    fn new(page: usize, page_top: f64) -> Self {
        Self {
            page,
            page_top,
            spans: Vec::new(),
            pending: None,
        }
    }

    fn push(&mut self, text: &str, font_name: &str, size: f64, at: Placement) {
        if text.is_empty() {
            return;
        }

        if let Some((span, pending_baseline)) = self.pending.as_mut() {
            let continues = span.font_name == font_name
                && (span.font_size - size).abs() < 0.05
                && (*pending_baseline - at.baseline).abs() < 1.0
                && at.x >= span.bbox.x0;
            if continues {
                let gap = at.x - span.bbox.x1;
                if gap > size * 0.25
                    && !span.text.ends_with(char::is_whitespace)
                    && !text.starts_with(char::is_whitespace)
                {
                    span.text.push(' ');
                }
                span.text.push_str(text);
                span.bbox.x1 = span.bbox.x1.max(at.x + at.width);
                return;
            }
        }

        self.flush();
        let top = at.baseline.max(at.baseline + at.ascent);
        let bottom = at.baseline.min(at.baseline + at.ascent);
        let span = Span {
            text: text.to_string(),
            font_size: size,
            font_name: font_name.to_string(),
            flags: StyleFlags::from_font_name(font_name),
            page: self.page,
            bbox: BoundingBox {
                x0: at.x,
                y0: self.page_top - top,
                x1: at.x + at.width,
                y1: self.page_top - bottom,
            },
        };
        self.pending = Some((span, at.baseline));
    }

    fn flush(&mut self) {
        if let Some((mut span, _)) = self.pending.take() {
            let trimmed = span.text.trim();
            if !trimmed.is_empty() {
                span.text = trimmed.to_string();
                self.spans.push(span);
            }
        }
    }

    fn finish(mut self) -> Vec<Span> {
        self.flush();
        self.spans
    }
}

// Walk one page's content stream and collect its spans.
fn extract_page_spans(doc: &Document, page_id: ObjectId, page: usize) -> Vec<Span> {
    let content = match doc
        .get_page_content(page_id)
        .and_then(|data| Content::decode(&data))
    {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not decode content of page {}: {}", page, e);
            return Vec::new();
        }
    };

    let fonts = page_fonts(doc, page_id);
    let mut collector = SpanCollector::new(page, page_top(doc, page_id));
    let mut state = TextState::new();

    for op in &content.operations {
        let operands = &op.operands;
        let num = |idx: usize| operands.get(idx).and_then(as_number);

        match op.operator.as_str() {
            "q" => state.save(),
            "Q" => state.restore(),
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    state.concat(m);
                }
            }
            "BT" => state.set_line_matrix(Matrix::IDENTITY),
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    state.gs.font_key = name.clone();
                }
                if let Some(size) = num(1) {
                    state.gs.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = num(0) {
                    state.gs.leading = leading;
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    state.set_line_matrix(m);
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                    if op.operator == "TD" {
                        state.gs.leading = -ty;
                    }
                    state.next_line(tx, ty);
                }
            }
            "T*" => state.next_line(0.0, -state.gs.leading),
            "Tj" | "'" | "\"" => {
                if op.operator != "Tj" {
                    state.next_line(0.0, -state.gs.leading);
                }
                let text_idx = if op.operator == "\"" { 2 } else { 0 };
                if let Some(Object::String(bytes, _)) = operands.get(text_idx) {
                    let font = current_font(&fonts, &state);
                    let text = decode_show_string(bytes, font.encoding);
                    show_text(&mut state, &mut collector, &font.base_font, &text);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let font = current_font(&fonts, &state);
                    let mut combined = String::new();
                    for item in items {
                        match item {
                            Object::String(bytes, _) => {
                                combined.push_str(&decode_show_string(bytes, font.encoding))
                            }
                            other => {
                                if as_number(other).is_some_and(|n| n < TJ_SPACE_THRESHOLD) {
                                    combined.push(' ');
                                }
                            }
                        }
                    }
                    show_text(&mut state, &mut collector, &font.base_font, &combined);
                }
            }
            _ => {}
        }
    }

    collector.finish()
}

fn current_font<'a>(fonts: &HashMap<Vec<u8>, FontInfo<'a>>, state: &TextState) -> FontInfo<'a> {
    fonts
        .get(&state.gs.font_key)
        .cloned()
        .unwrap_or_else(|| FontInfo::unknown(&state.gs.font_key))
}

fn show_text(state: &mut TextState, collector: &mut SpanCollector, font_name: &str, text: &str) {
    let advance = text.chars().count() as f64 * state.gs.font_size.abs() * AVG_GLYPH_WIDTH;
    let rendering = state.rendering_matrix();
    let (x, baseline) = rendering.origin();
    let (end_x, _) = rendering.apply(advance, 0.0);
    let (_, top) = rendering.apply(0.0, state.gs.font_size);

    let at = Placement {
        x: x.min(end_x),
        width: (end_x - x).abs(),
        baseline,
        ascent: top - baseline,
    };
    collector.push(text, font_name, state.effective_size(), at);

    state.tm = state.tm.translate(advance, 0.0);
}

// pdf_extract can panic on malformed input, so the call is isolated.
fn extract_plain_text(bytes: &[u8]) -> Result<String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }));
    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::DocumentUnreadable(
            "plain text extraction panicked".to_string(),
        )),
    }
}

// Every non-empty line becomes a body-size span; pages split on form feed.
fn spans_from_plain_text(text: &str) -> Vec<Vec<Span>> {
    text.split('\x0C')
        .enumerate()
        .map(|(idx, page_text)| {
            page_text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .enumerate()
                .map(|(line_idx, line)| {
                    Span::new(line, DEFAULT_FONT_SIZE, idx + 1)
                        .with_position(line_idx as f64 * FALLBACK_LINE_HEIGHT)
                })
                .collect()
        })
        .collect()
}
