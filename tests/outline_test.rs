//! End-to-end tests over PDFs assembled in memory.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use pdf_outline::{
    extract, extract_outline, load_document_from_mem, write_outline, Config, Error, HeadingLevel,
    Outline, UNTITLED,
};

/// One line of text: font resource, size, x, baseline y, text.
type Line = (&'static str, i64, i64, i64, &'static str);

fn build_pdf(pages: &[Vec<Line>], info_title: Option<&str>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "ABCDEF+Helvetica-Bold",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let mut operations = Vec::new();
        for &(font, size, x, y, text) in lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![font.into(), Object::Integer(size)]));
            operations.push(Operation::new("Td", vec![Object::Integer(x), Object::Integer(y)]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some(title) = info_title {
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
        });
        doc.trailer.set("Info", info_id);
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// One page drawn by `operations`, with `font` as `/F1` and Helvetica as `/F2`.
fn single_page_pdf(font: Dictionary, media_box: [i64; 4], operations: Vec<Operation>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(font);
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id, "F2" => regular_id },
        },
        "MediaBox" => media_box.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn bold_font() -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    }
}

fn show_at(font: &str, matrix: [i64; 6], size: i64, text: &[u8]) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font.into(), Object::Integer(size)]),
        Operation::new("Tm", matrix.iter().map(|&v| Object::Integer(v)).collect()),
        Operation::new("Tj", vec![Object::string_literal(text.to_vec())]),
        Operation::new("ET", vec![]),
    ]
}

fn outline_texts(outline: &Outline) -> Vec<&str> {
    outline.outline.iter().map(|entry| entry.text.as_str()).collect()
}

fn body(y: i64) -> Line {
    ("F1", 11, 72, y, "Body text that fills out the page.")
}

fn sample_pages() -> Vec<Vec<Line>> {
    let mut first = vec![
        ("F1", 24, 72, 760, "Understanding AI"),
        ("F2", 16, 72, 700, "1. Introduction"),
    ];
    first.extend((0..6).map(|i| body(650 - i * 20)));

    let mut second = vec![("F2", 13, 72, 760, "1.1 Background")];
    second.extend((0..6).map(|i| body(700 - i * 20)));
    second.push(("F1", 11, 72, 400, "Contact: info@example.com"));
    // Emitted before the heading above it on the page
    second.insert(0, ("F2", 16, 72, 200, "2. Methods"));

    vec![first, second]
}

#[test]
fn test_spans_carry_font_style_and_position() {
    let bytes = build_pdf(&sample_pages(), None);
    let document = load_document_from_mem(&bytes).unwrap();

    assert_eq!(document.pages.len(), 2);
    assert_eq!(document.metadata_title, "");
    assert_eq!(document.span_count(), 17);

    let title = &document.pages[0][0];
    assert_eq!(title.text, "Understanding AI");
    assert_eq!(title.font_size, 24.0);
    assert_eq!(title.font_name, "Helvetica");
    assert!(!title.flags.is_bold());
    assert_eq!(title.vertical_position(), 842.0 - 784.0);

    let heading = &document.pages[0][1];
    assert_eq!(heading.font_name, "Helvetica-Bold");
    assert!(heading.flags.is_bold());
    assert!(heading.vertical_position() > title.vertical_position());

    assert!(document.pages[1].iter().all(|span| span.page == 2));
}

#[test]
fn test_outline_from_typography() {
    let bytes = build_pdf(&sample_pages(), None);
    let document = load_document_from_mem(&bytes).unwrap();
    let outline = extract(&document, &Config::default());

    assert_eq!(outline.title, "Understanding AI");

    let entries: Vec<(HeadingLevel, &str, usize)> = outline
        .outline
        .iter()
        .map(|entry| (entry.level, entry.text.as_str(), entry.page))
        .collect();
    assert_eq!(
        entries,
        [
            (HeadingLevel::H1, "Understanding AI", 1),
            (HeadingLevel::H1, "1. Introduction", 1),
            (HeadingLevel::H2, "1.1 Background", 2),
            (HeadingLevel::H1, "2. Methods", 2),
        ]
    );
    assert!(outline.is_well_formed(&Config::default()));
}

#[test]
fn test_metadata_title_wins() {
    let bytes = build_pdf(&sample_pages(), Some("Annual Research Review"));
    let document = load_document_from_mem(&bytes).unwrap();
    assert_eq!(document.metadata_title, "Annual Research Review");

    let outline = extract(&document, &Config::default());
    assert_eq!(outline.title, "Annual Research Review");
}

#[test]
fn test_blank_page_gives_empty_outline() {
    let bytes = build_pdf(&[Vec::new()], None);
    let document = load_document_from_mem(&bytes).unwrap();
    let outline = extract(&document, &Config::default());

    assert_eq!(outline.title, UNTITLED);
    assert!(outline.outline.is_empty());
}

#[test]
fn test_document_without_pages_is_unreadable() {
    let bytes = build_pdf(&[], None);
    let err = load_document_from_mem(&bytes).unwrap_err();
    assert!(matches!(err, Error::NoPages));
}

#[test]
fn test_corrupt_file_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.pdf");
    std::fs::write(&path, b"%PDF-1.4\nthis is not really a pdf").unwrap();

    let err = extract_outline(&path, &Config::default()).unwrap_err();
    assert!(err.is_document_unreadable());
}

#[test]
fn test_file_round_trip_json_contract() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.pdf");
    let output = dir.path().join("sample.json");
    std::fs::write(&input, build_pdf(&sample_pages(), None)).unwrap();

    let outline = extract_outline(&input, &Config::default()).unwrap();
    write_outline(&outline, &output).unwrap();

    let json = std::fs::read_to_string(&output).unwrap();
    let title_at = json.find("\"title\"").unwrap();
    let outline_at = json.find("\"outline\"").unwrap();
    assert!(title_at < outline_at);
    assert!(json.contains("\"level\": \"H2\""));
    assert!(!json.contains("position"));

    let parsed: Outline = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.title, outline.title);
    assert_eq!(parsed.outline.len(), outline.outline.len());
    assert!(parsed.outline.iter().all(|entry| entry.page >= 1));
}

#[test]
fn test_flipped_ctm_keeps_reading_order() {
    // Top-down page space, as browser print engines emit it
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![1.into(), 0.into(), 0.into(), (-1).into(), 0.into(), 842.into()],
        ),
    ];
    operations.extend(show_at("F1", [1, 0, 0, -1, 72, 100], 16, b"1. Introduction"));
    for y in [140, 160, 180, 200] {
        let body = b"Body text that fills out the page.";
        operations.extend(show_at("F2", [1, 0, 0, -1, 72, y], 11, body));
    }
    operations.extend(show_at("F1", [1, 0, 0, -1, 72, 300], 16, b"2. Methods"));
    operations.push(Operation::new("Q", vec![]));

    let bytes = single_page_pdf(bold_font(), [0, 0, 595, 842], operations);
    let document = load_document_from_mem(&bytes).unwrap();

    let intro = &document.pages[0][0];
    assert_eq!(intro.text, "1. Introduction");
    assert_eq!(intro.font_size, 16.0);
    assert_eq!(intro.vertical_position(), 84.0);

    let outline = extract(&document, &Config::default());
    assert_eq!(outline_texts(&outline), ["1. Introduction", "2. Methods"]);
}

#[test]
fn test_scaled_ctm_and_offset_media_box() {
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![2.into(), 0.into(), 0.into(), 2.into(), 0.into(), 0.into()],
        ),
    ];
    operations.extend(show_at("F1", [1, 0, 0, 1, 36, 400], 8, b"Scaled Heading"));
    operations.push(Operation::new("Q", vec![]));
    operations.extend(show_at("F1", [1, 0, 0, 1, 72, 500], 8, b"After restore"));

    let bytes = single_page_pdf(bold_font(), [0, 100, 612, 900], operations);
    let document = load_document_from_mem(&bytes).unwrap();

    let scaled = &document.pages[0][0];
    assert_eq!(scaled.font_size, 16.0);
    assert_eq!(scaled.bbox.x0, 72.0);
    // Baseline at 800 in a box whose top edge is 900
    assert_eq!(scaled.vertical_position(), 900.0 - 816.0);

    let restored = &document.pages[0][1];
    assert_eq!(restored.font_size, 8.0);
    assert_eq!(restored.vertical_position(), 900.0 - 508.0);
}

#[test]
fn test_win_ansi_text_is_decoded() {
    let font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    };
    let mut operations = show_at("F1", [1, 0, 0, 1, 72, 700], 16, b"1. Design \x96 \x93Core\x94");
    let body = b"Body text that fills out the page.";
    operations.extend(show_at("F2", [1, 0, 0, 1, 72, 650], 11, body));

    let bytes = single_page_pdf(font, [0, 0, 595, 842], operations);
    let document = load_document_from_mem(&bytes).unwrap();
    assert_eq!(document.pages[0][0].text, "1. Design \u{2013} \u{201c}Core\u{201d}");

    let outline = extract(&document, &Config::default());
    assert_eq!(outline.outline[0].text, "1. Design \u{2013} \u{201c}Core\u{201d}");
}
