//! PDF normalization.
//!
//! Fixed-layout PDFs carry no heading markup, so structure is recovered from
//! font sizes: the size covering the most characters is body text, and lines
//! noticeably larger than that are headings. Levels follow reading order via
//! [`FontHierarchy`]. When no line qualifies by size, numbered-heading text
//! patterns give a flat, single-level outline instead. Callers must expect a
//! shallower section path from PDFs than from word-processor files.

use super::outline::{looks_like_heading, FontHierarchy, OutlineBuilder};
use super::Normalizer;
use crate::error::InputError;
use crate::types::{DocumentFormat, NormalizedDocument};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Encoding, Object};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// A line is a heading when its size is at least this much above body size
const HEADING_SIZE_RATIO: f32 = 1.15;
/// Longer lines are body text no matter how large
const MAX_HEADING_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq)]
struct PdfLine {
    text: String,
    size: f32,
    page: u32,
}

pub struct PdfNormalizer;

impl Normalizer for PdfNormalizer {
    fn name(&self) -> &str {
        "PdfNormalizer"
    }

    fn supports_format(&self, format: DocumentFormat) -> bool {
        format == DocumentFormat::Pdf
    }

    fn normalize(&self, bytes: &[u8], fallback_title: &str) -> Result<NormalizedDocument, InputError> {
        let doc = Document::load_mem(bytes).map_err(InputError::corrupt)?;
        let pages = doc.get_pages();
        let page_count = pages.len() as u32;

        let mut lines = Vec::new();
        for (page_number, page_id) in pages {
            let content = doc
                .get_page_content(page_id)
                .and_then(|raw| Content::decode(&raw))
                .map_err(|e| InputError::corrupt(format!("page {page_number}: {e}")))?;
            let fonts = page_encodings(&doc, page_id);
            lines.extend(extract_lines(&content, page_number, &fonts));
        }
        debug!(pages = page_count, lines = lines.len(), "decoded pdf text lines");

        let outline = build_outline(&lines);
        outline.finish(
            DocumentFormat::Pdf,
            info_title(&doc).as_deref(),
            fallback_title,
            Some(page_count),
        )
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        // PDFDocEncoding is close enough to Latin-1 for text recovery
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Font resource name to text encoding, for fonts whose encoding lopdf can
/// resolve. Strings shown in any other font go through [`decode_pdf_string`].
type PageFonts<'a> = BTreeMap<Vec<u8>, Encoding<'a>>;

fn page_encodings(doc: &Document, page_id: lopdf::ObjectId) -> PageFonts<'_> {
    let fonts = match doc.get_page_fonts(page_id) {
        Ok(fonts) => fonts,
        Err(e) => {
            warn!(error = %e, "could not read page fonts, using raw string decoding");
            return PageFonts::new();
        }
    };
    fonts
        .into_iter()
        .filter_map(|(name, font)| font_encoding(doc, font).map(|encoding| (name, encoding)))
        .collect()
}

fn font_encoding<'a>(doc: &'a Document, font: &'a Dictionary) -> Option<Encoding<'a>> {
    if !font.type_is(b"Font") || !(font.has(b"Encoding") || font.has(b"ToUnicode")) {
        return None;
    }
    let composite = font.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Type0"[..]);
    match font.get_font_encoding(doc) {
        // two-byte CMap codes only make sense for composite fonts
        Ok(Encoding::UnicodeMapEncoding(_)) if !composite => None,
        Ok(encoding) => Some(encoding),
        Err(e) => {
            debug!(error = %e, "unresolved font encoding");
            None
        }
    }
}

fn decode_shown(bytes: &[u8], encoding: Option<&Encoding>) -> String {
    encoding
        .and_then(|encoding| Document::decode_text(encoding, bytes).ok())
        .unwrap_or_else(|| decode_pdf_string(bytes))
}

fn info_title(doc: &Document) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match info.as_dict().ok()?.get(b"Title").ok()? {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// Walk the content stream, cutting lines at text-positioning operators
/// and tagging each with the effective font size.
fn extract_lines(content: &Content, page: u32, fonts: &PageFonts) -> Vec<PdfLine> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut encoding: Option<&Encoding> = None;
    let mut font_size = 12.0f32;
    let mut text_scale = 1.0f32;

    let flush = |current: &mut String, size: f32, lines: &mut Vec<PdfLine>| {
        let text = current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            lines.push(PdfLine { text, size, page });
        }
        current.clear();
    };

    for op in &content.operations {
        let effective = font_size * text_scale;
        match op.operator.as_str() {
            "Tf" => {
                if let Some(Object::Name(name)) = op.operands.first() {
                    encoding = fonts.get(name);
                }
                if let Some(size) = op.operands.get(1).and_then(number) {
                    if size.abs() > f32::EPSILON && (size - font_size).abs() > f32::EPSILON {
                        flush(&mut current, effective, &mut lines);
                    }
                    font_size = size.abs();
                }
            }
            "Tm" => {
                flush(&mut current, effective, &mut lines);
                text_scale = op.operands.get(3).and_then(number).map_or(1.0, f32::abs);
                if text_scale < f32::EPSILON {
                    text_scale = 1.0;
                }
            }
            "Td" | "TD" => {
                // a pure horizontal move stays on the same line
                let dy = op.operands.get(1).and_then(number).unwrap_or(0.0);
                if dy.abs() > f32::EPSILON {
                    flush(&mut current, effective, &mut lines);
                }
            }
            "T*" | "ET" => flush(&mut current, effective, &mut lines),
            "BT" => text_scale = 1.0,
            "Tj" => {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    current.push_str(&decode_shown(bytes, encoding));
                }
            }
            "'" | "\"" => {
                flush(&mut current, effective, &mut lines);
                if let Some(Object::String(bytes, _)) = op.operands.last() {
                    current.push_str(&decode_shown(bytes, encoding));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => current.push_str(&decode_shown(bytes, encoding)),
                            // large negative kerning is a word gap
                            other => {
                                if number(other).is_some_and(|n| n < -200.0) {
                                    current.push(' ');
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    flush(&mut current, font_size * text_scale, &mut lines);
    lines
}

/// Size (rounded to 0.5pt) covering the most characters
fn body_font_size(lines: &[PdfLine]) -> Option<f32> {
    let mut weights: HashMap<i64, usize> = HashMap::new();
    for line in lines {
        *weights.entry((line.size * 2.0).round() as i64).or_default() += line.text.chars().count();
    }
    weights
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(key, _)| key as f32 / 2.0)
}

fn is_size_heading(line: &PdfLine, body: f32) -> bool {
    line.size >= body * HEADING_SIZE_RATIO && line.text.chars().count() < MAX_HEADING_CHARS
}

fn build_outline(lines: &[PdfLine]) -> OutlineBuilder {
    let mut outline = OutlineBuilder::new();
    let Some(body) = body_font_size(lines) else {
        return outline;
    };

    let by_size = lines.iter().any(|l| is_size_heading(l, body));
    if !by_size {
        warn!(body_size = body, "no size-based headings in pdf, falling back to text patterns");
    }

    let mut hierarchy = FontHierarchy::default();
    let mut paragraph: Option<(String, u32)> = None;

    let flush_paragraph = |outline: &mut OutlineBuilder, paragraph: &mut Option<(String, u32)>| {
        if let Some((text, page)) = paragraph.take() {
            if let Some(block) = outline.paragraph(&text) {
                block.page = Some(page);
            }
        }
    };

    for line in lines {
        let heading_level = if by_size {
            is_size_heading(line, body).then(|| hierarchy.level_for(line.size))
        } else {
            looks_like_heading(&line.text).then_some(1)
        };

        if let Some(level) = heading_level {
            flush_paragraph(&mut outline, &mut paragraph);
            if let Some(block) = outline.heading(&line.text, level) {
                block.page = Some(line.page);
            }
            continue;
        }

        match paragraph.as_mut() {
            Some((text, page)) if *page == line.page => {
                text.push(' ');
                text.push_str(&line.text);
            }
            _ => {
                flush_paragraph(&mut outline, &mut paragraph);
                paragraph = Some((line.text.clone(), line.page));
            }
        }
        if line.text.ends_with(['.', '。', '!', '?', '！', '？', ':', '：']) {
            flush_paragraph(&mut outline, &mut paragraph);
        }
    }
    flush_paragraph(&mut outline, &mut paragraph);
    outline
}


#[cfg(test)]
mod tests {
    use super::fixtures::{build_cjk_pdf, build_pdf};
    use super::*;

    #[test]
    fn size_headings_build_section_paths() {
        let bytes = build_pdf(
            &[
                &[
                    (20.0, "Order Service"),
                    (11.0, "Orders are created by customers."),
                    (15.0, "Cancellation"),
                    (11.0, "Orders can be cancelled before shipping."),
                ],
                &[(20.0, "Payments"), (11.0, "Cards are charged on dispatch.")],
            ],
            Some("Shop Requirements"),
        );
        let doc = PdfNormalizer.normalize(&bytes, "shop").unwrap();

        assert_eq!(doc.title, "Shop Requirements");
        assert_eq!(doc.page_count, Some(2));
        let headings: Vec<(&str, Option<u32>)> = doc
            .blocks
            .iter()
            .filter(|b| b.is_heading())
            .map(|b| (b.text.as_str(), b.level))
            .collect();
        assert_eq!(
            headings,
            vec![("Order Service", Some(1)), ("Cancellation", Some(2)), ("Payments", Some(1))]
        );
        let last = doc.blocks.last().unwrap();
        assert_eq!(last.section_path, vec!["Payments"]);
        assert_eq!(last.page, Some(2));
    }

    #[test]
    fn uniform_size_falls_back_to_patterns() {
        let bytes = build_pdf(
            &[&[
                (11.0, "1. Overview"),
                (11.0, "The system tracks parcels."),
                (11.0, "2. Tracking"),
                (11.0, "Each parcel has a code."),
            ]],
            None,
        );
        let doc = PdfNormalizer.normalize(&bytes, "parcels").unwrap();
        assert_eq!(doc.heading_count(), 2);
        assert!(doc.blocks.iter().filter(|b| b.is_heading()).all(|b| b.level == Some(1)));
        assert_eq!(doc.blocks[3].section_path, vec!["2. Tracking"]);
        assert_eq!(doc.title, "1. Overview");
    }

    #[test]
    fn composite_font_text_goes_through_to_unicode_map() {
        let bytes = build_cjk_pdf(&[1, 2, 3, 4], "Users sign in with a phone number.");
        let doc = PdfNormalizer.normalize(&bytes, "login").unwrap();

        let heading = doc.blocks.iter().find(|b| b.is_heading()).unwrap();
        assert_eq!(heading.text, "登录需求");
        assert_eq!(heading.level, Some(1));
        let body = doc.blocks.last().unwrap();
        assert_eq!(body.text, "Users sign in with a phone number.");
        assert_eq!(body.section_path, vec!["登录需求"]);
    }

    #[test]
    fn unmapped_glyphs_do_not_leak_raw_bytes() {
        let bytes = build_cjk_pdf(&[3, 4, 0x0050], "Plain body text line here.");
        let doc = PdfNormalizer.normalize(&bytes, "search").unwrap();

        let heading = doc.blocks.iter().find(|b| b.is_heading()).unwrap();
        assert!(heading.text.starts_with("需求"), "{}", heading.text);
        assert!(!heading.text.contains('\0'));
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let err = PdfNormalizer.normalize(b"%PDF-1.4 nonsense", "x").unwrap_err();
        assert!(matches!(err, InputError::CorruptDocument { .. }));
    }

    #[test]
    fn body_size_is_character_weighted() {
        let lines = vec![
            PdfLine { text: "Short".into(), size: 18.0, page: 1 },
            PdfLine { text: "Tiny".into(), size: 18.0, page: 1 },
            PdfLine { text: "A much longer body paragraph line".into(), size: 10.0, page: 1 },
        ];
        assert_eq!(body_font_size(&lines), Some(10.0));
    }
}
