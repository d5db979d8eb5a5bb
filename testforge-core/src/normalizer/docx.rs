use super::outline::OutlineBuilder;
use super::Normalizer;
use crate::error::InputError;
use crate::types::{DocumentFormat, NormalizedDocument};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::LazyLock;
use tracing::debug;

static HEADING_STYLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^heading\s*(\d)$").unwrap());

const DOCUMENT_PART: &str = "word/document.xml";
const STYLES_PART: &str = "word/styles.xml";
const CORE_PROPS_PART: &str = "docProps/core.xml";

/// Office Open XML word-processing documents
pub struct DocxNormalizer;

impl Normalizer for DocxNormalizer {
    fn name(&self) -> &str {
        "DocxNormalizer"
    }

    fn supports_format(&self, format: DocumentFormat) -> bool {
        format == DocumentFormat::Docx
    }

    fn normalize(&self, bytes: &[u8], fallback_title: &str) -> Result<NormalizedDocument, InputError> {
        normalize_ooxml(bytes, fallback_title, DocumentFormat::Docx)
    }
}

/// Shared with the legacy `.doc` path for files that are really OOXML
pub(crate) fn normalize_ooxml(
    bytes: &[u8],
    fallback_title: &str,
    format: DocumentFormat,
) -> Result<NormalizedDocument, InputError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(InputError::corrupt)?;

    let document_xml = read_part(&mut archive, DOCUMENT_PART)?
        .ok_or_else(|| InputError::corrupt(format!("missing {DOCUMENT_PART}")))?;
    let heading_styles = match read_part(&mut archive, STYLES_PART)? {
        Some(styles) => parse_heading_styles(&styles)?,
        None => HashMap::new(),
    };
    let metadata_title = match read_part(&mut archive, CORE_PROPS_PART)? {
        Some(core) => parse_core_title(&core),
        None => None,
    };
    debug!(styles = heading_styles.len(), "resolved docx heading styles");

    let outline = parse_body(&document_xml, &heading_styles)?;
    outline.finish(format, metadata_title.as_deref(), fallback_title, None)
}

fn read_part(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, InputError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(InputError::corrupt(e)),
    };
    let mut content = String::new();
    file.read_to_string(&mut content).map_err(InputError::corrupt)?;
    Ok(Some(content))
}

fn attr_val(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// `w:outlineLvl` is zero-based and 9 means body text
fn outline_level(e: &BytesStart) -> Option<u32> {
    attr_val(e, b"val")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|lvl| *lvl < 9)
        .map(|lvl| lvl + 1)
}

fn level_from_style_name(name: &str) -> Option<u32> {
    if name.trim().eq_ignore_ascii_case("title") {
        return Some(1);
    }
    HEADING_STYLE_NAME
        .captures(name.trim())
        .and_then(|c| c[1].parse().ok())
        .filter(|lvl| *lvl >= 1)
}

/// styleId -> heading level for every paragraph style that acts as a heading
fn parse_heading_styles(xml: &str) -> Result<HashMap<String, u32>, InputError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut styles = HashMap::new();
    let mut current: Option<(String, Option<u32>, Option<u32>)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"style" => {
                    current = attr_val(&e, b"styleId").map(|id| (id, None, None));
                }
                b"name" => {
                    if let Some((_, by_name, _)) = current.as_mut() {
                        *by_name = attr_val(&e, b"val").and_then(|n| level_from_style_name(&n));
                    }
                }
                b"outlineLvl" => {
                    if let Some((_, _, by_outline)) = current.as_mut() {
                        *by_outline = outline_level(&e);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.local_name().as_ref() == b"style" => {
                if let Some((id, by_name, by_outline)) = current.take() {
                    if let Some(level) = by_outline.or(by_name) {
                        styles.insert(id, level);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(InputError::corrupt(format!("{STYLES_PART}: {e}"))),
            _ => {}
        }
    }
    Ok(styles)
}

fn parse_core_title(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut in_title = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_title = e.local_name().as_ref() == b"title",
            Ok(Event::Text(t)) if in_title => {
                return t.unescape().ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            }
            Ok(Event::End(_)) => in_title = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[derive(Default)]
struct ParagraphState {
    text: String,
    style_id: Option<String>,
    outline_level: Option<u32>,
}

/// Walk `w:body`, turning paragraphs into headings/paragraphs and table cells into cell blocks.
/// Text is not trimmed by the reader: `xml:space="preserve"` runs carry meaningful spaces.
fn parse_body(xml: &str, heading_styles: &HashMap<String, u32>) -> Result<OutlineBuilder, InputError> {
    let mut reader = Reader::from_str(xml);
    let mut outline = OutlineBuilder::new();

    let mut paragraph: Option<ParagraphState> = None;
    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut cell: Option<Vec<String>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => paragraph = Some(ParagraphState::default()),
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                b"tc" if table_depth == 1 => cell = Some(Vec::new()),
                b"pStyle" | b"outlineLvl" => apply_paragraph_property(&e, paragraph.as_mut()),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" | b"outlineLvl" => apply_paragraph_property(&e, paragraph.as_mut()),
                b"tab" => push_text(paragraph.as_mut(), "\t"),
                b"br" | b"cr" => push_text(paragraph.as_mut(), " "),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(InputError::corrupt)?;
                push_text(paragraph.as_mut(), &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = paragraph.take() {
                        let text = p.text.trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        if let Some(parts) = cell.as_mut() {
                            parts.push(text);
                        } else if table_depth == 0 {
                            let level = p
                                .outline_level
                                .or_else(|| p.style_id.as_ref().and_then(|id| heading_styles.get(id).copied()))
                                .or_else(|| p.style_id.as_deref().and_then(level_from_style_name));
                            match level {
                                Some(level) => {
                                    outline.heading(&text, level);
                                }
                                None => {
                                    outline.paragraph(&text);
                                }
                            }
                        }
                    }
                }
                b"tc" if table_depth == 1 => {
                    if let Some(parts) = cell.take() {
                        outline.table_cell(&parts.join(" "));
                    }
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(InputError::corrupt(format!("{DOCUMENT_PART}: {e}"))),
            _ => {}
        }
    }
    Ok(outline)
}

fn apply_paragraph_property(e: &BytesStart, paragraph: Option<&mut ParagraphState>) {
    let Some(p) = paragraph else { return };
    match e.local_name().as_ref() {
        b"pStyle" => p.style_id = attr_val(e, b"val"),
        b"outlineLvl" => p.outline_level = outline_level(e),
        _ => {}
    }
}

fn push_text(paragraph: Option<&mut ParagraphState>, text: &str) {
    if let Some(p) = paragraph {
        p.text.push_str(text);
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::build_docx;
    use super::*;
    use crate::types::BlockKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn headings_resolve_through_styles_and_names() {
        let bytes = build_docx(
            &[
                ("1", "User Management"),
                ("", "Users can register."),
                ("2", "Login"),
                ("", "Login requires a password."),
                ("Custom", "Password Reset"),
                ("Heading1", "Reporting"),
                ("", "Reports export to CSV."),
            ],
            &[],
        );
        let doc = DocxNormalizer.normalize(&bytes, "requirements").unwrap();

        let headings: Vec<(String, Option<u32>)> = doc
            .blocks
            .iter()
            .filter(|b| b.is_heading())
            .map(|b| (b.text.clone(), b.level))
            .collect();
        assert_eq!(
            headings,
            vec![
                ("User Management".to_string(), Some(1)),
                ("Login".to_string(), Some(2)),
                ("Password Reset".to_string(), Some(2)),
                ("Reporting".to_string(), Some(1)),
            ]
        );
        assert_eq!(doc.blocks[3].section_path, vec!["User Management", "Login"]);
        assert_eq!(doc.blocks[6].section_path, vec!["Reporting"]);
        assert_eq!(doc.title, "User Management");
    }

    #[test]
    fn table_cells_become_blocks() {
        let bytes = build_docx(&[("1", "Limits")], &[&["Field", "Max"], &["Name", ""]]);
        let doc = DocxNormalizer.normalize(&bytes, "requirements").unwrap();
        let cells: Vec<&str> = doc
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::TableCell)
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(cells, vec!["Field", "Max", "Name"]);
        assert_eq!(doc.blocks[1].section_path, vec!["Limits"]);
    }

    #[test]
    fn not_a_zip_is_corrupt() {
        let err = DocxNormalizer.normalize(b"plain text", "x").unwrap_err();
        assert!(matches!(err, InputError::CorruptDocument { .. }));
    }

    #[test]
    fn no_text_is_empty() {
        let bytes = build_docx(&[("", "  ")], &[]);
        let err = DocxNormalizer.normalize(&bytes, "x").unwrap_err();
        assert!(matches!(err, InputError::EmptyDocument));
    }
}
