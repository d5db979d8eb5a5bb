use super::docx::normalize_ooxml;
use super::outline::{looks_like_heading, OutlineBuilder};
use super::Normalizer;
use crate::error::InputError;
use crate::types::{DocumentFormat, NormalizedDocument};
use tracing::warn;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
/// Shorter runs are almost always binary noise
const MIN_RUN_CHARS: usize = 4;

/// Word 97-2003 `.doc` files.
///
/// Renamed `.docx` files are common, so OOXML content is detected by magic bytes
/// first. Real OLE compound files get a best-effort scan for text runs; headings
/// there can only be recognised from numbering patterns, so the outline is flat.
pub struct LegacyDocNormalizer;

impl Normalizer for LegacyDocNormalizer {
    fn name(&self) -> &str {
        "LegacyDocNormalizer"
    }

    fn supports_format(&self, format: DocumentFormat) -> bool {
        format == DocumentFormat::Doc
    }

    fn normalize(&self, bytes: &[u8], fallback_title: &str) -> Result<NormalizedDocument, InputError> {
        if bytes.starts_with(ZIP_MAGIC) {
            return normalize_ooxml(bytes, fallback_title, DocumentFormat::Doc);
        }
        if !bytes.starts_with(OLE_MAGIC) {
            return Err(InputError::corrupt("not a Word document (no OLE or OOXML signature)"));
        }

        warn!("legacy .doc input, recovering text runs without structure");
        let mut paragraphs = utf16_runs(bytes);
        if paragraphs.is_empty() {
            paragraphs = ascii_runs(bytes);
        }

        let mut outline = OutlineBuilder::new();
        for text in paragraphs {
            if looks_like_heading(&text) {
                outline.heading(&text, 1);
            } else {
                outline.paragraph(&text);
            }
        }
        outline.finish(DocumentFormat::Doc, None, fallback_title, None)
    }
}

fn is_text_char(c: char) -> bool {
    !c.is_control() && c != '\u{FFFD}' && !('\u{E000}'..='\u{F8FF}').contains(&c)
}

/// A run has to look like language, not a table of small integers
fn plausible(run: &str) -> bool {
    let chars = run.chars().count();
    let letters = run.chars().filter(|c| c.is_alphabetic()).count();
    chars >= MIN_RUN_CHARS && letters * 2 >= chars
}

fn collect_run(runs: &mut Vec<String>, current: &mut String) {
    let text = current.trim().to_string();
    if plausible(&text) {
        runs.push(text);
    }
    current.clear();
}

/// Paragraphs stored as UTF-16LE, split on Word's paragraph mark (CR)
fn utf16_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let units = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok('\r') | Ok('\n') | Ok('\u{0B}') => collect_run(&mut runs, &mut current),
            Ok('\t') => current.push(' '),
            Ok(c) if is_text_char(c) && !is_latin1_noise(c) => current.push(c),
            _ => collect_run(&mut runs, &mut current),
        }
    }
    collect_run(&mut runs, &mut current);
    runs
}

/// Latin Extended code points are what stray binary pairs most often decode to
fn is_latin1_noise(c: char) -> bool {
    ('\u{0100}'..='\u{02FF}').contains(&c)
}

/// Fallback for documents stored with 8-bit text
fn ascii_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for &b in bytes {
        match b {
            b'\r' | b'\n' => collect_run(&mut runs, &mut current),
            b'\t' => current.push(' '),
            0x20..=0x7E => current.push(b as char),
            _ => collect_run(&mut runs, &mut current),
        }
    }
    collect_run(&mut runs, &mut current);
    runs.retain(|r| r.chars().count() >= 8);
    runs
}
