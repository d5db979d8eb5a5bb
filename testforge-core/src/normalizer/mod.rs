//! Document Normalizers
//!
//! Turn a requirements document into a flat, ordered list of [`ContentBlock`]s
//! with section paths attached.
//!
//! ```text
//! .docx / .doc / .pdf
//!     ↓
//! [Format-specific Normalizer]
//!     ↓
//! NormalizedDocument (blocks + title)
//!     ↓
//! [Prompter]
//! ```
//!
//! - `DocxNormalizer` - heading styles and outline levels from WordprocessingML
//! - `PdfNormalizer` - font-size heuristics, best-effort
//! - `LegacyDocNormalizer` - OOXML sniffing, then raw text recovery
//!
//! [`ContentBlock`]: crate::types::ContentBlock

pub mod docx;
pub mod legacy_doc;
pub mod outline;
pub mod pdf;

pub use docx::DocxNormalizer;
pub use legacy_doc::LegacyDocNormalizer;
pub use pdf::PdfNormalizer;

use crate::error::InputError;
use crate::types::{DocumentFormat, NormalizedDocument};
use std::path::Path;

/// Converts raw document bytes into normalized content blocks.
///
/// Implementations never touch the filesystem; reading and size checks
/// happen once in [`read_document`].
pub trait Normalizer: Send + Sync {
    fn normalize(&self, bytes: &[u8], fallback_title: &str) -> Result<NormalizedDocument, InputError>;

    /// Get normalizer name for logging
    fn name(&self) -> &str;

    fn supports_format(&self, format: DocumentFormat) -> bool;
}

/// One normalizer per supported format
pub fn default_normalizers() -> Vec<Box<dyn Normalizer>> {
    vec![
        Box::new(DocxNormalizer),
        Box::new(LegacyDocNormalizer),
        Box::new(PdfNormalizer),
    ]
}

/// Resolve the declared format from the file extension
pub fn detect_format(path: &Path) -> Result<DocumentFormat, InputError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    DocumentFormat::from_extension(extension).ok_or_else(|| InputError::UnsupportedFormat {
        extension: if extension.is_empty() {
            "(none)".to_string()
        } else {
            format!(".{}", extension.to_ascii_lowercase())
        },
    })
}

/// Input document after validation, ready for a normalizer
#[derive(Debug)]
pub struct LoadedDocument {
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
    /// File stem, used when the document has no title of its own
    pub stem: String,
}

/// Validate and read the input. The extension is checked before the file is opened.
pub fn read_document(path: &Path, max_bytes: u64) -> Result<LoadedDocument, InputError> {
    let format = detect_format(path)?;

    let metadata = std::fs::metadata(path)
        .map_err(|e| InputError::corrupt(format!("{}: {e}", path.display())))?;
    if !metadata.is_file() {
        return Err(InputError::corrupt(format!("{} is not a file", path.display())));
    }
    if metadata.len() == 0 {
        return Err(InputError::corrupt(format!("{} is empty (0 bytes)", path.display())));
    }
    if metadata.len() > max_bytes {
        return Err(InputError::TooLarge {
            size_bytes: metadata.len(),
            limit_bytes: max_bytes,
        });
    }

    let bytes = std::fs::read(path).map_err(InputError::corrupt)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    Ok(LoadedDocument { format, bytes, stem })
}

/// Pick the normalizer for `doc.format` and run it
pub fn normalize_with(
    normalizers: &[Box<dyn Normalizer>],
    doc: &LoadedDocument,
) -> Result<NormalizedDocument, InputError> {
    let normalizer = normalizers
        .iter()
        .find(|n| n.supports_format(doc.format))
        .ok_or_else(|| InputError::UnsupportedFormat {
            extension: format!(".{}", doc.format.extension()),
        })?;
    tracing::debug!(normalizer = normalizer.name(), bytes = doc.bytes.len(), "normalizing document");
    normalizer.normalize(&doc.bytes, &doc.stem)
}
