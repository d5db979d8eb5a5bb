// Mind-map archive output
//
// The archive is a zip container with four mandatory XML documents and a
// manifest that is always derived from the actual members. Writes go through
// a temporary file in the destination directory, so a reader never sees a
// half-written archive.

pub mod documents;
pub mod manifest;
pub mod reader;
pub mod repair;

pub use reader::{inspect, read_manifest, ArchiveInspection};
pub use repair::{repair, RepairReport};

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::types::GenerationResult;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CONTENT_PATH: &str = "content.xml";
pub const STYLES_PATH: &str = "styles.xml";
pub const COMMENTS_PATH: &str = "comments.xml";
pub const META_PATH: &str = "meta.xml";
pub const MANIFEST_PATH: &str = "META-INF/manifest.xml";

/// Documents a readable archive must contain besides the manifest
pub const MANDATORY_DOCUMENTS: [&str; 4] = [CONTENT_PATH, STYLES_PATH, COMMENTS_PATH, META_PATH];

/// One member of the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDocument {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl ArchiveDocument {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }
}

/// Authorship recorded in meta.xml and comments
#[derive(Debug, Clone)]
pub struct ArchiveMeta {
    pub author: String,
    pub generator_name: String,
    pub generator_version: String,
    pub created: DateTime<Utc>,
}

impl ArchiveMeta {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            author: config.author.clone(),
            generator_name: config.generator_name.clone(),
            generator_version: config.generator_version.clone(),
            created: Utc::now(),
        }
    }
}

/// Render a generation result and write it as a complete archive at `path`
pub fn build_archive(result: &GenerationResult, meta: &ArchiveMeta, path: &Path) -> Result<PathBuf, ArchiveError> {
    let rendered = documents::render_all(result, meta)?;
    let entries = rendered
        .into_entries()
        .into_iter()
        .map(|(name, bytes)| Ok(ArchiveDocument::new(name, bytes)));
    write_atomic(path, entries)?;
    info!(path = %path.display(), cases = result.statistics.total_cases, "archive written");
    Ok(path.to_path_buf())
}

/// Write `documents` plus a freshly derived manifest to `path`.
///
/// Documents are pulled lazily; if any of them fails, the partially written
/// temporary file is discarded and `path` is left exactly as it was. A
/// caller-supplied manifest and repeated paths are ignored (first one wins).
pub fn write_atomic<I>(path: &Path, documents: I) -> Result<(), ArchiveError>
where
    I: IntoIterator<Item = Result<ArchiveDocument, ArchiveError>>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let temp = tempfile::Builder::new()
        .prefix(".testforge-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(temp);
    let mut written: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    for document in documents {
        let document = document?;
        if document.path == MANIFEST_PATH || !seen.insert(document.path.clone()) {
            debug!(path = %document.path, "skipping member");
            continue;
        }
        zip.start_file(document.path.as_str(), options)?;
        zip.write_all(&document.bytes)?;
        written.push(document.path);
    }

    let entries = manifest::manifest_for(written.iter().map(String::as_str));
    zip.start_file(MANIFEST_PATH, options)?;
    zip.write_all(&manifest::render_manifest(&entries)?)?;

    let temp = zip.finish()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| ArchiveError::Io(e.error))?;
    Ok(())
}
