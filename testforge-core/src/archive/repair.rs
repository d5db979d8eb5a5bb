use super::documents::default_document;
use super::reader::{open, parse_manifest_bytes, read_member};
use super::{manifest, write_atomic, ArchiveDocument, ArchiveMeta, MANDATORY_DOCUMENTS, MANIFEST_PATH};
use crate::error::ArchiveError;
use crate::types::ArchiveManifestEntry;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of a repair pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairReport {
    /// The archive was rewritten
    pub changed: bool,
    /// Mandatory documents that had to be generated
    pub synthesized: Vec<String>,
    /// Manifest entries that were absent before
    pub added_entries: Vec<String>,
    /// Manifest entries that named nothing in the container
    pub dropped_entries: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        !self.changed
    }
}

/// Make the archive at `path` self-consistent.
///
/// Missing mandatory documents are filled with canonical defaults and the
/// manifest is rebuilt from the real member list. Running it on a healthy
/// archive reports no change and leaves the file alone.
pub fn repair(path: &Path, meta: &ArchiveMeta) -> Result<RepairReport, ArchiveError> {
    let mut members = Vec::new();
    let existing_manifest = {
        let mut zip = open(path)?;
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            let name = file.name().to_string();
            if name == MANIFEST_PATH || file.is_dir() {
                continue;
            }
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            members.push(ArchiveDocument::new(name, bytes));
        }
        match read_member(&mut zip, MANIFEST_PATH)? {
            Some(bytes) => parse_manifest_bytes(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "existing manifest unreadable, rebuilding");
                Vec::new()
            }),
            None => Vec::new(),
        }
    };

    let mut report = RepairReport::default();
    for name in MANDATORY_DOCUMENTS {
        if members.iter().any(|m| m.path == name) {
            continue;
        }
        if let Some(bytes) = default_document(name, meta)? {
            warn!(document = name, "mandatory document missing, synthesizing");
            members.push(ArchiveDocument::new(name, bytes));
            report.synthesized.push(name.to_string());
        }
    }

    let expected: BTreeSet<ArchiveManifestEntry> =
        manifest::manifest_for(members.iter().map(|m| m.path.as_str())).into_iter().collect();
    let actual: BTreeSet<ArchiveManifestEntry> = existing_manifest.iter().cloned().collect();

    report.added_entries = expected.difference(&actual).map(|e| e.path.clone()).collect();
    report.dropped_entries = actual.difference(&expected).map(|e| e.path.clone()).collect();
    let duplicated = existing_manifest.len() != actual.len();

    report.changed = !report.synthesized.is_empty()
        || !report.added_entries.is_empty()
        || !report.dropped_entries.is_empty()
        || duplicated;

    if report.changed {
        write_atomic(path, members.into_iter().map(Ok))?;
        info!(
            path = %path.display(),
            synthesized = report.synthesized.len(),
            added = report.added_entries.len(),
            dropped = report.dropped_entries.len(),
            "archive repaired"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{inspect, CONTENT_PATH, META_PATH};
    use crate::config::ArchiveConfig;
    use std::fs::File;
    use std::io::Write;
    use zip::write::FileOptions;

    fn meta() -> ArchiveMeta {
        ArchiveMeta::from_config(&ArchiveConfig::default())
    }

    fn raw_zip(path: &Path, members: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in members {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn repairs_missing_documents_and_stale_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xmind");
        let stale = br#"<manifest xmlns="urn:xmind:xmap:xmlns:manifest:1.0"><file-entry full-path="gone.xml" media-type="text/xml"/></manifest>"#;
        raw_zip(&path, &[(CONTENT_PATH, b"<xmap-content/>"), (MANIFEST_PATH, stale)]);

        let report = repair(&path, &meta()).unwrap();
        assert!(report.changed);
        assert_eq!(report.synthesized.len(), 3);
        assert!(report.synthesized.iter().any(|s| s == META_PATH));
        assert_eq!(report.dropped_entries, vec!["gone.xml".to_string()]);
        assert!(report.added_entries.iter().any(|s| s == CONTENT_PATH));

        let inspection = inspect(&path).unwrap();
        assert!(inspection.consistent);
        assert!(inspection.missing_mandatory.is_empty());
    }

    #[test]
    fn second_repair_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("again.xmind");
        raw_zip(&path, &[(CONTENT_PATH, b"<xmap-content/>")]);

        assert!(repair(&path, &meta()).unwrap().changed);
        let before = std::fs::read(&path).unwrap();

        let second = repair(&path, &meta()).unwrap();
        assert!(second.is_clean());
        assert!(second.synthesized.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn existing_content_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.xmind");
        raw_zip(&path, &[(CONTENT_PATH, b"<xmap-content>mine</xmap-content>")]);
        repair(&path, &meta()).unwrap();

        let mut zip = open(&path).unwrap();
        let content = read_member(&mut zip, CONTENT_PATH).unwrap().unwrap();
        assert_eq!(content, b"<xmap-content>mine</xmap-content>");
    }
}
