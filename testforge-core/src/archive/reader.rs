use super::{manifest, MANDATORY_DOCUMENTS, MANIFEST_PATH};
use crate::error::ArchiveError;
use crate::types::ArchiveManifestEntry;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// What an existing archive contains and whether its manifest matches
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInspection {
    pub members: Vec<String>,
    pub manifest: Option<Vec<ArchiveManifestEntry>>,
    pub missing_mandatory: Vec<String>,
    pub consistent: bool,
}

pub(crate) fn open(path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    Ok(ZipArchive::new(File::open(path)?)?)
}

pub(crate) fn read_member(zip: &mut ZipArchive<File>, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let mut file = match zip.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

pub(crate) fn parse_manifest_bytes(bytes: &[u8]) -> Result<Vec<ArchiveManifestEntry>, ArchiveError> {
    let xml = std::str::from_utf8(bytes).map_err(|e| ArchiveError::Xml(e.to_string()))?;
    manifest::parse_manifest(xml)
}

/// Parsed manifest of the archive at `path`
pub fn read_manifest(path: &Path) -> Result<Vec<ArchiveManifestEntry>, ArchiveError> {
    let mut zip = open(path)?;
    let bytes = read_member(&mut zip, MANIFEST_PATH)?
        .ok_or_else(|| ArchiveError::Missing(MANIFEST_PATH.to_string()))?;
    parse_manifest_bytes(&bytes)
}

pub fn inspect(path: &Path) -> Result<ArchiveInspection, ArchiveError> {
    let mut zip = open(path)?;
    let members: Vec<String> = zip.file_names().map(str::to_string).collect();

    let missing_mandatory = MANDATORY_DOCUMENTS
        .iter()
        .filter(|d| !members.iter().any(|m| m == *d))
        .map(|d| d.to_string())
        .collect();

    // An unreadable manifest counts as absent
    let manifest = read_member(&mut zip, MANIFEST_PATH)?.and_then(|b| parse_manifest_bytes(&b).ok());

    let expected: BTreeSet<ArchiveManifestEntry> =
        manifest::manifest_for(members.iter().map(String::as_str)).into_iter().collect();
    let consistent = manifest
        .as_ref()
        .is_some_and(|m| m.iter().cloned().collect::<BTreeSet<_>>() == expected && m.len() == expected.len());

    Ok(ArchiveInspection {
        members,
        manifest,
        missing_mandatory,
        consistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_atomic, ArchiveDocument, CONTENT_PATH};

    #[test]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.xmind");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(CONTENT_PATH, zip::write::FileOptions::default()).unwrap();
        std::io::Write::write_all(&mut zip, b"<xmap-content/>").unwrap();
        zip.finish().unwrap();

        assert!(matches!(read_manifest(&path), Err(ArchiveError::Missing(_))));
        let report = inspect(&path).unwrap();
        assert!(!report.consistent);
        assert!(report.manifest.is_none());
        assert_eq!(report.missing_mandatory.len(), 3);
    }

    #[test]
    fn written_archive_is_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.xmind");
        write_atomic(&path, vec![Ok(ArchiveDocument::new(CONTENT_PATH, b"<x/>".to_vec()))]).unwrap();
        let report = inspect(&path).unwrap();
        assert!(report.consistent);
        assert_eq!(report.missing_mandatory.len(), 3);
    }

    #[test]
    fn not_a_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.xmind");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        assert!(inspect(&path).is_err());
    }
}
