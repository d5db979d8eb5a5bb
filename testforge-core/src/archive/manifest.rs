//! `META-INF/manifest.xml` codec.
//!
//! The manifest is derived from the member list and nothing else, so it can
//! always be regenerated and never needs hand maintenance.

use super::MANIFEST_PATH;
use crate::error::ArchiveError;
use crate::types::ArchiveManifestEntry;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

const MANIFEST_NS: &str = "urn:xmind:xmap:xmlns:manifest:1.0";

pub fn media_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".xml") {
        "text/xml"
    } else if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// One entry per member, excluding the manifest itself and directory entries
pub fn manifest_for<'a>(members: impl IntoIterator<Item = &'a str>) -> Vec<ArchiveManifestEntry> {
    members
        .into_iter()
        .filter(|m| *m != MANIFEST_PATH && !m.ends_with('/'))
        .map(|m| ArchiveManifestEntry::new(m, media_type_for(m)))
        .collect()
}

pub fn render_manifest(entries: &[ArchiveManifestEntry]) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;

    let mut root = BytesStart::new("manifest");
    root.push_attribute(("xmlns", MANIFEST_NS));
    writer.write_event(Event::Start(root))?;
    for entry in entries {
        let mut file_entry = BytesStart::new("file-entry");
        file_entry.push_attribute(("full-path", entry.path.as_str()));
        file_entry.push_attribute(("media-type", entry.media_type.as_str()));
        writer.write_event(Event::Empty(file_entry))?;
    }
    writer.write_event(Event::End(BytesEnd::new("manifest")))?;
    Ok(writer.into_inner())
}

pub fn parse_manifest(xml: &str) -> Result<Vec<ArchiveManifestEntry>, ArchiveError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut saw_root = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"manifest" => saw_root = true,
                b"file-entry" => {
                    let mut path = None;
                    let mut media_type = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(|err| ArchiveError::Xml(err.to_string()))?;
                        let value = attr.unescape_value()?.into_owned();
                        match attr.key.local_name().as_ref() {
                            b"full-path" => path = Some(value),
                            b"media-type" => media_type = Some(value),
                            _ => {}
                        }
                    }
                    if let Some(path) = path {
                        let media_type = media_type.unwrap_or_else(|| media_type_for(&path).to_string());
                        entries.push(ArchiveManifestEntry { path, media_type });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    if !saw_root {
        return Err(ArchiveError::Xml("manifest has no <manifest> root".to_string()));
    }
    Ok(entries)
}
