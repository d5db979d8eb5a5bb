use crate::types::ContentBlock;
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Capture of stage intermediates for post-mortem inspection
pub trait DiagnosticsStore: Send + Sync {
    fn store_blocks(&self, input_hash: &str, blocks: &[ContentBlock]) -> Result<()>;
    fn store_prompt(&self, input_hash: &str, payload: &str) -> Result<()>;
    fn store_raw_response(&self, input_hash: &str, raw: &str) -> Result<()>;
}

/// Writes one directory per input under the diagnostics root
pub struct FileDiagnostics {
    root: PathBuf,
}

impl FileDiagnostics {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn run_dir(&self, input_hash: &str) -> PathBuf {
        self.root.join(input_hash)
    }

    fn write(&self, input_hash: &str, name: &str, contents: &[u8]) -> Result<()> {
        let dir = self.run_dir(input_hash);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), contents)?;
        Ok(())
    }
}

impl DiagnosticsStore for FileDiagnostics {
    fn store_blocks(&self, input_hash: &str, blocks: &[ContentBlock]) -> Result<()> {
        let json = serde_json::to_string_pretty(blocks)
            .map_err(|e| anyhow!("Failed to serialize content blocks: {}", e))?;
        self.write(input_hash, "blocks.json", json.as_bytes())
    }

    fn store_prompt(&self, input_hash: &str, payload: &str) -> Result<()> {
        self.write(input_hash, "prompt.txt", payload.as_bytes())
    }

    fn store_raw_response(&self, input_hash: &str, raw: &str) -> Result<()> {
        self.write(input_hash, "raw_response.txt", raw.as_bytes())
    }
}

/// Hex SHA-256 of the full input document
pub fn input_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinct() {
        assert_eq!(input_hash(b"abc"), input_hash(b"abc"));
        assert_ne!(input_hash(b"abc"), input_hash(b"abd"));
        assert_eq!(
            input_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_diagnostics_write_per_input_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDiagnostics::new(dir.path().join("diag")).unwrap();
        let hash = input_hash(b"doc");

        store.store_blocks(&hash, &[ContentBlock::heading("Intro", 1, vec![], 0)]).unwrap();
        store.store_prompt(&hash, "payload").unwrap();
        store.store_raw_response(&hash, "{}").unwrap();

        let run = store.run_dir(&hash);
        assert!(run.join("blocks.json").is_file());
        assert_eq!(fs::read_to_string(run.join("prompt.txt")).unwrap(), "payload");
        assert_eq!(fs::read_to_string(run.join("raw_response.txt")).unwrap(), "{}");
    }
}
