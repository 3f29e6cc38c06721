use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::HandoffError;

/// Fields the downstream consumer refuses to proceed without.
const REQUIRED_FIELDS: [&str; 6] = [
    "file_path",
    "file_name",
    "source_url",
    "sha256",
    "bytes",
    "downloaded_at_iso",
];

/// The durable success artifact handed to the downstream consumer. Written
/// exactly once per successful run; a later success replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub status: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub source_url: String,
    pub sha256: String,
    pub bytes: u64,
    pub downloaded_at_iso: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl HandoffRecord {
    /// Assemble the record for a saved document: streaming digest, size
    /// from the filesystem, UTC completion timestamp.
    pub fn for_download(
        file_path: PathBuf,
        file_name: String,
        source_url: &str,
        notes: &str,
    ) -> Result<Self> {
        let sha256 = sha256_file(&file_path)?;
        let bytes = std::fs::metadata(&file_path)
            .with_context(|| format!("stat {}", file_path.display()))?
            .len();

        let mut extra = BTreeMap::new();
        extra.insert("executor".to_string(), "headless-chrome".to_string());
        extra.insert("reasoner".to_string(), "gpt-5-mini".to_string());

        Ok(Self {
            status: "success".to_string(),
            file_path,
            file_name,
            source_url: source_url.to_string(),
            sha256,
            bytes,
            downloaded_at_iso: chrono::Utc::now().to_rfc3339(),
            notes: notes.to_string(),
            extra,
        })
    }

    /// Persist as pretty JSON. Written to a temp file in the same
    /// directory and renamed over the target, so a crash mid-write cannot
    /// leave a truncated record. Last writer wins.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        info!(path = %path.display(), "wrote handoff record");
        Ok(())
    }
}

/// Consumer-side load: named missing-field rejection for the required
/// fields, then a file-exists check on `file_path`. These are the only two
/// validations the boundary guarantees.
pub fn load_validated(path: &Path) -> Result<HandoffRecord, HandoffError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| HandoffError::RecordMissing(path.to_path_buf()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;

    for field in REQUIRED_FIELDS {
        if value.get(field).is_none() {
            return Err(HandoffError::MissingField(field.to_string()));
        }
    }

    let record: HandoffRecord = serde_json::from_value(value)?;
    if !record.file_path.exists() {
        return Err(HandoffError::FileMissing(record.file_path));
    }
    Ok(record)
}

/// Streaming SHA-256 of a file, read in fixed 1 MiB chunks, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_fixture(file_path: PathBuf) -> HandoffRecord {
        HandoffRecord {
            status: "success".into(),
            file_path,
            file_name: "doc.pdf".into(),
            source_url: "https://example.com/doc".into(),
            sha256: "0".repeat(64),
            bytes: 3,
            downloaded_at_iso: "2024-01-01T00:00:00+00:00".into(),
            notes: String::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn digest_matches_reference_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fixture.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let digest = sha256_file(&path).unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(sha256_file(&path).unwrap(), digest);
    }

    #[test]
    fn digest_streams_past_one_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, vec![7u8; 3 * 1024 * 1024 + 17]).unwrap();
        let digest = sha256_file(&path).unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(sha256_file(&path).unwrap(), digest);
    }

    #[test]
    fn write_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = tmp.path().join("doc.pdf");
        std::fs::write(&doc, b"pdf").unwrap();
        let handoff = tmp.path().join("handoff.json");

        record_fixture(doc).write(&handoff).unwrap();
        let loaded = load_validated(&handoff).unwrap();
        assert_eq!(loaded.status, "success");
        assert_eq!(loaded.file_name, "doc.pdf");
        assert!(!handoff.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_sha256_is_rejected_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let handoff = tmp.path().join("handoff.json");
        let mut value = serde_json::to_value(record_fixture(tmp.path().join("doc.pdf"))).unwrap();
        value.as_object_mut().unwrap().remove("sha256");
        std::fs::write(&handoff, value.to_string()).unwrap();

        match load_validated(&handoff) {
            Err(HandoffError::MissingField(field)) => assert_eq!(field, "sha256"),
            other => panic!("expected named missing-field error, got {other:?}"),
        }
    }

    #[test]
    fn dangling_file_path_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let handoff = tmp.path().join("handoff.json");
        record_fixture(tmp.path().join("gone.pdf"))
            .write(&handoff)
            .unwrap();

        assert!(matches!(
            load_validated(&handoff),
            Err(HandoffError::FileMissing(_))
        ));
    }

    #[test]
    fn absent_record_is_its_own_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_validated(&tmp.path().join("handoff.json")),
            Err(HandoffError::RecordMissing(_))
        ));
    }

    #[test]
    fn rewrite_replaces_wholesale() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = tmp.path().join("doc.pdf");
        std::fs::write(&doc, b"pdf").unwrap();
        let handoff = tmp.path().join("handoff.json");

        let mut first = record_fixture(doc.clone());
        first.notes = "first run".into();
        first.write(&handoff).unwrap();

        let second = record_fixture(doc);
        second.write(&handoff).unwrap();

        let loaded = load_validated(&handoff).unwrap();
        assert!(loaded.notes.is_empty());
    }
}
