//! Durable ASP state: an append-only JSON-lines label log plus the last
//! published root.
//!
//! The log is the minimal persisted form - the tree is rebuilt from it on
//! startup by replaying labels in order. Appends are flushed to disk before
//! the in-memory tree advances past them.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use galeon_pool::field::{field_from_str, field_to_hex};
use galeon_pool::Fr;
use serde::{Deserialize, Serialize};

use crate::error::AspError;

const LABELS_FILE: &str = "labels.jsonl";
const ROOT_FILE: &str = "root.json";

/// One approved label as persisted, ordered by `(block_number, log_index)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelRecord {
    /// Field element, 0x-hex.
    pub label: String,
    pub block_number: u64,
    pub log_index: u64,
    /// When this service first saw the label (RFC 3339). Ops metadata only.
    pub inserted_at: String,
}

impl LabelRecord {
    pub fn new(label: Fr, block_number: u64, log_index: u64) -> Self {
        Self {
            label: field_to_hex(&label),
            block_number,
            log_index,
            inserted_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn label_field(&self) -> Result<Fr, AspError> {
        field_from_str(&self.label).map_err(AspError::Pool)
    }
}

#[derive(Serialize, Deserialize)]
struct RootRecord {
    last_published_root: String,
}

/// Persistence seam for the service; single-writer by contract.
pub trait LabelStore: Send {
    /// All records in insertion order. Empty when nothing was persisted yet.
    fn load(&mut self) -> Result<Vec<LabelRecord>, AspError>;

    /// Append one record durably.
    fn append(&mut self, record: &LabelRecord) -> Result<(), AspError>;

    /// Atomically replace the whole log (full rebuilds).
    fn replace_all(&mut self, records: &[LabelRecord]) -> Result<(), AspError>;

    fn last_published_root(&self) -> Result<Option<Fr>, AspError>;

    fn set_last_published_root(&mut self, root: Fr) -> Result<(), AspError>;
}

/// File-backed store under a single directory.
pub struct JsonlLabelStore {
    dir: PathBuf,
}

impl JsonlLabelStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AspError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    fn root_path(&self) -> PathBuf {
        self.dir.join(ROOT_FILE)
    }

    fn write_private(path: &PathBuf, contents: &str) -> Result<(), AspError> {
        fs::write(path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl LabelStore for JsonlLabelStore {
    fn load(&mut self) -> Result<Vec<LabelRecord>, AspError> {
        let path = self.labels_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    fn append(&mut self, record: &LabelRecord) -> Result<(), AspError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.labels_path())?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        file.sync_data()?;
        Ok(())
    }

    fn replace_all(&mut self, records: &[LabelRecord]) -> Result<(), AspError> {
        let tmp = self.dir.join(format!("{LABELS_FILE}.tmp"));
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Self::write_private(&tmp, &out)?;
        fs::rename(&tmp, self.labels_path())?;
        Ok(())
    }

    fn last_published_root(&self) -> Result<Option<Fr>, AspError> {
        let path = self.root_path();
        if !path.exists() {
            return Ok(None);
        }
        let record: RootRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok(Some(
            field_from_str(&record.last_published_root).map_err(AspError::Pool)?,
        ))
    }

    fn set_last_published_root(&mut self, root: Fr) -> Result<(), AspError> {
        let record = RootRecord {
            last_published_root: field_to_hex(&root),
        };
        Self::write_private(&self.root_path(), &serde_json::to_string_pretty(&record)?)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryLabelStore {
    records: Vec<LabelRecord>,
    last_published_root: Option<Fr>,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelStore for MemoryLabelStore {
    fn load(&mut self) -> Result<Vec<LabelRecord>, AspError> {
        Ok(self.records.clone())
    }

    fn append(&mut self, record: &LabelRecord) -> Result<(), AspError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn replace_all(&mut self, records: &[LabelRecord]) -> Result<(), AspError> {
        self.records = records.to_vec();
        Ok(())
    }

    fn last_published_root(&self) -> Result<Option<Fr>, AspError> {
        Ok(self.last_published_root)
    }

    fn set_last_published_root(&mut self, root: Fr) -> Result<(), AspError> {
        self.last_published_root = Some(root);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_round_trip() {
        let dir = std::env::temp_dir().join(format!("asp-store-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut store = JsonlLabelStore::open(&dir).unwrap();

        assert!(store.load().unwrap().is_empty());
        assert!(store.last_published_root().unwrap().is_none());

        let a = LabelRecord::new(Fr::from(0xAu64), 10, 0);
        let b = LabelRecord::new(Fr::from(0xBu64), 11, 2);
        store.append(&a).unwrap();
        store.append(&b).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![a.clone(), b.clone()]);
        assert_eq!(loaded[0].label_field().unwrap(), Fr::from(0xAu64));

        store.set_last_published_root(Fr::from(42u64)).unwrap();
        assert_eq!(store.last_published_root().unwrap(), Some(Fr::from(42u64)));

        store.replace_all(&[b.clone()]).unwrap();
        assert_eq!(store.load().unwrap(), vec![b]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let dir = std::env::temp_dir().join(format!("asp-store-blank-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let record = LabelRecord::new(Fr::from(1u64), 1, 0);
        fs::write(
            dir.join(LABELS_FILE),
            format!("\n{}\n\n", serde_json::to_string(&record).unwrap()),
        )
        .unwrap();

        let mut store = JsonlLabelStore::open(&dir).unwrap();
        assert_eq!(store.load().unwrap(), vec![record]);
        let _ = fs::remove_dir_all(&dir);
    }
}
