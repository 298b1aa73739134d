use crate::layout::RecordLayout;
use crate::{fsync_dir, sort_newest_first, RecordStore, StatusUpdate, StoreError, StoreRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// On-disk envelope: the record plus a blake3 checksum over its canonical JSON.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(flatten)]
    record: StoreRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

fn compute_checksum(record: &StoreRecord) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(record)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// Ids become file names, so anything outside `[a-zA-Z0-9_-]` can never exist.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Record store keeping one checksummed JSON file per store.
///
/// Writes go through a temp file, `fsync`, and an atomic rename followed by a
/// directory `fsync`. Mutations are serialized through an internal lock so a
/// read-modify-write of one record never interleaves with another.
pub struct FileRecordStore {
    layout: RecordLayout,
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Open (and initialize if needed) a record store rooted at `layout`.
    pub fn open(layout: RecordLayout) -> Result<Self, StoreError> {
        layout.initialize()?;
        Ok(Self {
            layout,
            write_lock: Mutex::new(()),
        })
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    fn put(&self, record: &StoreRecord) -> Result<(), StoreError> {
        let dest = self.layout.record_path(&record.id);
        let stored = StoredRecord {
            checksum: Some(compute_checksum(record)?),
            record: record.clone(),
        };
        let content = serde_json::to_string_pretty(&stored)?;

        let dir = self.layout.records_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let path = self.layout.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let stored: StoredRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = stored.checksum {
            let actual = compute_checksum(&stored.record)?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    id: id.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(stored.record))
    }

    fn record_ids(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.records_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let name = entry.file_name();
                let name_str = name.to_str().unwrap_or("");
                if is_valid_id(name_str) {
                    ids.push(name_str.to_owned());
                }
            }
        }
        Ok(ids)
    }
}

impl RecordStore for FileRecordStore {
    fn create(&self, record: &StoreRecord) -> Result<StoreRecord, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        if !is_valid_id(&record.id) {
            return Err(StoreError::InvalidId(record.id.to_string()));
        }
        if self.layout.record_path(&record.id).exists() {
            return Err(StoreError::DuplicateId(record.id.to_string()));
        }
        self.put(record)?;
        tracing::debug!(store_id = %record.id, "record created");
        Ok(record.clone())
    }

    fn find_all(&self) -> Result<Vec<StoreRecord>, StoreError> {
        let mut results = Vec::new();
        for id in self.record_ids()? {
            match self.read(&id) {
                Ok(Some(record)) => results.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping corrupted store record '{id}': {e}");
                }
            }
        }
        sort_newest_first(&mut results);
        Ok(results)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        self.read(id)
    }

    fn update_status(&self, id: &str, update: &StatusUpdate) -> Result<StoreRecord, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut record = self
            .read(id)?
            .ok_or_else(|| StoreError::RecordNotFound(id.to_owned()))?;
        record.apply(update);
        self.put(&record)?;
        tracing::debug!(store_id = %id, status = %record.status, "record status updated");
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        if !is_valid_id(id) {
            return Ok(false);
        }
        let path = self.layout.record_path(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        fsync_dir(&self.layout.records_dir())?;
        Ok(true)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.record_ids()?.len())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.layout.verify_version()
    }
}
