use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current record store format version. Incremented on incompatible layout changes.
pub const RECORD_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a file-backed record store.
///
/// ```text
/// <root>/version          format marker
/// <root>/records/<id>     one JSON document per store
/// ```
#[derive(Debug, Clone)]
pub struct RecordLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct FormatVersion {
    format_version: u32,
}

impl RecordLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    #[inline]
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.records_dir().join(id)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.records_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = FormatVersion {
                format_version: RECORD_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: FormatVersion = serde_json::from_str(&content)?;

        if ver.format_version != RECORD_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: RECORD_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
