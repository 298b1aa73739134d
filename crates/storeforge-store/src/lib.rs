//! Store records and the durable record stores behind them.
//!
//! This crate provides the storage layer: the `StoreRecord` model and its
//! status enums, the `RecordStore` capability the orchestrator writes through,
//! an in-memory `MemoryRecordStore`, and a file-backed `FileRecordStore` that
//! keeps one checksummed JSON document per store with atomic writes.

pub mod file;
pub mod layout;
pub mod memory;
pub mod types;

pub use file::FileRecordStore;
pub use layout::{RecordLayout, RECORD_FORMAT_VERSION};
pub use memory::MemoryRecordStore;
pub use types::{
    StatusUpdate, StatusView, StoreId, StoreRecord, StoreStatus, StoreType, UnknownStoreType,
    NAMESPACE_PREFIX,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store record not found: {0}")]
    RecordNotFound(String),
    #[error("invalid store id: '{0}'")]
    InvalidId(String),
    #[error("store record already exists: {0}")]
    DuplicateId(String),
    #[error("integrity check failed for record '{id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("record store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("record store lock poisoned")]
    Poisoned,
}

/// Durable CRUD over store records, keyed by store id.
///
/// Implementations must be safe to share between the request path and any
/// number of background provisioning tasks.
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails with `DuplicateId` if the id is taken.
    fn create(&self, record: &StoreRecord) -> Result<StoreRecord, StoreError>;

    /// All records, most recently created first.
    fn find_all(&self) -> Result<Vec<StoreRecord>, StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<StoreRecord>, StoreError>;

    /// Persist a status transition and return the updated record.
    fn update_status(&self, id: &str, update: &StatusUpdate) -> Result<StoreRecord, StoreError>;

    /// Remove a record. Returns whether a record was actually removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Cheap liveness probe used by health reporting.
    fn ping(&self) -> Result<(), StoreError> {
        self.count().map(|_| ())
    }
}

/// Newest first, ties broken by id so listings are stable.
pub(crate) fn sort_newest_first(records: &mut [StoreRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
