use crate::{sort_newest_first, RecordStore, StatusUpdate, StoreError, StoreRecord};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Process-local record store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, StoreRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn create(&self, record: &StoreRecord) -> Result<StoreRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.contains_key(record.id.as_str()) {
            return Err(StoreError::DuplicateId(record.id.to_string()));
        }
        records.insert(record.id.to_string(), record.clone());
        Ok(record.clone())
    }

    fn find_all(&self) -> Result<Vec<StoreRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<StoreRecord> = records.values().cloned().collect();
        sort_newest_first(&mut all);
        Ok(all)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(id).cloned())
    }

    fn update_status(&self, id: &str, update: &StatusUpdate) -> Result<StoreRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_owned()))?;
        record.apply(update);
        Ok(record.clone())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        Ok(records.remove(id).is_some())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.len())
    }
}
