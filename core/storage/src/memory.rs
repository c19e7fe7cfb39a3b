//! In-memory collaborators for testing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use cmsbridge_common::{BlobId, Error, RecordId, RecordTypeId, Result};

use crate::provider::{BlobMeta, BlobStore, ConfigStore, Record, RecordStore, RecordWrite};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Storage("In-memory store lock poisoned".to_string()))
}

/// Callback invoked after every record write, the way a host fires its
/// save hooks.
pub type UpsertHook = Box<dyn Fn(&Record) + Send + Sync>;

struct RecordTable {
    next_id: u64,
    records: BTreeMap<u64, Record>,
}

/// In-memory record store.
///
/// Ids are sequential integers, so iteration order is insertion order.
pub struct MemoryRecordStore {
    table: Mutex<RecordTable>,
    hook: Option<UpsertHook>,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(RecordTable {
                next_id: 1,
                records: BTreeMap::new(),
            }),
            hook: None,
        }
    }

    /// Create a store that calls `hook` after every upsert.
    pub fn with_upsert_hook(hook: UpsertHook) -> Self {
        Self {
            hook: Some(hook),
            ..Self::new()
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        lock(&self.table).map(|t| t.records.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<Record> {
        lock(&self.table)
            .map(|t| t.records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn key(id: &RecordId) -> Result<u64> {
        id.as_str()
            .parse()
            .map_err(|_| Error::NotFound(format!("Record not found: {}", id)))
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, write: RecordWrite) -> Result<RecordId> {
        let stored = {
            let mut table = lock(&self.table)?;
            match write.id.clone() {
                Some(id) => {
                    let key = Self::key(&id)?;
                    let record = table
                        .records
                        .get_mut(&key)
                        .ok_or_else(|| Error::NotFound(format!("Record not found: {}", id)))?;
                    write.apply_to(record);
                    record.clone()
                }
                None => {
                    let key = table.next_id;
                    let record = write.into_new_record(RecordId::new(key.to_string()))?;
                    table.next_id += 1;
                    table.records.insert(key, record.clone());
                    record
                }
            }
        };

        if let Some(hook) = &self.hook {
            hook(&stored);
        }

        Ok(stored.id)
    }

    async fn find_by_attribute(
        &self,
        record_type: Option<&RecordTypeId>,
        key: &str,
        value: &Value,
    ) -> Result<Vec<RecordId>> {
        let table = lock(&self.table)?;
        Ok(table
            .records
            .values()
            .filter(|r| record_type.map_or(true, |t| &r.record_type == t))
            .filter(|r| r.attributes.get(key) == Some(value))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let Ok(key) = Self::key(id) else {
            return Ok(None);
        };
        Ok(lock(&self.table)?.records.get(&key).cloned())
    }
}

struct BlobTable {
    next_id: u64,
    blobs: BTreeMap<u64, (BlobMeta, Vec<u8>)>,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    table: Mutex<BlobTable>,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(BlobTable {
                next_id: 1,
                blobs: BTreeMap::new(),
            }),
        }
    }

    /// Store a blob that the host also serves at `url`.
    pub fn put_public(&self, data: Vec<u8>, file_name: &str, url: &str) -> Result<BlobId> {
        let mut table = lock(&self.table)?;
        let key = table.next_id;
        table.next_id += 1;

        let meta = BlobMeta {
            id: BlobId::new(key.to_string()),
            file_name: file_name.to_string(),
            content_type: None,
            url: Some(url.to_string()),
            remote_id: None,
            remote_pending: false,
            size: data.len() as u64,
            created_at: Utc::now(),
        };
        let id = meta.id.clone();
        table.blobs.insert(key, (meta, data));
        Ok(id)
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        lock(&self.table).map(|t| t.blobs.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(id: &BlobId) -> Option<u64> {
        id.as_str().parse().ok()
    }

    fn stamp(&self, id: &BlobId, remote_id: &str, pending: bool) -> Result<()> {
        let mut table = lock(&self.table)?;
        let (meta, _) = Self::key(id)
            .and_then(|key| table.blobs.get_mut(&key))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", id)))?;
        meta.remote_id = Some(remote_id.to_string());
        meta.remote_pending = pending;
        Ok(())
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        data: Vec<u8>,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<BlobId> {
        let mut table = lock(&self.table)?;
        let key = table.next_id;
        table.next_id += 1;

        let meta = BlobMeta {
            id: BlobId::new(key.to_string()),
            file_name: file_name.to_string(),
            content_type: content_type.map(str::to_string),
            url: None,
            remote_id: None,
            remote_pending: false,
            size: data.len() as u64,
            created_at: Utc::now(),
        };
        let id = meta.id.clone();
        table.blobs.insert(key, (meta, data));
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Option<BlobMeta>> {
        let Some(key) = Self::key(id) else {
            return Ok(None);
        };
        Ok(lock(&self.table)?.blobs.get(&key).map(|(meta, _)| meta.clone()))
    }

    async fn read(&self, id: &BlobId) -> Result<Vec<u8>> {
        Self::key(id)
            .and_then(|key| {
                lock(&self.table)
                    .ok()
                    .and_then(|t| t.blobs.get(&key).map(|(_, data)| data.clone()))
            })
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", id)))
    }

    async fn set_remote_id(&self, id: &BlobId, remote_id: &str) -> Result<()> {
        self.stamp(id, remote_id, false)
    }

    async fn set_pending_remote_id(&self, id: &BlobId, remote_id: &str) -> Result<()> {
        self.stamp(id, remote_id, true)
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<BlobId>> {
        let table = lock(&self.table)?;
        Ok(table
            .blobs
            .values()
            .find(|(meta, _)| meta.remote_id.as_deref() == Some(remote_id))
            .map(|(meta, _)| meta.id.clone()))
    }
}

/// In-memory option storage.
#[derive(Default)]
pub struct MemoryConfig {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryConfig {
    /// Create a new empty config.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfig {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values)?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values)?.remove(key);
        Ok(())
    }
}
