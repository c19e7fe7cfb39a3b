//! Local filesystem store.
//!
//! Layout under the root directory:
//!
//! ```text
//! config.json          option key/value pairs
//! records/<id>.json    one record per file
//! blobs/<id>.bin       blob contents
//! blobs/<id>.json      blob metadata
//! ```

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use cmsbridge_common::{BlobId, Error, RecordId, RecordTypeId, Result};

use crate::provider::{BlobMeta, BlobStore, ConfigStore, Record, RecordStore, RecordWrite};

const CONFIG_FILE: &str = "config.json";
const RECORDS_DIR: &str = "records";
const BLOBS_DIR: &str = "blobs";

/// Filesystem-backed record, blob and option storage.
pub struct LocalStore {
    root: PathBuf,
    /// Serializes id allocation and read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open a store rooted at `root`.
    ///
    /// # Postconditions
    /// - Root, record and blob directories exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        std::fs::create_dir_all(root.join(RECORDS_DIR))?;
        std::fs::create_dir_all(root.join(BLOBS_DIR))?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All records, ordered by numeric id.
    pub async fn records(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for id in self.ids(RECORDS_DIR, "json").await? {
            if let Some(record) =
                read_json::<Record>(&self.record_path(&RecordId::new(id.to_string()))).await?
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{}.json", id))
    }

    fn blob_data_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(BLOBS_DIR).join(format!("{}.bin", id))
    }

    fn blob_meta_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(BLOBS_DIR).join(format!("{}.json", id))
    }

    /// Numeric ids of the files with `extension` in `dir`, ascending.
    async fn ids(&self, dir: &str, extension: &str) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.join(dir)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    async fn next_id(&self, dir: &str, extension: &str) -> Result<u64> {
        Ok(self
            .ids(dir, extension)
            .await?
            .last()
            .map_or(1, |last| last + 1))
    }

    async fn blob_metas(&self) -> Result<Vec<BlobMeta>> {
        let mut metas = Vec::new();
        for id in self.ids(BLOBS_DIR, "json").await? {
            if let Some(meta) =
                read_json::<BlobMeta>(&self.blob_meta_path(&BlobId::new(id.to_string()))).await?
            {
                metas.push(meta);
            }
        }
        Ok(metas)
    }

    async fn stamp_blob(&self, id: &BlobId, remote_id: &str, pending: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.blob_meta_path(id);
        let mut meta = read_json::<BlobMeta>(&path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", id)))?;
        meta.remote_id = Some(remote_id.to_string());
        meta.remote_pending = pending;
        write_json(&path, &meta).await
    }

    async fn load_config(&self) -> Result<BTreeMap<String, String>> {
        Ok(read_json(&self.root.join(CONFIG_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn store_config(&self, config: &BTreeMap<String, String>) -> Result<()> {
        write_json(&self.root.join(CONFIG_FILE), config).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).await?;
    Ok(())
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn upsert(&self, write: RecordWrite) -> Result<RecordId> {
        let _guard = self.write_lock.lock().await;

        let record = match write.id.clone() {
            Some(id) => {
                let mut record = read_json::<Record>(&self.record_path(&id))
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Record not found: {}", id)))?;
                write.apply_to(&mut record);
                record
            }
            None => {
                let id = self.next_id(RECORDS_DIR, "json").await?;
                write.into_new_record(RecordId::new(id.to_string()))?
            }
        };

        write_json(&self.record_path(&record.id), &record).await?;
        tracing::debug!("Stored record {}", record.id);
        Ok(record.id)
    }

    async fn find_by_attribute(
        &self,
        record_type: Option<&RecordTypeId>,
        key: &str,
        value: &Value,
    ) -> Result<Vec<RecordId>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| record_type.map_or(true, |t| &r.record_type == t))
            .filter(|r| r.attributes.get(key) == Some(value))
            .map(|r| r.id)
            .collect())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        if id.as_str().parse::<u64>().is_err() {
            return Ok(None);
        }
        read_json(&self.record_path(id)).await
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn put(
        &self,
        data: Vec<u8>,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<BlobId> {
        let _guard = self.write_lock.lock().await;

        let id = BlobId::new(self.next_id(BLOBS_DIR, "json").await?.to_string());
        let meta = BlobMeta {
            id: id.clone(),
            file_name: file_name.to_string(),
            content_type: content_type.map(str::to_string),
            url: None,
            remote_id: None,
            remote_pending: false,
            size: data.len() as u64,
            created_at: Utc::now(),
        };

        fs::write(self.blob_data_path(&id), data).await?;
        write_json(&self.blob_meta_path(&id), &meta).await?;
        tracing::debug!("Stored blob {} ({} bytes)", id, meta.size);
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Option<BlobMeta>> {
        if id.as_str().parse::<u64>().is_err() {
            return Ok(None);
        }
        read_json(&self.blob_meta_path(id)).await
    }

    async fn read(&self, id: &BlobId) -> Result<Vec<u8>> {
        match fs::read(self.blob_data_path(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob not found: {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_remote_id(&self, id: &BlobId, remote_id: &str) -> Result<()> {
        self.stamp_blob(id, remote_id, false).await
    }

    async fn set_pending_remote_id(&self, id: &BlobId, remote_id: &str) -> Result<()> {
        self.stamp_blob(id, remote_id, true).await
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<BlobId>> {
        Ok(self
            .blob_metas()
            .await?
            .into_iter()
            .find(|meta| meta.remote_id.as_deref() == Some(remote_id))
            .map(|meta| meta.id))
    }
}

#[async_trait]
impl ConfigStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load_config().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load_config().await?;
        config.insert(key.to_string(), value.to_string());
        self.store_config(&config).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load_config().await?;
        if config.remove(key).is_some() {
            self.store_config(&config).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_record_upsert_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();

        let first = store
            .upsert(
                RecordWrite::insert(RecordTypeId::new("cwp_post"))
                    .with_title("Hello")
                    .with_attribute("contentful_id", "e1"),
            )
            .await
            .unwrap();
        let second = store
            .upsert(RecordWrite::insert(RecordTypeId::new("cwp_post")))
            .await
            .unwrap();
        assert_eq!(first.as_str(), "1");
        assert_eq!(second.as_str(), "2");

        let reopened = LocalStore::new(temp_dir.path()).unwrap();
        let record = RecordStore::get(&reopened, &first).await.unwrap().unwrap();
        assert_eq!(record.title.as_deref(), Some("Hello"));
        assert_eq!(record.contentful_id(), Some("e1"));

        let found = reopened
            .find_by_attribute(None, "contentful_id", &json!("e1"))
            .await
            .unwrap();
        assert_eq!(found, vec![first]);
    }

    #[tokio::test]
    async fn test_local_update_merges() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();

        let id = store
            .upsert(RecordWrite::insert(RecordTypeId::new("cwp_post")).with_attribute("a", 1))
            .await
            .unwrap();
        store
            .upsert(RecordWrite::update(id.clone()).with_attribute("b", 2))
            .await
            .unwrap();

        let attributes = store.get_attributes(&id).await.unwrap();
        assert_eq!(attributes["a"], json!(1));
        assert_eq!(attributes["b"], json!(2));
    }

    #[tokio::test]
    async fn test_local_missing_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();

        assert!(RecordStore::get(&store, &RecordId::new("7"))
            .await
            .unwrap()
            .is_none());
        assert!(RecordStore::get(&store, &RecordId::new("../x"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_local_blobs() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();

        let id = store
            .put(b"png bytes".to_vec(), "cover.png", Some("image/png"))
            .await
            .unwrap();
        store.set_remote_id(&id, "A1").await.unwrap();

        assert_eq!(store.find_by_remote_id("A1").await.unwrap(), Some(id.clone()));
        assert_eq!(store.find_by_remote_id("A2").await.unwrap(), None);
        assert_eq!(store.read(&id).await.unwrap(), b"png bytes".to_vec());

        let meta = BlobStore::get(&store, &id).await.unwrap().unwrap();
        assert_eq!(meta.file_name, "cover.png");
        assert_eq!(meta.remote_id.as_deref(), Some("A1"));
        assert!(!meta.remote_pending);

        store.set_pending_remote_id(&id, "A2").await.unwrap();
        let meta = BlobStore::get(&store, &id).await.unwrap().unwrap();
        assert_eq!(meta.remote_id.as_deref(), Some("A2"));
        assert!(meta.remote_pending);
    }

    #[tokio::test]
    async fn test_local_config() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();

        store.set("contentful_space", "space1").await.unwrap();
        assert_eq!(
            ConfigStore::get(&store, "contentful_space")
                .await
                .unwrap()
                .as_deref(),
            Some("space1")
        );

        store.remove("contentful_space").await.unwrap();
        assert_eq!(
            ConfigStore::get(&store, "contentful_space").await.unwrap(),
            None
        );
    }
}
