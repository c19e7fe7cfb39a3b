//! Collaborator trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use cmsbridge_common::{BlobId, Error, RecordId, RecordTypeId, Result};

/// Bookkeeping attribute holding the remote entry id of a linked record.
pub const CONTENTFUL_ID: &str = "contentful_id";
/// Bookkeeping attribute holding the last known remote version.
pub const CONTENTFUL_VERSION: &str = "contentful_version";

/// Flat attribute map of a record.
pub type Attributes = BTreeMap<String, Value>;

/// A typed local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Host-assigned identifier.
    pub id: RecordId,
    /// Record type the record belongs to.
    pub record_type: RecordTypeId,
    /// Display title.
    pub title: Option<String>,
    /// Creation time as reported by the origin of the record.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// Attributes, including engine bookkeeping.
    #[serde(default)]
    pub attributes: Attributes,
}

impl Record {
    /// Remote entry id, present once the record is linked.
    pub fn contentful_id(&self) -> Option<&str> {
        self.attributes
            .get(CONTENTFUL_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Last known remote version.
    ///
    /// Accepts both numeric and string storage, since hosts differ.
    pub fn contentful_version(&self) -> Option<u64> {
        match self.attributes.get(CONTENTFUL_VERSION)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether the record has ever been linked to a remote entry.
    pub fn is_linked(&self) -> bool {
        self.contentful_id().is_some()
    }
}

/// An insert or partial update of a record.
///
/// Attributes are merged into the stored ones; `None` metadata fields keep
/// their stored value.
#[derive(Debug, Clone, Default)]
pub struct RecordWrite {
    /// Target record; `None` inserts.
    pub id: Option<RecordId>,
    /// Record type, required on insert.
    pub record_type: Option<RecordTypeId>,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub attributes: Attributes,
}

impl RecordWrite {
    /// Start an insert of a new record.
    pub fn insert(record_type: RecordTypeId) -> Self {
        Self {
            record_type: Some(record_type),
            ..Self::default()
        }
    }

    /// Start an update of an existing record.
    pub fn update(id: RecordId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Set one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Apply this write onto `record`.
    pub fn apply_to(self, record: &mut Record) {
        if let Some(title) = self.title {
            record.title = Some(title);
        }
        if let Some(created_at) = self.created_at {
            record.created_at = Some(created_at);
        }
        if let Some(modified_at) = self.modified_at {
            record.modified_at = Some(modified_at);
        }
        record.attributes.extend(self.attributes);
    }

    /// Build a fresh record for an insert.
    ///
    /// # Errors
    /// - `InvalidInput` if no record type was given
    pub fn into_new_record(self, id: RecordId) -> Result<Record> {
        let record_type = self.record_type.clone().ok_or_else(|| {
            Error::InvalidInput("A record type is required to insert a record".to_string())
        })?;

        let mut record = Record {
            id,
            record_type,
            title: None,
            created_at: None,
            modified_at: None,
            attributes: Attributes::new(),
        };
        self.apply_to(&mut record);
        Ok(record)
    }
}

/// Host record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update a record and return its id.
    ///
    /// # Errors
    /// - `NotFound` when updating an id that does not exist
    /// - `InvalidInput` when inserting without a record type
    async fn upsert(&self, write: RecordWrite) -> Result<RecordId>;

    /// Ids of records whose attribute `key` equals `value`, oldest first.
    ///
    /// `record_type = None` searches every record type.
    async fn find_by_attribute(
        &self,
        record_type: Option<&RecordTypeId>,
        key: &str,
        value: &Value,
    ) -> Result<Vec<RecordId>>;

    /// Fetch a record.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Attributes of a record.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    async fn get_attributes(&self, id: &RecordId) -> Result<Attributes> {
        self.get(id)
            .await?
            .map(|record| record.attributes)
            .ok_or_else(|| Error::NotFound(format!("Record not found: {}", id)))
    }
}

/// Metadata of a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub id: BlobId,
    pub file_name: String,
    pub content_type: Option<String>,
    /// Publicly reachable URL, if the host serves the blob.
    pub url: Option<String>,
    /// Remote asset id once the blob is known remotely.
    pub remote_id: Option<String>,
    /// The remote asset exists but was not processed and published yet.
    #[serde(default)]
    pub remote_pending: bool,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Host blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return the new blob id.
    async fn put(&self, data: Vec<u8>, file_name: &str, content_type: Option<&str>)
        -> Result<BlobId>;

    /// Metadata of a blob.
    async fn get(&self, id: &BlobId) -> Result<Option<BlobMeta>>;

    /// Contents of a blob.
    ///
    /// # Errors
    /// - `NotFound` if the blob does not exist
    async fn read(&self, id: &BlobId) -> Result<Vec<u8>>;

    /// Stamp a blob with the published remote asset it corresponds to.
    async fn set_remote_id(&self, id: &BlobId, remote_id: &str) -> Result<()>;

    /// Stamp a blob with a remote asset whose lifecycle is unfinished.
    async fn set_pending_remote_id(&self, id: &BlobId, remote_id: &str) -> Result<()>;

    /// Blob already mapped to `remote_id`, if any.
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<BlobId>>;
}

/// Host option storage for opaque key/value settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}
