//! Local to remote push and the companion resync.

use serde_json::Value;
use tracing::{debug, info, warn};

use cmsbridge_common::{Error, RemoteError, Result};
use cmsbridge_remote::{decode_body, Entry};
use cmsbridge_storage::{Attributes, Record, RecordWrite, CONTENTFUL_ID, CONTENTFUL_VERSION};

use crate::codec::FieldValueCodec;
use crate::conflict::ConflictInfo;
use crate::gate::PushGate;
use crate::import::entry_metadata;
use crate::report::Notices;
use crate::schema::Catalog;

/// Why a save did not reach the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The save came from the engine itself.
    GateHeld,
    /// The record type is not compiled from a content type.
    NotSynchronized,
    /// No space has been selected.
    NoSpace,
}

/// Result of pushing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Skipped(SkipReason),
    /// A new remote entry was created.
    Created { remote_id: String, version: Option<u64> },
    /// The linked remote entry was updated.
    Updated { remote_id: String, version: Option<u64> },
    /// The remote rejected the stale version. Bookkeeping is unchanged.
    Conflict(ConflictInfo),
    /// The remote rejected the write for another reason.
    Rejected(RemoteError),
}

/// Outcome of a push plus what the operator should see.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub outcome: PushOutcome,
    /// Whether the entry was published after the write.
    pub published: bool,
    pub notices: Notices,
}

impl PushReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: PushOutcome::Skipped(reason),
            published: false,
            notices: Notices::new(),
        }
    }
}

/// Pushes saved records upstream.
pub struct PushEngine<'a> {
    codec: FieldValueCodec<'a>,
    gate: &'a PushGate,
}

impl<'a> PushEngine<'a> {
    pub fn new(codec: FieldValueCodec<'a>, gate: &'a PushGate) -> Self {
        Self { codec, gate }
    }

    /// Create or update the remote entry of `record`, then publish it.
    ///
    /// An unlinked record is created; a linked one is updated against its
    /// last known version. The gate is held throughout, so the bookkeeping
    /// written back does not trigger another push.
    ///
    /// # Errors
    /// - `Validation` if the record type is not in `catalog`
    /// - `Auth` or `Transport` if the create/update call fails to reach the remote
    /// - `Storage` if bookkeeping cannot be written
    pub async fn push(&self, record: &Record, catalog: &Catalog) -> Result<PushReport> {
        if self.gate.is_held() {
            return Ok(PushReport::skipped(SkipReason::GateHeld));
        }
        let _guard = self.gate.hold();

        let content_type = catalog.content_type_of(&record.record_type).ok_or_else(|| {
            Error::Validation(format!(
                "Record type {} is not synchronized",
                record.record_type
            ))
        })?;
        let field_types = catalog.field_types(&record.record_type);

        let encoded = self.codec.encode(record, &field_types).await;
        let mut notices = encoded.notices;
        let mut bookkeeping = encoded.bookkeeping;

        let client = self.codec.client();
        let space = self.codec.space();
        let linked = record.contentful_id();

        let body = match linked {
            None => {
                debug!("Creating entry of {} for record {}", content_type, record.id);
                client
                    .create_entry(space, content_type, encoded.fields)
                    .await?
            }
            Some(remote_id) => {
                let version = record.contentful_version().unwrap_or_default();
                debug!(
                    "Updating entry {} at version {} for record {}",
                    remote_id, version, record.id
                );
                client
                    .update_entry(space, remote_id, content_type, version, encoded.fields)
                    .await?
            }
        };

        if let Some(err) = RemoteError::from_body(&body) {
            self.persist(record, bookkeeping).await?;

            let outcome = match ConflictInfo::from_remote_error(record, &err) {
                Some(conflict) => {
                    warn!("{}", conflict);
                    notices.error(conflict.to_string());
                    PushOutcome::Conflict(conflict)
                }
                None => {
                    warn!("Push of record {} rejected: {}", record.id, err);
                    notices.error(format!("Record {} was rejected: {}", record.id, err));
                    PushOutcome::Rejected(err)
                }
            };
            return Ok(PushReport {
                outcome,
                published: false,
                notices,
            });
        }

        let entry: Entry = decode_body(body)?;
        let remote_id = entry.id().to_string();
        if remote_id.is_empty() {
            return Err(Error::Transport(
                "Entry response carries no id".to_string(),
            ));
        }
        let mut version = entry.sys.version;

        bookkeeping.insert(CONTENTFUL_ID.to_string(), Value::from(remote_id.as_str()));
        if let Some(v) = version {
            bookkeeping.insert(CONTENTFUL_VERSION.to_string(), Value::from(v));
        }

        let mut published = false;
        if let Some(v) = version {
            match client.publish_entry(space, &remote_id, v).await {
                Ok(body) => match RemoteError::from_body(&body) {
                    Some(err) => {
                        warn!("Publishing entry {} failed: {}", remote_id, err);
                        notices.warn(format!("Entry {} was saved but not published: {}", remote_id, err));
                    }
                    None => {
                        published = true;
                        if let Some(v) = body
                            .get("sys")
                            .and_then(|sys| sys.get("version"))
                            .and_then(Value::as_u64)
                        {
                            version = Some(v);
                            bookkeeping.insert(CONTENTFUL_VERSION.to_string(), Value::from(v));
                        }
                    }
                },
                Err(e) => {
                    warn!("Publishing entry {} failed: {}", remote_id, e);
                    notices.warn(format!("Entry {} was saved but not published: {}", remote_id, e));
                }
            }
        }

        self.persist(record, bookkeeping).await?;

        info!("Pushed record {} to entry {}", record.id, remote_id);
        let outcome = match linked {
            None => PushOutcome::Created { remote_id, version },
            Some(_) => PushOutcome::Updated { remote_id, version },
        };
        Ok(PushReport {
            outcome,
            published,
            notices,
        })
    }

    async fn persist(&self, record: &Record, bookkeeping: Attributes) -> Result<()> {
        if bookkeeping.is_empty() {
            return Ok(());
        }
        let mut write = RecordWrite::update(record.id.clone());
        write.attributes = bookkeeping;
        self.codec.records().upsert(write).await?;
        Ok(())
    }

    /// Overwrite `record` with the current remote state of its entry.
    ///
    /// Returns `false` without touching the record when it is unlinked or
    /// the remote read fails in any way.
    ///
    /// # Errors
    /// - `Storage` if the refreshed record cannot be written
    pub async fn resync(&self, record: &Record, catalog: &Catalog) -> Result<bool> {
        let Some(remote_id) = record.contentful_id() else {
            return Ok(false);
        };

        let body = match self.codec.client().entry(self.codec.space(), remote_id).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Resync of record {} skipped: {}", record.id, e);
                return Ok(false);
            }
        };
        if let Some(err) = RemoteError::from_body(&body) {
            debug!("Resync of record {} skipped: {}", record.id, err);
            return Ok(false);
        }
        let entry: Entry = match serde_json::from_value(body) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Resync of record {} skipped: {}", record.id, e);
                return Ok(false);
            }
        };

        let _guard = self.gate.hold();

        let field_types = catalog.field_types(&record.record_type);
        let decoded = self.codec.decode(&entry.fields, &field_types).await;
        for notice in decoded.notices.iter() {
            debug!("Resync of record {}: {}", record.id, notice);
        }

        let mut write = RecordWrite::update(record.id.clone());
        write.title = decoded.title;
        write.attributes = decoded.attributes;
        let entry_id = if entry.id().is_empty() { remote_id } else { entry.id() };
        let write = entry_metadata(write, entry_id, entry.sys.version, entry.sys.updated_at);

        self.codec.records().upsert(write).await?;
        debug!("Resynced record {} from entry {}", record.id, entry_id);
        Ok(true)
    }
}
