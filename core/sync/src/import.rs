//! Remote to local import.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cmsbridge_common::{Error, RecordId, RecordTypeId, Result};
use cmsbridge_remote::{Collection, Entry, Fields};
use cmsbridge_storage::{RecordWrite, CONTENTFUL_ID, CONTENTFUL_VERSION};

use crate::codec::{ensure_ok, FieldValueCodec};
use crate::gate::PushGate;
use crate::report::Notices;
use crate::schema::Catalog;

/// Summary of one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Number of entry pages fetched.
    pub pages: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Entries of content types outside the selection.
    pub skipped: usize,
    pub notices: Notices,
}

impl ImportReport {
    /// Entries written locally, new or updated.
    pub fn imported(&self) -> usize {
        self.inserted + self.updated
    }
}

/// An entry whose record exists but whose fields are not decoded yet.
struct Staged {
    record_id: RecordId,
    record_type: RecordTypeId,
    entry_id: String,
    fields: Fields,
}

/// Paginated, two-pass import of a space's entries.
///
/// The first pass creates or matches one record per entry and writes its
/// metadata and bookkeeping. The second pass decodes fields, so entry links
/// between entries of the same run resolve regardless of page order.
pub struct ImportEngine<'a> {
    codec: FieldValueCodec<'a>,
    gate: &'a PushGate,
    page_size: u64,
}

impl<'a> ImportEngine<'a> {
    pub fn new(codec: FieldValueCodec<'a>, gate: &'a PushGate, page_size: u64) -> Self {
        Self {
            codec,
            gate,
            page_size,
        }
    }

    /// Import every entry whose content type is both compiled in `catalog`
    /// and listed in `selected`.
    ///
    /// Holds the push gate for the whole run.
    ///
    /// # Errors
    /// - `Validation` if `selected` is empty
    /// - `Auth`, `Transport` or `Remote` if a page cannot be fetched
    ///
    /// Failures on single entries are reported as notices instead.
    pub async fn import_entries(
        &self,
        catalog: &Catalog,
        selected: &[String],
    ) -> Result<ImportReport> {
        if selected.is_empty() {
            return Err(Error::Validation(
                "Please select at least one content type to import".to_string(),
            ));
        }

        let _guard = self.gate.hold();
        let mut report = ImportReport::default();
        let mut staged = Vec::new();

        info!("Importing entries of space {}", self.codec.space());

        let mut skip = 0;
        let mut limit = self.page_size;
        loop {
            let body = ensure_ok(
                self.codec
                    .client()
                    .entries_page(self.codec.space(), skip, limit)
                    .await?,
            )?;
            let page: Collection<Value> = serde_json::from_value(body)?;
            report.pages += 1;

            debug!(
                "Fetched page skip={} limit={} total={} ({} items)",
                skip,
                page.limit,
                page.total,
                page.items.len()
            );

            for item in page.items {
                match serde_json::from_value::<Entry>(item) {
                    Ok(entry) => {
                        self.stage(entry, catalog, selected, &mut staged, &mut report)
                            .await
                    }
                    Err(e) => report
                        .notices
                        .warn(format!("Skipped an undecodable entry: {}", e)),
                }
            }

            if page.limit == 0 || skip + page.limit >= page.total {
                break;
            }
            skip += page.limit;
            limit = page.limit;
        }

        for entry in staged {
            let field_types = catalog.field_types(&entry.record_type);
            let decoded = self.codec.decode(&entry.fields, &field_types).await;
            report.notices.extend(decoded.notices);

            let mut write = RecordWrite::update(entry.record_id.clone());
            write.title = decoded.title;
            write.attributes = decoded.attributes;

            if let Err(e) = self.codec.records().upsert(write).await {
                warn!("Failed to store fields of entry {}: {}", entry.entry_id, e);
                report
                    .notices
                    .error(format!("Entry {} could not be saved: {}", entry.entry_id, e));
            }
        }

        info!(
            "Import finished: {} inserted, {} updated, {} skipped over {} pages",
            report.inserted, report.updated, report.skipped, report.pages
        );
        report.notices.info(format!(
            "{} entries imported ({} new, {} updated)",
            report.imported(),
            report.inserted,
            report.updated
        ));

        Ok(report)
    }

    async fn stage(
        &self,
        entry: Entry,
        catalog: &Catalog,
        selected: &[String],
        staged: &mut Vec<Staged>,
        report: &mut ImportReport,
    ) {
        let record_type = entry
            .content_type_id()
            .filter(|ct| selected.iter().any(|s| s == ct))
            .and_then(|ct| catalog.record_type_for(ct));
        let Some(record_type) = record_type.cloned() else {
            report.skipped += 1;
            return;
        };

        let entry_id = entry.id().to_string();
        if entry_id.is_empty() {
            report.notices.warn("Skipped an entry without id");
            return;
        }

        match self.upsert_metadata(&entry, &record_type).await {
            Ok((record_id, inserted)) => {
                if inserted {
                    report.inserted += 1;
                } else {
                    report.updated += 1;
                }
                staged.push(Staged {
                    record_id,
                    record_type,
                    entry_id,
                    fields: entry.fields,
                });
            }
            Err(e) => {
                warn!("Failed to import entry {}: {}", entry_id, e);
                report
                    .notices
                    .error(format!("Entry {} could not be imported: {}", entry_id, e));
            }
        }
    }

    /// Insert or update the record of `entry`, returning its id and whether
    /// it was new.
    async fn upsert_metadata(
        &self,
        entry: &Entry,
        record_type: &RecordTypeId,
    ) -> Result<(RecordId, bool)> {
        let existing = self
            .codec
            .records()
            .find_by_attribute(Some(record_type), CONTENTFUL_ID, &json!(entry.id()))
            .await?
            .into_iter()
            .next();
        let inserted = existing.is_none();

        let mut write = match existing {
            Some(id) => RecordWrite::update(id),
            None => RecordWrite::insert(record_type.clone()),
        };
        write.created_at = entry.sys.created_at;
        write.modified_at = entry.sys.updated_at;
        write = write.with_attribute(CONTENTFUL_ID, entry.id());
        if let Some(version) = entry.sys.version {
            write = write.with_attribute(CONTENTFUL_VERSION, version);
        }

        let id = self.codec.records().upsert(write).await?;
        Ok((id, inserted))
    }
}

/// Metadata write for an entry fetched outside an import.
pub(crate) fn entry_metadata(
    write: RecordWrite,
    entry_id: &str,
    version: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
) -> RecordWrite {
    let mut write = write.with_attribute(CONTENTFUL_ID, entry_id);
    if let Some(version) = version {
        write = write.with_attribute(CONTENTFUL_VERSION, version);
    }
    if updated_at.is_some() {
        write.modified_at = updated_at;
    }
    write
}
