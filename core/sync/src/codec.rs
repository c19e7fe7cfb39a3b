//! Translation between remote entry fields and local record attributes.
//!
//! Remote fields are locale-keyed and may hold arrays and typed links.
//! Locally every field is a flat attribute. Arrays become a repeater
//! family (`<f>_repeater_<i>_<f>` plus the count `<f>_repeater`), and each
//! link leaves engine-owned bookkeeping next to the value
//! (`_contentful_<attr>` with the remote id, `_contentful_type_<attr>` with
//! the link kind).

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use cmsbridge_common::{BlobId, Error, RecordId, RemoteError, Result, SpaceId};
use cmsbridge_remote::model::pick_locale;
use cmsbridge_remote::{decode_body, Asset, Fields, LinkRef, LinkType, RemoteClient};
use cmsbridge_storage::{
    Attributes, BlobMeta, BlobStore, Record, RecordStore, CONTENTFUL_ID, CONTENTFUL_VERSION,
};

use crate::report::Notices;
use crate::schema::{
    parse_repeater_key, repeater_count_key, repeater_key, FieldTypeMap, ResolvedType,
    REPEATER_SUFFIX,
};

/// Bookkeeping attribute holding the remote id linked from `attribute`.
pub fn link_id_key(attribute: &str) -> String {
    format!("_contentful_{attribute}")
}

/// Bookkeeping attribute holding the link kind of `attribute`.
pub fn link_type_key(attribute: &str) -> String {
    format!("_contentful_type_{attribute}")
}

/// Fail with `Error::Remote` if `body` is a remote error body.
pub(crate) fn ensure_ok(body: Value) -> Result<Value> {
    match RemoteError::from_body(&body) {
        Some(err) => Err(Error::Remote(err)),
        None => Ok(body),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Portable form of a plain (non-link) remote value.
fn plain_value(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

/// Title claimed by a scalar. An empty string still claims it.
fn title_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Local id referenced by an attribute value.
fn referenced_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Result of decoding one entry's fields.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    /// Attributes to merge into the record, bookkeeping included.
    pub attributes: Attributes,
    /// Display title: the first scalar field, even when it is empty.
    pub title: Option<String>,
    pub notices: Notices,
}

/// Result of encoding one record.
#[derive(Debug, Clone, Default)]
pub struct Encoded {
    /// Locale-keyed remote field payload.
    pub fields: Fields,
    /// Bookkeeping produced while encoding (new asset links).
    pub bookkeeping: Attributes,
    pub notices: Notices,
}

/// Ordered accumulator of one repeated field.
///
/// Elements are indexed by their position in the remote array.
struct RepeaterFamily<'f> {
    field: &'f str,
    elements: Vec<(Option<Value>, Option<LinkRef>)>,
}

impl<'f> RepeaterFamily<'f> {
    fn new(field: &'f str) -> Self {
        Self {
            field,
            elements: Vec::new(),
        }
    }

    fn push(&mut self, value: Option<Value>, link: Option<LinkRef>) {
        self.elements.push((value, link));
    }

    fn write_into(self, attributes: &mut Attributes) {
        let count = self.elements.len();
        for (index, (value, link)) in self.elements.into_iter().enumerate() {
            let key = repeater_key(self.field, index);
            if let Some(link) = link {
                attributes.insert(link_id_key(&key), json!(link.id));
                attributes.insert(link_type_key(&key), json!(link.link_type.as_str()));
            }
            if let Some(value) = value {
                attributes.insert(key, value);
            }
        }
        attributes.insert(repeater_count_key(self.field), json!(count));
    }
}

/// Bidirectional field translator bound to one space and its collaborators.
pub struct FieldValueCodec<'a> {
    client: &'a RemoteClient,
    records: &'a dyn RecordStore,
    blobs: &'a dyn BlobStore,
    space: &'a SpaceId,
    locale: &'a str,
}

impl<'a> FieldValueCodec<'a> {
    pub fn new(
        client: &'a RemoteClient,
        records: &'a dyn RecordStore,
        blobs: &'a dyn BlobStore,
        space: &'a SpaceId,
        locale: &'a str,
    ) -> Self {
        Self {
            client,
            records,
            blobs,
            space,
            locale,
        }
    }

    pub fn client(&self) -> &'a RemoteClient {
        self.client
    }

    pub fn records(&self) -> &'a dyn RecordStore {
        self.records
    }

    pub fn space(&self) -> &'a SpaceId {
        self.space
    }

    pub fn locale(&self) -> &'a str {
        self.locale
    }

    /// Translate remote `fields` into local attributes.
    ///
    /// A link that fails to resolve skips only its own field, with a
    /// warning notice. Entry links whose target is not imported yet decode
    /// to absent without a notice.
    pub async fn decode(&self, fields: &Fields, field_types: &FieldTypeMap) -> Decoded {
        let mut decoded = Decoded::default();

        for (field, localized) in fields {
            let Some(value) = pick_locale(localized, self.locale) else {
                continue;
            };

            if LinkRef::has_marker(value) {
                self.decode_link(field, value, &mut decoded).await;
            } else if let Value::Array(items) = value {
                if field_types.get(field) == ResolvedType::Entries || all_entry_links(items) {
                    self.decode_entries(field, items, &mut decoded).await;
                } else {
                    self.decode_repeater(field, items, &mut decoded).await;
                }
            } else {
                let plain = plain_value(value);
                if decoded.title.is_none() {
                    decoded.title = title_of(&plain);
                }
                decoded.attributes.insert(field.clone(), plain);
            }
        }

        decoded
    }

    async fn decode_link(&self, field: &str, value: &Value, decoded: &mut Decoded) {
        let Some(link) = LinkRef::from_value(value) else {
            debug!("Field {} carries an unrecognised sys marker", field);
            return;
        };

        match self.resolve_link(&link).await {
            Ok(Some(local)) => {
                decoded.attributes.insert(field.to_string(), local);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Could not resolve {} link {} of field {}: {}", link.link_type.as_str(), link.id, field, e);
                decoded
                    .notices
                    .warn(format!("Field {} skipped: {}", field, e));
                return;
            }
        }

        decoded
            .attributes
            .insert(link_id_key(field), json!(link.id));
        decoded
            .attributes
            .insert(link_type_key(field), json!(link.link_type.as_str()));
    }

    async fn decode_entries(&self, field: &str, items: &[Value], decoded: &mut Decoded) {
        let mut local_ids = Vec::new();
        let mut remote_ids = Vec::new();

        for link in items.iter().filter_map(LinkRef::from_value) {
            match self.resolve_entry(&link.id).await {
                Ok(Some(id)) => local_ids.push(json!(id.as_str())),
                Ok(None) => debug!("Entry {} linked from {} is not imported yet", link.id, field),
                Err(e) => decoded
                    .notices
                    .warn(format!("Field {}: link to entry {} skipped: {}", field, link.id, e)),
            }
            remote_ids.push(json!(link.id));
        }

        decoded
            .attributes
            .insert(field.to_string(), Value::Array(local_ids));
        decoded
            .attributes
            .insert(link_id_key(field), Value::Array(remote_ids));
        decoded
            .attributes
            .insert(link_type_key(field), json!(LinkType::Entry.as_str()));
    }

    async fn decode_repeater(&self, field: &str, items: &[Value], decoded: &mut Decoded) {
        let mut family = RepeaterFamily::new(field);

        for item in items {
            if !LinkRef::has_marker(item) {
                family.push(Some(plain_value(item)), None);
                continue;
            }

            let Some(link) = LinkRef::from_value(item) else {
                family.push(None, None);
                continue;
            };

            match self.resolve_link(&link).await {
                Ok(local) => family.push(local, Some(link)),
                Err(e) => {
                    warn!("Could not resolve element {} of field {}: {}", link.id, field, e);
                    decoded
                        .notices
                        .warn(format!("Field {}: element {} skipped: {}", field, link.id, e));
                    family.push(None, Some(link));
                }
            }
        }

        family.write_into(&mut decoded.attributes);
    }

    /// Resolve a link to the local value stored for it.
    ///
    /// Assets resolve to a blob id, entries to a record id. `Ok(None)` means
    /// the target is not known locally.
    pub async fn resolve_link(&self, link: &LinkRef) -> Result<Option<Value>> {
        match link.link_type {
            LinkType::Asset => {
                let blob = self.resolve_asset(&link.id).await?;
                Ok(Some(json!(blob.as_str())))
            }
            LinkType::Entry => Ok(self
                .resolve_entry(&link.id)
                .await?
                .map(|id| json!(id.as_str()))),
            LinkType::Other => Ok(None),
        }
    }

    /// Local blob holding remote asset `asset_id`, downloading it once.
    pub async fn resolve_asset(&self, asset_id: &str) -> Result<BlobId> {
        if let Some(existing) = self.blobs.find_by_remote_id(asset_id).await? {
            debug!("Asset {} already stored as blob {}", asset_id, existing);
            return Ok(existing);
        }

        let asset = self.client.asset(self.space, asset_id).await?;
        let file = asset
            .file(self.locale)
            .ok_or_else(|| Error::NotFound(format!("Asset {} has no file", asset_id)))?;
        let url = file
            .download_url()
            .ok_or_else(|| Error::NotFound(format!("Asset {} has no file URL", asset_id)))?;

        let data = self.client.download(&url).await?;
        let blob = self
            .blobs
            .put(data, &file.resolved_file_name(), file.content_type.as_deref())
            .await?;
        self.blobs.set_remote_id(&blob, asset_id).await?;

        debug!("Downloaded asset {} into blob {}", asset_id, blob);
        Ok(blob)
    }

    /// Local record linked to remote entry `entry_id`, if imported.
    pub async fn resolve_entry(&self, entry_id: &str) -> Result<Option<RecordId>> {
        Ok(self
            .records
            .find_by_attribute(None, CONTENTFUL_ID, &json!(entry_id))
            .await?
            .into_iter()
            .next())
    }

    /// Build the remote field payload of `record`.
    ///
    /// Engine bookkeeping, repeater counts, and blank values are left out.
    /// A field that cannot be encoded is dropped with a warning notice.
    pub async fn encode(&self, record: &Record, field_types: &FieldTypeMap) -> Encoded {
        let mut encoded = Encoded::default();
        let mut plain: Vec<(&str, &Value)> = Vec::new();
        let mut repeated: BTreeMap<&str, BTreeMap<usize, (&str, &Value)>> = BTreeMap::new();

        for (key, value) in &record.attributes {
            if key.starts_with('_')
                || key == CONTENTFUL_ID
                || key == CONTENTFUL_VERSION
                || key.ends_with(REPEATER_SUFFIX)
                || is_blank(value)
            {
                continue;
            }

            match parse_repeater_key(key) {
                Some((field, index)) => {
                    let count = record
                        .attributes
                        .get(&repeater_count_key(field))
                        .and_then(Value::as_u64);
                    if count.is_some_and(|count| index as u64 >= count) {
                        continue;
                    }
                    repeated
                        .entry(field)
                        .or_default()
                        .insert(index, (key.as_str(), value));
                }
                None => plain.push((key.as_str(), value)),
            }
        }

        for (key, value) in plain {
            let resolved = field_types.get(key);
            if let Some(remote) = self.encode_value(key, key, resolved, value, &mut encoded).await {
                encoded
                    .fields
                    .insert(key.to_string(), self.localized(remote));
            }
        }

        for (field, elements) in repeated {
            let resolved = field_types.get(field);
            let mut values = Vec::with_capacity(elements.len());
            for (attribute, value) in elements.into_values() {
                if let Some(remote) = self
                    .encode_value(field, attribute, resolved, value, &mut encoded)
                    .await
                    .filter(|v| !is_blank(v))
                {
                    values.push(remote);
                }
            }
            if !values.is_empty() {
                encoded
                    .fields
                    .insert(field.to_string(), self.localized(Value::Array(values)));
            }
        }

        encoded
    }

    fn localized(&self, value: Value) -> Value {
        let mut map = Map::new();
        map.insert(self.locale.to_string(), value);
        Value::Object(map)
    }

    async fn encode_value(
        &self,
        field: &str,
        attribute: &str,
        resolved: ResolvedType,
        value: &Value,
        encoded: &mut Encoded,
    ) -> Option<Value> {
        let result = match resolved {
            ResolvedType::Asset | ResolvedType::Assets => self
                .encode_asset(attribute, value, encoded)
                .await
                .map(|link| Some(link.to_value())),
            ResolvedType::Entry | ResolvedType::Entries => {
                self.encode_entries(resolved, value).await
            }
            scalar => encode_scalar(scalar, value).map(Some),
        };

        match result {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Field {} not pushed: {}", field, e);
                encoded
                    .notices
                    .warn(format!("Field {} not pushed: {}", field, e));
                None
            }
        }
    }

    async fn encode_asset(
        &self,
        attribute: &str,
        value: &Value,
        encoded: &mut Encoded,
    ) -> Result<LinkRef> {
        let blob_id = referenced_id(value)
            .map(BlobId::new)
            .ok_or_else(|| Error::InvalidInput(format!("Not a blob reference: {}", value)))?;
        let meta = self
            .blobs
            .get(&blob_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", blob_id)))?;

        let asset_id = match meta.remote_id.clone() {
            Some(remote_id) if !meta.remote_pending => return Ok(LinkRef::asset(remote_id)),
            Some(remote_id) => {
                debug!("Resuming lifecycle of asset {} for blob {}", remote_id, blob_id);
                let current = self.client.asset(self.space, &remote_id).await?;
                let processed = current
                    .file(self.locale)
                    .and_then(|file| file.url)
                    .is_some();
                let version = current.sys.version.unwrap_or(1);
                self.finish_asset(&blob_id, &remote_id, version, processed)
                    .await?;
                remote_id
            }
            None => {
                let (asset_id, version) = self.create_asset(&blob_id, &meta).await?;
                debug!("Uploaded blob {} as asset {}", blob_id, asset_id);
                self.finish_asset(&blob_id, &asset_id, version, false)
                    .await?;
                asset_id
            }
        };

        encoded
            .bookkeeping
            .insert(link_id_key(attribute), json!(asset_id));
        encoded
            .bookkeeping
            .insert(link_type_key(attribute), json!(LinkType::Asset.as_str()));

        Ok(LinkRef::asset(asset_id))
    }

    /// Create the remote asset of a blob and map the blob to it at once, so
    /// a failing lifecycle step never leads to a second remote asset.
    ///
    /// Returns the asset id and its version.
    async fn create_asset(&self, blob_id: &BlobId, meta: &BlobMeta) -> Result<(String, u64)> {
        let mut file = json!({ "fileName": meta.file_name });
        if let Some(content_type) = meta.content_type.as_deref() {
            file["contentType"] = json!(content_type);
        }
        match meta.url.as_deref() {
            Some(url) => file["upload"] = json!(url),
            None => {
                let data = self.blobs.read(blob_id).await?;
                let upload = ensure_ok(self.client.upload(self.space, data).await?)?;
                let upload_id = upload
                    .get("sys")
                    .and_then(|sys| sys.get("id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Transport("Upload response has no id".to_string()))?;
                file["uploadFrom"] = json!({
                    "sys": { "type": "Link", "linkType": "Upload", "id": upload_id }
                });
            }
        }

        let fields = json!({
            "title": self.localized(json!(meta.file_name)),
            "file": self.localized(file),
        });
        let created: Asset = decode_body(self.client.create_asset(self.space, fields).await?)?;
        let asset_id = created
            .sys
            .id
            .clone()
            .ok_or_else(|| Error::Transport("Created asset has no id".to_string()))?;

        self.blobs.set_pending_remote_id(blob_id, &asset_id).await?;
        Ok((asset_id, created.sys.version.unwrap_or(1)))
    }

    /// Process (unless already processed) and publish a mapped asset, then
    /// mark the blob mapping as complete.
    async fn finish_asset(
        &self,
        blob_id: &BlobId,
        asset_id: &str,
        version: u64,
        processed: bool,
    ) -> Result<()> {
        let mut version = version;
        if !processed {
            ensure_ok(
                self.client
                    .process_asset(self.space, asset_id, self.locale, version)
                    .await?,
            )?;
            let current = self.client.asset(self.space, asset_id).await?;
            version = current.sys.version.unwrap_or(version);
        }

        ensure_ok(
            self.client
                .publish_asset(self.space, asset_id, version)
                .await?,
        )?;

        self.blobs.set_remote_id(blob_id, asset_id).await
    }

    async fn encode_entries(&self, resolved: ResolvedType, value: &Value) -> Result<Option<Value>> {
        let ids: Vec<String> = match value {
            Value::Array(items) => items.iter().filter_map(referenced_id).collect(),
            other => referenced_id(other).into_iter().collect(),
        };

        let mut links = Vec::with_capacity(ids.len());
        for id in ids {
            let linked = self
                .records
                .get(&RecordId::new(id.as_str()))
                .await?
                .and_then(|record| record.contentful_id().map(str::to_string));
            match linked {
                Some(remote_id) => links.push(LinkRef::entry(remote_id).to_value()),
                None => debug!("Record {} is not synced yet; link dropped", id),
            }
        }

        if resolved == ResolvedType::Entries {
            if links.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Value::Array(links)));
        }
        Ok(links.into_iter().next())
    }
}

fn all_entry_links(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            LinkRef::from_value(item).is_some_and(|link| link.link_type == LinkType::Entry)
        })
}

/// Integer part of `f`, if it fits an `i64`.
fn truncate_i64(f: f64) -> Option<i64> {
    let t = f.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is out of range.
    (t.is_finite() && (i64::MIN as f64..i64::MAX as f64).contains(&t)).then_some(t as i64)
}

/// Convert a local scalar attribute into its remote representation.
///
/// # Errors
/// - `InvalidInput` if a Number, Integer or Boolean value does not parse, or an
///   Integer does not fit 64 bits
pub fn encode_scalar(resolved: ResolvedType, value: &Value) -> Result<Value> {
    let invalid = || Error::InvalidInput(format!("Not a valid {:?} value: {}", resolved, value));

    match resolved {
        ResolvedType::Number => {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid)
        }
        ResolvedType::Integer => {
            let integer = match value {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_i64)),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().and_then(truncate_i64))
                }
                _ => None,
            };
            integer.map(Value::from).ok_or_else(invalid)
        }
        ResolvedType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid()),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Ok(Value::Bool(true)),
                "0" | "false" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        _ => Ok(match value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_))
                    if parsed.get("lat").is_some() && parsed.get("lon").is_some() =>
                {
                    parsed
                }
                _ => value.clone(),
            },
            other => other.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsbridge_common::RecordTypeId;
    use cmsbridge_remote::ClientConfig;
    use cmsbridge_storage::{MemoryBlobStore, MemoryRecordStore, RecordWrite};
    use proptest::prelude::*;

    fn offline_client() -> RemoteClient {
        RemoteClient::new(None, ClientConfig::default()).unwrap()
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        }
    }

    fn record(attributes: Value) -> Record {
        Record {
            id: RecordId::new("1"),
            record_type: RecordTypeId::new("cwp_post"),
            title: None,
            created_at: None,
            modified_at: None,
            attributes: serde_json::from_value(attributes).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_decode_scalars_and_title() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let decoded = codec
            .decode(
                &fields(json!({
                    "rating": { "en-US": 4 },
                    "title": { "en-US": "Hello" },
                    "where": { "en-US": { "lat": 1.5, "lon": 2.5 } }
                })),
                &FieldTypeMap::new(),
            )
            .await;

        assert_eq!(decoded.attributes["title"], json!("Hello"));
        assert_eq!(decoded.attributes["rating"], json!(4));
        assert_eq!(decoded.title.as_deref(), Some("4"));
        let location: Value =
            serde_json::from_str(decoded.attributes["where"].as_str().unwrap()).unwrap();
        assert_eq!(location, json!({ "lat": 1.5, "lon": 2.5 }));
        assert!(decoded.notices.is_empty());
    }

    #[tokio::test]
    async fn test_decode_empty_first_scalar_claims_title() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let decoded = codec
            .decode(
                &fields(json!({
                    "subtitle": { "en-US": "" },
                    "title": { "en-US": "Hello" }
                })),
                &FieldTypeMap::new(),
            )
            .await;

        assert_eq!(decoded.title.as_deref(), Some(""));
        assert_eq!(decoded.attributes["title"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_decode_prefers_active_locale() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let decoded = codec
            .decode(
                &fields(json!({ "title": { "de-DE": "Hallo", "en-US": "Hello" } })),
                &FieldTypeMap::new(),
            )
            .await;
        assert_eq!(decoded.attributes["title"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_decode_scalar_repeater() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let decoded = codec
            .decode(
                &fields(json!({ "tags": { "en-US": ["a", "b", "c"] } })),
                &FieldTypeMap::new(),
            )
            .await;

        assert_eq!(decoded.attributes["tags_repeater"], json!(3));
        assert_eq!(decoded.attributes["tags_repeater_0_tags"], json!("a"));
        assert_eq!(decoded.attributes["tags_repeater_2_tags"], json!("c"));
        assert!(decoded.title.is_none());
    }

    #[tokio::test]
    async fn test_decode_entry_links() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();

        let author = records
            .upsert(
                RecordWrite::insert(RecordTypeId::new("cwp_author"))
                    .with_attribute(CONTENTFUL_ID, "E2"),
            )
            .await
            .unwrap();

        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");
        let mut types = FieldTypeMap::new();
        types.insert("related", ResolvedType::Entries);

        let decoded = codec
            .decode(
                &fields(json!({
                    "author": { "en-US": LinkRef::entry("E2").to_value() },
                    "ghost": { "en-US": LinkRef::entry("E404").to_value() },
                    "related": { "en-US": [
                        LinkRef::entry("E2").to_value(),
                        LinkRef::entry("E404").to_value()
                    ] }
                })),
                &types,
            )
            .await;

        let attributes = &decoded.attributes;
        assert_eq!(attributes["author"], json!(author.as_str()));
        assert_eq!(attributes["_contentful_author"], json!("E2"));
        assert_eq!(attributes["_contentful_type_author"], json!("Entry"));

        assert!(!attributes.contains_key("ghost"));
        assert_eq!(attributes["_contentful_ghost"], json!("E404"));

        assert_eq!(attributes["related"], json!([author.as_str()]));
        assert_eq!(attributes["_contentful_related"], json!(["E2", "E404"]));
        assert!(!attributes.contains_key("related_repeater"));
        assert!(decoded.notices.is_empty());
    }

    #[tokio::test]
    async fn test_decode_reuses_mapped_asset_without_network() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();

        let blob = blobs.put(vec![1], "cover.png", None).await.unwrap();
        blobs.set_remote_id(&blob, "A1").await.unwrap();

        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");
        let decoded = codec
            .decode(
                &fields(json!({
                    "gallery": { "en-US": [
                        LinkRef::asset("A1").to_value(),
                        LinkRef::asset("A1").to_value()
                    ] }
                })),
                &FieldTypeMap::new(),
            )
            .await;

        let attributes = &decoded.attributes;
        assert_eq!(attributes["gallery_repeater"], json!(2));
        assert_eq!(attributes["gallery_repeater_1_gallery"], json!(blob.as_str()));
        assert_eq!(attributes["_contentful_gallery_repeater_0_gallery"], json!("A1"));
        assert_eq!(
            attributes["_contentful_type_gallery_repeater_0_gallery"],
            json!("Asset")
        );
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_unreachable_asset_skips_field() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let decoded = codec
            .decode(
                &fields(json!({
                    "title": { "en-US": "Hello" },
                    "cover": { "en-US": LinkRef::asset("A9").to_value() }
                })),
                &FieldTypeMap::new(),
            )
            .await;

        assert_eq!(decoded.attributes["title"], json!("Hello"));
        assert!(!decoded.attributes.contains_key("cover"));
        assert!(!decoded.attributes.contains_key("_contentful_cover"));
        assert_eq!(decoded.notices.len(), 1);
    }

    #[tokio::test]
    async fn test_encode_skips_bookkeeping_and_blanks() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let mut types = FieldTypeMap::new();
        types.insert("count", ResolvedType::Integer);
        types.insert("draft", ResolvedType::Boolean);

        let encoded = codec
            .encode(
                &record(json!({
                    "title": "Hello",
                    "subtitle": "",
                    "count": "0",
                    "draft": "0",
                    "contentful_id": "e1",
                    "contentful_version": 3,
                    "_contentful_cover": "A1",
                    "tags_repeater": 2
                })),
                &types,
            )
            .await;

        assert_eq!(
            Value::Object(encoded.fields),
            json!({
                "count": { "en-US": 0 },
                "draft": { "en-US": false },
                "title": { "en-US": "Hello" }
            })
        );
        assert!(encoded.notices.is_empty());
    }

    #[tokio::test]
    async fn test_encode_groups_repeater_by_index() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let mut types = FieldTypeMap::new();
        types.insert("scores", ResolvedType::Number);

        let encoded = codec
            .encode(
                &record(json!({
                    "scores_repeater": 3,
                    "scores_repeater_10_scores": "9",
                    "scores_repeater_2_scores": "2.5",
                    "scores_repeater_0_scores": 1,
                    "scores_repeater_1_scores": ""
                })),
                &types,
            )
            .await;

        assert_eq!(encoded.fields["scores"], json!({ "en-US": [1.0, 2.5] }));
    }

    #[tokio::test]
    async fn test_encode_entries_drops_unsynced() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();

        let synced = records
            .upsert(
                RecordWrite::insert(RecordTypeId::new("cwp_author"))
                    .with_attribute(CONTENTFUL_ID, "E2"),
            )
            .await
            .unwrap();
        let local_only = records
            .upsert(RecordWrite::insert(RecordTypeId::new("cwp_author")))
            .await
            .unwrap();

        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");
        let mut types = FieldTypeMap::new();
        types.insert("related", ResolvedType::Entries);
        types.insert("author", ResolvedType::Entry);
        types.insert("editor", ResolvedType::Entry);

        let encoded = codec
            .encode(
                &record(json!({
                    "related": [local_only.as_str(), synced.as_str()],
                    "author": [synced.as_str()],
                    "editor": local_only.as_str()
                })),
                &types,
            )
            .await;

        assert_eq!(
            encoded.fields["related"],
            json!({ "en-US": [LinkRef::entry("E2").to_value()] })
        );
        assert_eq!(
            encoded.fields["author"],
            json!({ "en-US": LinkRef::entry("E2").to_value() })
        );
        assert!(!encoded.fields.contains_key("editor"));
    }

    #[tokio::test]
    async fn test_encode_mapped_asset_links_directly() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();

        let blob = blobs.put(vec![1], "cover.png", None).await.unwrap();
        blobs.set_remote_id(&blob, "A1").await.unwrap();

        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");
        let mut types = FieldTypeMap::new();
        types.insert("cover", ResolvedType::Asset);

        let encoded = codec
            .encode(&record(json!({ "cover": blob.as_str() })), &types)
            .await;

        assert_eq!(
            encoded.fields["cover"],
            json!({ "en-US": LinkRef::asset("A1").to_value() })
        );
        assert!(encoded.bookkeeping.is_empty());
    }

    #[tokio::test]
    async fn test_encode_asset_failure_drops_only_that_field() {
        let client = offline_client();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

        let mut types = FieldTypeMap::new();
        types.insert("cover", ResolvedType::Asset);

        let encoded = codec
            .encode(&record(json!({ "cover": "42", "title": "Hello" })), &types)
            .await;

        assert!(!encoded.fields.contains_key("cover"));
        assert!(encoded.fields.contains_key("title"));
        assert_eq!(encoded.notices.len(), 1);
    }

    #[tokio::test]
    async fn test_encode_asset_process_failure_keeps_mapping_and_resumes() {
        use cmsbridge_common::BearerToken;
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/spaces/space1/uploads"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sys": { "type": "Upload", "id": "U1" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/spaces/space1/assets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sys": { "type": "Asset", "id": "A5", "version": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/spaces/space1/assets/A5/files/en-US/process"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "sys": { "type": "Error", "id": "ValidationFailed" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/spaces/space1/assets/A5/files/en-US/process"))
            .and(header("X-Contentful-Version", "1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/spaces/space1/assets/A5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sys": { "type": "Asset", "id": "A5", "version": 1 },
                "fields": {}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/spaces/space1/assets/A5/published"))
            .and(header("X-Contentful-Version", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sys": { "type": "Asset", "id": "A5", "version": 2 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RemoteClient::new(
            Some(BearerToken::new("token").unwrap()),
            ClientConfig::with_base_url(server.uri()),
        )
        .unwrap();
        let records = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let space = SpaceId::new("space1").unwrap();
        let blob = blobs.put(b"PNG".to_vec(), "cover.png", None).await.unwrap();

        let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");
        let mut types = FieldTypeMap::new();
        types.insert("cover", ResolvedType::Asset);
        let local = record(json!({ "cover": blob.as_str(), "title": "Hello" }));

        let first = codec.encode(&local, &types).await;
        assert!(!first.fields.contains_key("cover"));
        assert_eq!(first.fields["title"], json!({ "en-US": "Hello" }));
        assert_eq!(first.notices.len(), 1);
        assert!(first.bookkeeping.is_empty());

        let meta = blobs.get(&blob).await.unwrap().unwrap();
        assert_eq!(meta.remote_id.as_deref(), Some("A5"));
        assert!(meta.remote_pending);

        let second = codec.encode(&local, &types).await;
        assert_eq!(
            second.fields["cover"],
            json!({ "en-US": LinkRef::asset("A5").to_value() })
        );
        assert_eq!(second.bookkeeping["_contentful_cover"], json!("A5"));
        assert!(second.notices.is_empty());
        assert!(!blobs.get(&blob).await.unwrap().unwrap().remote_pending);
    }

    #[test]
    fn test_encode_scalar_rules() {
        assert_eq!(
            encode_scalar(ResolvedType::Number, &json!("3.25")).unwrap(),
            json!(3.25)
        );
        assert_eq!(
            encode_scalar(ResolvedType::Integer, &json!("7.9")).unwrap(),
            json!(7)
        );
        assert!(encode_scalar(ResolvedType::Integer, &json!("seven")).is_err());
        assert!(encode_scalar(ResolvedType::Integer, &json!(u64::MAX)).is_err());
        assert!(encode_scalar(ResolvedType::Integer, &json!("1e30")).is_err());
        assert!(encode_scalar(ResolvedType::Integer, &json!("-1e30")).is_err());
        assert_eq!(
            encode_scalar(ResolvedType::Integer, &json!(i64::MIN)).unwrap(),
            json!(i64::MIN)
        );
        assert_eq!(
            encode_scalar(ResolvedType::Boolean, &json!("true")).unwrap(),
            json!(true)
        );
        assert!(encode_scalar(ResolvedType::Boolean, &json!("maybe")).is_err());
        assert_eq!(
            encode_scalar(ResolvedType::Object, &json!(r#"{"lat":1.0,"lon":2.0}"#)).unwrap(),
            json!({ "lat": 1.0, "lon": 2.0 })
        );
        assert_eq!(
            encode_scalar(ResolvedType::Object, &json!(r#"{"a":1}"#)).unwrap(),
            json!(r#"{"a":1}"#)
        );
        assert_eq!(
            encode_scalar(ResolvedType::Symbol, &json!("12")).unwrap(),
            json!("12")
        );
    }

    fn scalar_attributes() -> impl Strategy<Value = (String, i64, f64, bool)> {
        (
            "[a-zA-Z][a-zA-Z ]{0,30}",
            any::<i64>(),
            -1.0e9f64..1.0e9f64,
            any::<bool>(),
        )
    }

    proptest! {
        #[test]
        fn test_scalar_round_trip((text, count, ratio, flag) in scalar_attributes()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let client = offline_client();
                let records = MemoryRecordStore::new();
                let blobs = MemoryBlobStore::new();
                let space = SpaceId::new("space1").unwrap();
                let codec = FieldValueCodec::new(&client, &records, &blobs, &space, "en-US");

                let mut types = FieldTypeMap::new();
                types.insert("text", ResolvedType::Symbol);
                types.insert("count", ResolvedType::Integer);
                types.insert("ratio", ResolvedType::Number);
                types.insert("flag", ResolvedType::Boolean);

                let original = record(json!({
                    "text": text,
                    "count": count,
                    "ratio": ratio,
                    "flag": flag,
                }));

                let encoded = codec.encode(&original, &types).await;
                let decoded = codec.decode(&encoded.fields, &types).await;
                assert_eq!(decoded.attributes, original.attributes);
            });
        }
    }
}
