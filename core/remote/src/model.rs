//! Wire model of the remote management API.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use cmsbridge_common::{Error, RemoteError, Result};

/// Localized field values: `field id -> { locale -> value }`.
pub type Fields = Map<String, Value>;

/// System metadata attached to every remote resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sys {
    /// Resource kind (`Entry`, `Asset`, `Link`, `Error`, ...).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Resource id.
    pub id: Option<String>,
    /// Version, bumped by every accepted mutation.
    pub version: Option<u64>,
    /// Target kind when `kind == "Link"`.
    pub link_type: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Content type link, present on entries.
    pub content_type: Option<Box<SysLink>>,
}

/// A `{ "sys": ... }` wrapper as used by nested links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SysLink {
    pub sys: Sys,
}

/// Paginated collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    /// Total number of items on the server.
    #[serde(default)]
    pub total: u64,
    /// Offset of this page.
    #[serde(default)]
    pub skip: u64,
    /// Page size the server actually applied.
    #[serde(default)]
    pub limit: u64,
    /// Items of this page.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Top-level remote content container.
#[derive(Debug, Clone, Deserialize)]
pub struct Space {
    pub sys: Sys,
    #[serde(default)]
    pub name: String,
}

impl Space {
    /// Space id, empty if the remote omitted it.
    pub fn id(&self) -> &str {
        self.sys.id.as_deref().unwrap_or_default()
    }
}

/// Remote field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Symbol,
    Text,
    Integer,
    Number,
    Date,
    Boolean,
    Link,
    Array,
    Object,
    Location,
    RichText,
    /// Any type this crate does not know about.
    #[serde(other)]
    Other,
}

/// Target kind of a link field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Asset,
    Entry,
    #[serde(other)]
    Other,
}

impl LinkType {
    /// Wire name of the link type.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Asset => "Asset",
            LinkType::Entry => "Entry",
            LinkType::Other => "Other",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "Asset" => LinkType::Asset,
            "Entry" => LinkType::Entry,
            _ => LinkType::Other,
        }
    }
}

/// Element description of an `Array` field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldItems {
    #[serde(rename = "type")]
    pub item_type: Option<FieldType>,
    pub link_type: Option<LinkType>,
}

/// One field of a content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
    pub link_type: Option<LinkType>,
    pub items: Option<FieldItems>,
}

/// Remote schema describing an entry's fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    pub sys: Sys,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl ContentType {
    /// Content type id, empty if the remote omitted it.
    pub fn id(&self) -> &str {
        self.sys.id.as_deref().unwrap_or_default()
    }
}

/// One versioned remote content record.
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    pub sys: Sys,
    #[serde(default)]
    pub fields: Fields,
}

impl Entry {
    /// Entry id, empty if the remote omitted it.
    pub fn id(&self) -> &str {
        self.sys.id.as_deref().unwrap_or_default()
    }

    /// Id of the content type this entry instantiates.
    pub fn content_type_id(&self) -> Option<&str> {
        self.sys
            .content_type
            .as_ref()
            .and_then(|link| link.sys.id.as_deref())
    }
}

/// Remote binary resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub sys: Sys,
    #[serde(default)]
    pub fields: Fields,
}

impl Asset {
    /// The `file` field for `locale`, falling back to the first locale present.
    pub fn file(&self, locale: &str) -> Option<AssetFile> {
        let value = pick_locale(self.fields.get("file")?, locale)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// The `file` field of an asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    pub url: Option<String>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl AssetFile {
    /// Absolute download URL. Protocol-relative URLs get `https:`.
    pub fn download_url(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        if url.starts_with("//") {
            Some(format!("https:{}", url))
        } else {
            Some(url.to_string())
        }
    }

    /// File name, taken from the metadata or the last URL segment.
    pub fn resolved_file_name(&self) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("asset")
            .to_string()
    }
}

/// A typed link value `{ sys: { type: "Link", linkType, id } }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    pub link_type: LinkType,
    pub id: String,
}

impl LinkRef {
    /// Link to an asset.
    pub fn asset(id: impl Into<String>) -> Self {
        Self {
            link_type: LinkType::Asset,
            id: id.into(),
        }
    }

    /// Link to an entry.
    pub fn entry(id: impl Into<String>) -> Self {
        Self {
            link_type: LinkType::Entry,
            id: id.into(),
        }
    }

    /// Whether a field value carries a `sys.type` marker.
    pub fn has_marker(value: &Value) -> bool {
        value
            .get("sys")
            .and_then(|sys| sys.get("type"))
            .is_some()
    }

    /// Parse a marked field value into a link.
    pub fn from_value(value: &Value) -> Option<Self> {
        let sys = value.get("sys")?;
        Some(Self {
            link_type: LinkType::parse(sys.get("linkType").and_then(Value::as_str)?),
            id: sys.get("id").and_then(Value::as_str)?.to_string(),
        })
    }

    /// Wire representation.
    pub fn to_value(&self) -> Value {
        json!({
            "sys": {
                "type": "Link",
                "linkType": self.link_type.as_str(),
                "id": self.id,
            }
        })
    }
}

/// Pick the value for `locale` from a `{ locale -> value }` map, or the
/// first locale present when `locale` is missing.
pub fn pick_locale<'a>(localized: &'a Value, locale: &str) -> Option<&'a Value> {
    let map = localized.as_object()?;
    map.get(locale).or_else(|| map.values().next())
}

/// Decode a response body into `T`, surfacing remote error bodies as
/// `Error::Remote`.
pub fn decode_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    if let Some(err) = RemoteError::from_body(&body) {
        return Err(Error::Remote(err));
    }
    serde_json::from_value(body).map_err(|e| Error::Serialization(e.to_string()))
}
