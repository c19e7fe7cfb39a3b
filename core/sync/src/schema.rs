//! Content type compilation.
//!
//! A remote content type becomes a [`RecordTypeDescriptor`]: a generated
//! record type id, the form layout the host renders, and the
//! [`FieldTypeMap`] the codec consults in both directions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use cmsbridge_common::RecordTypeId;
use cmsbridge_remote::{ContentType, FieldDefinition, FieldType, LinkType};

/// Marker separating a field key from the index in repeater attribute names.
pub const REPEATER_INFIX: &str = "_repeater_";
/// Suffix of the repeater count attribute.
pub const REPEATER_SUFFIX: &str = "_repeater";

/// Canonical field classification driving decode and encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolvedType {
    #[default]
    Symbol,
    Text,
    Integer,
    Number,
    Date,
    Boolean,
    Asset,
    Assets,
    Entry,
    Entries,
    Object,
}

impl ResolvedType {
    /// Asset links, single or repeated.
    pub fn is_asset(&self) -> bool {
        matches!(self, ResolvedType::Asset | ResolvedType::Assets)
    }

    /// Entry links, single or flattened.
    pub fn is_entry(&self) -> bool {
        matches!(self, ResolvedType::Entry | ResolvedType::Entries)
    }
}

/// Field key to resolved type, for one record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTypeMap(BTreeMap<String, ResolvedType>);

impl FieldTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, resolved: ResolvedType) {
        self.0.insert(field.into(), resolved);
    }

    /// Resolved type of `field`. Unknown fields are `Symbol`.
    pub fn get(&self, field: &str) -> ResolvedType {
        self.0.get(field).copied().unwrap_or_default()
    }

    /// Whether `field` was compiled.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ResolvedType)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ResolvedType)> for FieldTypeMap {
    fn from_iter<I: IntoIterator<Item = (String, ResolvedType)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Name of the attribute holding element `index` of repeated field `field`.
pub fn repeater_key(field: &str, index: usize) -> String {
    format!("{field}{REPEATER_INFIX}{index}_{field}")
}

/// Name of the count attribute of repeated field `field`.
pub fn repeater_count_key(field: &str) -> String {
    format!("{field}{REPEATER_SUFFIX}")
}

/// Split a repeater element key into its field key and index.
///
/// Returns `None` for anything that is not `<field>_repeater_<i>_<field>`.
pub fn parse_repeater_key(key: &str) -> Option<(&str, usize)> {
    let (field, rest) = key.split_once(REPEATER_INFIX)?;
    let (index, tail) = rest.split_once('_')?;
    if field.is_empty() || tail != field {
        return None;
    }
    Some((field, index.parse().ok()?))
}

/// Form widget of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    Text { max_length: u32 },
    Wysiwyg,
    Number { step: Option<f64> },
    DatePicker,
    TrueFalse,
    Relationship,
    File,
    Textarea,
    Repeater { sub_fields: Vec<FieldDescriptor> },
}

/// One entry of a field group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Attribute name the host stores the value under.
    pub name: String,
    pub label: String,
    pub widget: Widget,
    #[serde(default)]
    pub required: bool,
}

/// Form layout of a record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub id: String,
    pub title: String,
    pub fields: Vec<FieldDescriptor>,
}

/// Everything the host needs to register one synchronized record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTypeDescriptor {
    pub id: RecordTypeId,
    pub content_type_id: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    /// URL slug derived from the label.
    pub slug: String,
    pub field_group: FieldGroup,
    pub field_types: FieldTypeMap,
}

/// Generate a fresh record type id of the form `cwp_<13 hex digits>`.
pub fn new_record_type_id() -> RecordTypeId {
    let hex = Uuid::new_v4().simple().to_string();
    RecordTypeId::new(format!("cwp_{}", &hex[..13]))
}

/// Lowercase, hyphen-separated slug of `title`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if (c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/')) && !slug.ends_with('-')
        {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

fn element(
    field_type: FieldType,
    link_type: Option<LinkType>,
    max_length: u32,
) -> (Widget, ResolvedType) {
    match field_type {
        FieldType::Symbol => (Widget::Text { max_length }, ResolvedType::Symbol),
        FieldType::Text => (Widget::Wysiwyg, ResolvedType::Text),
        FieldType::Integer => (Widget::Number { step: None }, ResolvedType::Integer),
        FieldType::Number => (Widget::Number { step: Some(0.1) }, ResolvedType::Number),
        FieldType::Date => (Widget::DatePicker, ResolvedType::Date),
        FieldType::Boolean => (Widget::TrueFalse, ResolvedType::Boolean),
        FieldType::Link => match link_type {
            Some(LinkType::Entry) => (Widget::Relationship, ResolvedType::Entry),
            Some(LinkType::Asset) => (Widget::File, ResolvedType::Asset),
            _ => (Widget::Text { max_length }, ResolvedType::Symbol),
        },
        FieldType::Object | FieldType::Location | FieldType::RichText => {
            (Widget::Textarea, ResolvedType::Object)
        }
        FieldType::Array | FieldType::Other => (Widget::Text { max_length }, ResolvedType::Symbol),
    }
}

const TEXT_MAX_LENGTH: u32 = 256;

fn compile_field(field: &FieldDefinition) -> (FieldDescriptor, ResolvedType) {
    if field.field_type != FieldType::Array {
        let (widget, resolved) = element(field.field_type, field.link_type, TEXT_MAX_LENGTH);
        return (
            FieldDescriptor {
                name: field.id.clone(),
                label: field.name.clone(),
                widget,
                required: field.required,
            },
            resolved,
        );
    }

    let items = field.items.clone().unwrap_or_default();
    let item_type = items.item_type.unwrap_or(FieldType::Symbol);

    // A list of related entries is one multi-valued relationship, not a repeater.
    if item_type == FieldType::Link && items.link_type == Some(LinkType::Entry) {
        return (
            FieldDescriptor {
                name: field.id.clone(),
                label: field.name.clone(),
                widget: Widget::Relationship,
                required: field.required,
            },
            ResolvedType::Entries,
        );
    }

    let (widget, resolved) = element(item_type, items.link_type, TEXT_MAX_LENGTH);
    let resolved = match resolved {
        ResolvedType::Asset => ResolvedType::Assets,
        other => other,
    };

    (
        FieldDescriptor {
            name: repeater_count_key(&field.id),
            label: field.name.clone(),
            widget: Widget::Repeater {
                sub_fields: vec![FieldDescriptor {
                    name: field.id.clone(),
                    label: field.name.clone(),
                    widget,
                    required: field.required,
                }],
            },
            required: field.required,
        },
        resolved,
    )
}

/// Compile one content type under the record type id `id`.
///
/// Disabled fields are left out. Compilation never fails on a field:
/// unknown remote types fall back to `Symbol`.
pub fn compile(content_type: &ContentType, id: RecordTypeId) -> RecordTypeDescriptor {
    let mut fields = Vec::new();
    let mut field_types = FieldTypeMap::new();

    for field in content_type.fields.iter().filter(|f| !f.disabled) {
        let (descriptor, resolved) = compile_field(field);
        debug!("Field {} compiles to {:?}", field.id, resolved);
        field_types.insert(field.id.clone(), resolved);
        fields.push(descriptor);
    }

    RecordTypeDescriptor {
        content_type_id: content_type.id().to_string(),
        label: content_type.name.clone(),
        description: content_type.description.clone().filter(|d| !d.is_empty()),
        slug: slugify(&content_type.name),
        field_group: FieldGroup {
            id: format!("contentful_{}", content_type.id()),
            title: content_type.name.clone(),
            fields,
        },
        field_types,
        id,
    }
}

/// What happened to one selected content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Compiled for the first time.
    Generated {
        content_type_id: String,
        record_type: RecordTypeId,
    },
    /// Already compiled earlier; the existing record type is kept.
    Reused {
        content_type_id: String,
        record_type: RecordTypeId,
    },
    /// Selected id is not a content type of the space.
    Unknown { content_type_id: String },
}

/// The compiled record types of one installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Content type id to record type id.
    #[serde(default)]
    pub content_types: BTreeMap<String, RecordTypeId>,
    /// Record type id to descriptor.
    #[serde(default)]
    pub record_types: BTreeMap<RecordTypeId, RecordTypeDescriptor>,
}

impl Catalog {
    /// Compile the `selected` content types out of `available`.
    ///
    /// Content types that already have a descriptor are re-referenced, not
    /// recompiled.
    pub fn compile_selected(
        &mut self,
        available: &[ContentType],
        selected: &[String],
    ) -> Vec<CompileOutcome> {
        let mut outcomes = Vec::with_capacity(selected.len());

        for content_type_id in selected {
            let Some(content_type) = available.iter().find(|ct| ct.id() == content_type_id) else {
                outcomes.push(CompileOutcome::Unknown {
                    content_type_id: content_type_id.clone(),
                });
                continue;
            };

            if let Some(existing) = self
                .content_types
                .get(content_type_id)
                .filter(|id| self.record_types.contains_key(*id))
            {
                outcomes.push(CompileOutcome::Reused {
                    content_type_id: content_type_id.clone(),
                    record_type: existing.clone(),
                });
                continue;
            }

            let descriptor = compile(content_type, new_record_type_id());
            info!(
                "Compiled content type {} into record type {}",
                content_type_id, descriptor.id
            );

            let record_type = descriptor.id.clone();
            self.content_types
                .insert(content_type_id.clone(), record_type.clone());
            self.record_types.insert(record_type.clone(), descriptor);
            outcomes.push(CompileOutcome::Generated {
                content_type_id: content_type_id.clone(),
                record_type,
            });
        }

        outcomes
    }

    /// Record type generated for `content_type_id`.
    pub fn record_type_for(&self, content_type_id: &str) -> Option<&RecordTypeId> {
        self.content_types.get(content_type_id)
    }

    pub fn descriptor(&self, record_type: &RecordTypeId) -> Option<&RecordTypeDescriptor> {
        self.record_types.get(record_type)
    }

    /// Whether records of `record_type` are synchronized.
    pub fn is_synchronized(&self, record_type: &RecordTypeId) -> bool {
        self.content_types.values().any(|id| id == record_type)
    }

    /// Content type id a record type was generated from.
    pub fn content_type_of(&self, record_type: &RecordTypeId) -> Option<&str> {
        self.content_types
            .iter()
            .find(|(_, id)| *id == record_type)
            .map(|(ct, _)| ct.as_str())
    }

    /// Field type map of `record_type`, empty if unknown.
    pub fn field_types(&self, record_type: &RecordTypeId) -> FieldTypeMap {
        self.descriptor(record_type)
            .map(|d| d.field_types.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn content_type(value: serde_json::Value) -> ContentType {
        serde_json::from_value(value).unwrap()
    }

    fn post() -> ContentType {
        content_type(json!({
            "sys": { "type": "ContentType", "id": "post" },
            "name": "Blog Post",
            "fields": [
                { "id": "title", "name": "Title", "type": "Symbol", "required": true },
                { "id": "cover", "name": "Cover", "type": "Link", "linkType": "Asset" }
            ]
        }))
    }

    #[test]
    fn test_compile_scalar_and_asset() {
        let descriptor = compile(&post(), RecordTypeId::new("cwp_test"));

        assert_eq!(descriptor.field_types.get("title"), ResolvedType::Symbol);
        assert_eq!(descriptor.field_types.get("cover"), ResolvedType::Asset);
        assert_eq!(descriptor.slug, "blog-post");
        assert_eq!(descriptor.field_group.fields.len(), 2);
        assert_eq!(
            descriptor.field_group.fields[0].widget,
            Widget::Text { max_length: 256 }
        );
        assert!(descriptor.field_group.fields[0].required);
        assert_eq!(descriptor.field_group.fields[1].widget, Widget::File);
    }

    #[test]
    fn test_compile_arrays() {
        let ct = content_type(json!({
            "sys": { "id": "gallery" },
            "name": "Gallery",
            "fields": [
                { "id": "related", "name": "Related", "type": "Array",
                  "items": { "type": "Link", "linkType": "Entry" } },
                { "id": "images", "name": "Images", "type": "Array",
                  "items": { "type": "Link", "linkType": "Asset" } },
                { "id": "tags", "name": "Tags", "type": "Array", "items": { "type": "Symbol" } },
                { "id": "scores", "name": "Scores", "type": "Array", "items": { "type": "Number" } },
                { "id": "untyped", "name": "Untyped", "type": "Array" }
            ]
        }));

        let descriptor = compile(&ct, RecordTypeId::new("cwp_test"));
        let types = &descriptor.field_types;

        assert_eq!(types.get("related"), ResolvedType::Entries);
        assert_eq!(types.get("images"), ResolvedType::Assets);
        assert_eq!(types.get("tags"), ResolvedType::Symbol);
        assert_eq!(types.get("scores"), ResolvedType::Number);
        assert_eq!(types.get("untyped"), ResolvedType::Symbol);

        let fields = &descriptor.field_group.fields;
        assert_eq!(fields[0].name, "related");
        assert_eq!(fields[0].widget, Widget::Relationship);
        assert_eq!(fields[1].name, "images_repeater");
        match &fields[1].widget {
            Widget::Repeater { sub_fields } => {
                assert_eq!(sub_fields[0].name, "images");
                assert_eq!(sub_fields[0].widget, Widget::File);
            }
            other => panic!("expected repeater, got {:?}", other),
        }
        match &fields[3].widget {
            Widget::Repeater { sub_fields } => {
                assert_eq!(sub_fields[0].widget, Widget::Number { step: Some(0.1) });
            }
            other => panic!("expected repeater, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_skips_disabled_and_maps_unknown() {
        let ct = content_type(json!({
            "sys": { "id": "place" },
            "name": "Place",
            "fields": [
                { "id": "hidden", "name": "Hidden", "type": "Symbol", "disabled": true },
                { "id": "where", "name": "Where", "type": "Location" },
                { "id": "body", "name": "Body", "type": "RichText" },
                { "id": "count", "name": "Count", "type": "Integer" },
                { "id": "odd", "name": "Odd", "type": "Hologram" }
            ]
        }));

        let descriptor = compile(&ct, RecordTypeId::new("cwp_test"));
        let types = &descriptor.field_types;

        assert!(!types.contains("hidden"));
        assert_eq!(types.get("where"), ResolvedType::Object);
        assert_eq!(types.get("body"), ResolvedType::Object);
        assert_eq!(types.get("count"), ResolvedType::Integer);
        assert_eq!(types.get("odd"), ResolvedType::Symbol);
        assert_eq!(descriptor.field_group.fields.len(), 4);
        assert_eq!(
            descriptor.field_group.fields[2].widget,
            Widget::Number { step: None }
        );
    }

    #[test]
    fn test_record_type_id_format() {
        let id = new_record_type_id();
        let suffix = id.as_str().strip_prefix("cwp_").unwrap();
        assert_eq!(suffix.len(), 13);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_record_type_id(), id);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Blog Post"), "blog-post");
        assert_eq!(slugify("  News & Events!  "), "news-events");
        assert_eq!(slugify("a__b"), "a-b");
    }

    #[test]
    fn test_catalog_reuses_compiled_types() {
        let mut catalog = Catalog::default();
        let available = vec![post()];

        let first = catalog.compile_selected(&available, &["post".to_string()]);
        let record_type = match &first[0] {
            CompileOutcome::Generated { record_type, .. } => record_type.clone(),
            other => panic!("expected generated, got {:?}", other),
        };

        let second = catalog.compile_selected(
            &available,
            &["post".to_string(), "missing".to_string()],
        );
        assert_eq!(
            second,
            vec![
                CompileOutcome::Reused {
                    content_type_id: "post".to_string(),
                    record_type: record_type.clone(),
                },
                CompileOutcome::Unknown {
                    content_type_id: "missing".to_string(),
                },
            ]
        );

        assert!(catalog.is_synchronized(&record_type));
        assert_eq!(catalog.content_type_of(&record_type), Some("post"));
        assert_eq!(
            catalog.field_types(&record_type).get("cover"),
            ResolvedType::Asset
        );
    }

    #[test]
    fn test_catalog_serialization() {
        let mut catalog = Catalog::default();
        catalog.compile_selected(&[post()], &["post".to_string()]);

        let json = serde_json::to_string(&catalog).unwrap();
        let restored: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, catalog);
    }

    #[test]
    fn test_parse_repeater_key_rejects_other_names() {
        assert_eq!(parse_repeater_key("tags_repeater_2_tags"), Some(("tags", 2)));
        assert_eq!(parse_repeater_key("tags_repeater"), None);
        assert_eq!(parse_repeater_key("tags_repeater_x_tags"), None);
        assert_eq!(parse_repeater_key("tags_repeater_0_other"), None);
        assert_eq!(parse_repeater_key("title"), None);
    }

    proptest! {
        #[test]
        fn test_repeater_key_round_trip(field in "[a-z][a-zA-Z0-9]{0,20}", index in 0usize..10_000) {
            let key = repeater_key(&field, index);
            prop_assert_eq!(parse_repeater_key(&key), Some((field.as_str(), index)));
        }
    }
}
