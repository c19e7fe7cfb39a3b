//! cmsbridge sync engine
//!
//! This crate keeps remote entries and local records in step:
//! - Schema compilation of remote content types into record types
//! - Field translation in both directions, including links and repeaters
//! - Paginated two-pass import of entries
//! - Push of saved records with optimistic versioning, and resync
//! - A push gate so that engine writes never re-trigger a push

pub mod codec;
pub mod conflict;
pub mod engine;
pub mod gate;
pub mod import;
pub mod push;
pub mod report;
pub mod schema;
pub mod state;

// Re-export main types
pub use codec::{encode_scalar, link_id_key, link_type_key, Decoded, Encoded, FieldValueCodec};
pub use conflict::ConflictInfo;
pub use engine::{CompileReport, SyncEngine, SyncOptions};
pub use gate::{PushGate, PushGuard};
pub use import::{ImportEngine, ImportReport};
pub use push::{PushEngine, PushOutcome, PushReport, SkipReason};
pub use report::{Notice, Notices, Severity};
pub use schema::{
    compile, new_record_type_id, Catalog, CompileOutcome, FieldDescriptor, FieldGroup,
    FieldTypeMap, RecordTypeDescriptor, ResolvedType, Widget,
};
pub use state::IntegrationSettings;
