//! Host collaborator abstraction for cmsbridge.
//!
//! The sync engine never owns local persistence. It talks to the hosting
//! application through three narrow traits:
//! - `RecordStore`: typed records with key/value attributes
//! - `BlobStore`: binary files such as downloaded assets
//! - `ConfigStore`: opaque key/value integration settings
//!
//! An in-memory implementation backs tests and a directory-backed one
//! backs the operator CLI.

pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalStore;
pub use memory::{MemoryBlobStore, MemoryConfig, MemoryRecordStore};
pub use provider::{
    Attributes, BlobMeta, BlobStore, ConfigStore, Record, RecordStore, RecordWrite,
    CONTENTFUL_ID, CONTENTFUL_VERSION,
};
