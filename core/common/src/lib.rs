//! Common utilities and types shared across the cmsbridge crates.
//!
//! This module provides the error taxonomy and the identifier types that
//! flow between the remote client, the host stores and the sync engine.

pub mod error;
pub mod types;

pub use error::{Error, RemoteError, Result};
pub use types::{BearerToken, BlobId, RecordId, RecordTypeId, SpaceId};
