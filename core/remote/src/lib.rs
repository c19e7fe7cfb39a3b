//! Remote content-management API access for cmsbridge.
//!
//! This crate provides:
//! - `RemoteClient`, a thin bearer-authenticated JSON request wrapper
//! - The wire model for spaces, content types, entries, assets and links
//! - OAuth implicit-grant helpers used to obtain the single bearer token

pub mod auth;
pub mod client;
pub mod model;

pub use auth::{authorization_url, token_from_callback, AuthConfig};
pub use client::{ClientConfig, RemoteClient, CONTENT_TYPE_HEADER, VERSION_HEADER};
pub use model::{
    decode_body, Asset, AssetFile, Collection, ContentType, Entry, FieldDefinition, FieldItems,
    FieldType, Fields, LinkRef, LinkType, Space, Sys,
};
