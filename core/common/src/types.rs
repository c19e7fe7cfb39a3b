//! Common types used throughout cmsbridge.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Identifier of a remote space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceId(String);

impl SpaceId {
    /// Create a new SpaceId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::Validation(
                "No space has been selected".to_string(),
            ));
        }
        if id.contains('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Space id cannot contain '/': {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a local record, assigned by the host store.
    RecordId
);

string_id!(
    /// Identifier of a generated local record type.
    RecordTypeId
);

string_id!(
    /// Identifier of a blob held by the host blob store.
    BlobId
);

/// OAuth bearer token that zeroizes on drop and never prints itself.
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token.
    ///
    /// # Errors
    /// - Returns `Auth` if the token is empty or the `-1` sentinel a failed
    ///   authorization callback leaves behind
    pub fn new(token: impl Into<String>) -> crate::Result<Self> {
        let token = token.into();
        if token.trim().is_empty() || token == "-1" {
            return Err(crate::Error::Auth(
                "No access token is configured".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Expose the secret for use in an `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken([REDACTED])")
    }
}
