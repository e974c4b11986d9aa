//! Verification photos and their content-addressed references.
//!
//! A photo is an opaque blob to the engine. Its reference is the SHA-256
//! digest of the bytes (base64), so re-submitting the same photo after a
//! failed write yields the same reference.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque reference to a stored verification photo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoRef(String);

impl PhotoRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Photo bytes captured during a verification session.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationPhoto {
    bytes: Vec<u8>,
}

impl VerificationPhoto {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content digest used as the stored reference.
    pub fn reference(&self) -> PhotoRef {
        let hash = Sha256::digest(&self.bytes);
        PhotoRef(base64::engine::general_purpose::STANDARD.encode(hash))
    }

    /// Base64 payload for classifier requests.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

// Photos can be megabytes; never dump them into logs.
impl fmt::Debug for VerificationPhoto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationPhoto")
            .field("len", &self.bytes.len())
            .finish()
    }
}
