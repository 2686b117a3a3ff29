//! Stable content hashing.
//!
//! Facts, tokens and constraints are deduplicated by a blake3 digest over a
//! canonical byte encoding: a one-byte tag per node followed by
//! length-prefixed fields. The encoding never fails and never depends on map
//! iteration order.

use std::fmt;

use blake3::Hasher;
use serde::{Serialize, Serializer};

use crate::uint::UInt;

/// 32-byte blake3 digest of a value's canonical encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex digits, for identifiers and logs.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", blake3::Hash::from(self.0).to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Incremental writer for the canonical encoding.
pub(crate) struct CanonicalHasher {
    inner: Hasher,
}

impl CanonicalHasher {
    pub(crate) fn new() -> Self {
        Self { inner: Hasher::new() }
    }

    pub(crate) fn tag(&mut self, tag: u8) -> &mut Self {
        self.inner.update(&[tag]);
        self
    }

    pub(crate) fn str(&mut self, s: &str) -> &mut Self {
        self.inner.update(&(s.len() as u64).to_le_bytes());
        self.inner.update(s.as_bytes());
        self
    }

    pub(crate) fn uint(&mut self, v: UInt) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    pub(crate) fn opt_uint(&mut self, v: Option<UInt>) -> &mut Self {
        match v {
            Some(v) => self.tag(1).uint(v),
            None => self.tag(0),
        }
    }

    pub(crate) fn opt_bool(&mut self, v: Option<bool>) -> &mut Self {
        self.tag(match v {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        })
    }

    pub(crate) fn hash(&mut self, h: &ContentHash) -> &mut Self {
        self.inner.update(h.as_bytes());
        self
    }

    pub(crate) fn finish(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}
