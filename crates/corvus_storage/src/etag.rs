//! Etag identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Version marker used for optimistic concurrency.
///
/// An etag is 128 bits: the high 8 bytes hold the process start base and
/// the low 8 bytes a counter, both big-endian so that byte order equals
/// numeric order. Etags are:
/// - Strictly increasing within one process lifetime
/// - Comparable across processes only as a hint
/// - Rendered as a hyphenated UUID
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(Uuid);

impl Etag {
    /// The all-zero etag, which precedes every generated etag.
    pub const ZERO: Etag = Etag(Uuid::nil());

    /// Creates an etag from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Builds an etag from its base and counter halves.
    #[must_use]
    pub fn from_parts(base: i64, counter: i64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&base.to_be_bytes());
        bytes[8..].copy_from_slice(&counter.to_be_bytes());
        Self::from_bytes(bytes)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the process base half.
    #[must_use]
    pub fn base(&self) -> i64 {
        let mut half = [0u8; 8];
        half.copy_from_slice(&self.as_bytes()[..8]);
        i64::from_be_bytes(half)
    }

    /// Returns the counter half.
    #[must_use]
    pub fn counter(&self) -> i64 {
        let mut half = [0u8; 8];
        half.copy_from_slice(&self.as_bytes()[8..]);
        i64::from_be_bytes(half)
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true for the zero etag.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Debug for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Etag({})", self.0)
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Etag {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for Etag {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<Etag> for Uuid {
    fn from(etag: Etag) -> Self {
        etag.0
    }
}
