// rpgo_core/src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

// --- Core Identifier ---
/// A variable symbol: a prefix character naming the robot (or landmark stream)
/// and an index along that stream, e.g. `a12` is the 13th pose of robot `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub chr: char,
    pub index: u64,
}

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = u64::BITS - CHR_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

impl Key {
    pub fn new(chr: char, index: u64) -> Self {
        Self { chr, index }
    }

    /// Largest index the raw encoding can hold.
    pub const MAX_RAW_INDEX: u64 = INDEX_MASK;

    /// Whether `raw` round-trips: a non-NUL ASCII prefix and an index of at
    /// most `MAX_RAW_INDEX`.
    pub fn is_raw_encodable(&self) -> bool {
        self.chr.is_ascii() && self.chr != '\0' && self.index <= INDEX_MASK
    }

    /// The raw 64-bit encoding used by interchange files: the character in the
    /// top byte, the index in the remaining 56 bits. Lossy for keys that are
    /// not `is_raw_encodable`.
    pub fn raw(&self) -> u64 {
        ((self.chr as u64 & 0xff) << INDEX_BITS) | (self.index & INDEX_MASK)
    }

    /// Decodes a raw id. Ids without a character byte are plain integers and
    /// get `default_prefix`.
    pub fn from_raw(raw: u64, default_prefix: char) -> Self {
        let chr = (raw >> INDEX_BITS) as u8;
        let chr = if chr == 0 {
            default_prefix
        } else {
            char::from(chr)
        };
        Self {
            chr,
            index: raw & INDEX_MASK,
        }
    }

    /// The key that directly follows this one on the same stream, if any.
    pub fn next(&self) -> Option<Self> {
        self.index.checked_add(1).map(|index| Self::new(self.chr, index))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.chr, self.index)
    }
}

/// The (robot A, robot B) channel a loop closure belongs to. Unordered: the
/// pair is normalized so that `first <= second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationId {
    first: char,
    second: char,
}

impl ObservationId {
    pub fn new(a: char, b: char) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// The observation channel of a measurement between two keys.
    pub fn from_keys(key1: &Key, key2: &Key) -> Self {
        Self::new(key1.chr, key2.chr)
    }

    pub fn first(&self) -> char {
        self.first
    }

    pub fn second(&self) -> char {
        self.second
    }

    pub fn contains(&self, prefix: char) -> bool {
        self.first == prefix || self.second == prefix
    }

    pub fn is_multi_robot(&self) -> bool {
        self.first != self.second
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}
