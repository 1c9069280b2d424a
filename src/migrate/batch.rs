//! Batches and scan cursors

use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasherDefault;

type BatchMap = HashMap<Bytes, Bytes, BuildHasherDefault<SipHasher13>>;

/// One scan page worth of keys and their serialized values
///
/// Built by the exporter, handed over the queue exactly once, consumed by
/// the importer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Position of the scan page this batch came from, starting at 0
    page: u64,

    /// key -> DUMP blob
    entries: BatchMap,
}

impl Batch {
    /// Create an empty batch for scan page `page`
    pub fn new(page: u64) -> Self {
        Batch {
            page,
            entries: BatchMap::default(),
        }
    }

    /// Create an empty batch sized for `capacity` keys
    pub fn with_capacity(page: u64, capacity: usize) -> Self {
        Batch {
            page,
            entries: BatchMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Add a key and its blob, returns the previous blob if the key was
    /// already in this batch
    pub fn insert(&mut self, key: Bytes, blob: Bytes) -> Option<Bytes> {
        self.entries.insert(key, blob)
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload size of keys and blobs
    pub fn size_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl IntoIterator for Batch {
    type Item = (Bytes, Bytes);
    type IntoIter = hash_map::IntoIter<Bytes, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// SCAN cursor
///
/// The store hands out cursors and uses the same value, 0, both to start a
/// scan and to say it is over. `is_complete` is therefore only meaningful on
/// a cursor returned by SCAN, never on the one a scan starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(u64);

impl Cursor {
    /// Cursor that starts a scan
    pub const START: Cursor = Cursor(0);

    pub fn new(value: u64) -> Self {
        Cursor(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Whether a cursor returned by SCAN ends the scan
    pub fn is_complete(self) -> bool {
        self == Cursor::START
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
