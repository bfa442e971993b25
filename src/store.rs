//! Signature store: an append-only, id-ordered record set.
//!
//! Extraction appends, comparison scans; the two phases never overlap for the
//! same record set, so a plain in-memory sequence with an id-range query is
//! all the "storage engine" the pipeline needs.

use crate::signature::SignatureSet;
use std::path::PathBuf;

/// One successfully decoded image: id, per-channel signatures, source path.
/// Immutable once created; ids are assigned at discovery time and never
/// reused.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: u32,
    pub signature: SignatureSet,
    pub path: PathBuf,
}

/// Ordered collection of [`ImageRecord`]s, rebuilt fresh every run.
#[derive(Debug, Default)]
pub struct SignatureStore {
    records: Vec<ImageRecord>,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Ids must arrive in strictly increasing order.
    pub fn push(&mut self, record: ImageRecord) {
        if let Some(last) = self.records.last() {
            debug_assert!(record.id > last.id, "record ids must increase");
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Full scan in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    /// Range query: records with id strictly greater than `id`, in discovery
    /// order. Ids are stored sorted, so this is a binary search plus a slice.
    pub fn after(&self, id: u32) -> impl Iterator<Item = &ImageRecord> {
        let start = self.records.partition_point(|r| r.id <= id);
        self.records[start..].iter()
    }
}
