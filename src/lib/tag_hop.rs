//! Detection of index hopping between the two halves of a dual index.
//!
//! A barcode that does not match any expected barcode as a whole may still have a first index
//! that exactly matches one sample and a second index that exactly matches another.  Each such
//! combination is tracked as its own synthetic entry in a [`HopTable`].

use ahash::AHashMap;
use itertools::Itertools;

use crate::{
    barcode_reference::{join_indices, BarcodeEntry, BarcodeReference, UNASSIGNED_INDEX},
    matcher::count_mismatches,
};

/// Library name given to hop entries.
pub const HOP_LIBRARY: &str = "DUMMY_LIB";
/// Sample name given to hop entries.
pub const HOP_SAMPLE: &str = "DUMMY_SAMPLE";
/// Name given to hop entries.
pub const HOP_NAME: &str = "0";

/// The observed index combinations, keyed by `index1-index2`.
#[derive(Debug, Default, Clone)]
pub struct HopTable {
    hops: AHashMap<String, BarcodeEntry>,
}

impl HopTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the entry for the combination, creating it on first sight.
    pub fn get_or_insert(&mut self, index1: &str, index2: &str) -> &mut BarcodeEntry {
        let key = join_indices(index1, index2);
        self.hops.entry(key).or_insert_with(|| {
            BarcodeEntry::new(index1, index2, HOP_NAME, HOP_LIBRARY, HOP_SAMPLE, "")
        })
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&BarcodeEntry> {
        self.hops.get(key)
    }

    /// The number of distinct combinations seen.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Total reads across all combinations.
    pub fn total_reads(&self) -> u64 {
        self.hops.values().map(|e| e.metrics.reads).sum()
    }

    /// Entries by descending reads, then descending perfect matches, then barcode.
    pub fn sorted(&self) -> Vec<&BarcodeEntry> {
        self.hops
            .values()
            .sorted_by(|a, b| {
                b.metrics
                    .reads
                    .cmp(&a.metrics.reads)
                    .then_with(|| b.metrics.perfect.cmp(&a.metrics.perfect))
                    .then_with(|| a.sequence.cmp(&b.sequence))
            })
            .collect()
    }
}

/// Finds the position of the entry whose index (chosen by `select`) is closest to `observed`.
fn best_index_match<F>(reference: &BarcodeReference, observed: &str, select: F) -> (usize, usize)
where
    F: Fn(&BarcodeEntry) -> &str,
{
    let mut best_dist = observed.len().max(1) + 1;
    let mut best_index = UNASSIGNED_INDEX;
    for (index, entry) in reference.entries().iter().enumerate().skip(UNASSIGNED_INDEX + 1) {
        let dist = count_mismatches(select(entry).as_bytes(), observed.as_bytes(), best_dist);
        if dist < best_dist {
            best_dist = dist;
            best_index = index;
        }
    }
    (best_index, best_dist)
}

/// Checks unassigned dual-index barcodes for index hopping.
#[derive(Debug, Clone, Copy)]
pub struct TagHopDetector;

impl TagHopDetector {
    /// Returns the hop entry for `barcode`, if each of its indices exactly matches a different
    /// sample and the combination is not itself an expected barcode.
    pub fn detect<'a>(
        &self,
        barcode: &str,
        reference: &BarcodeReference,
        hops: &'a mut HopTable,
    ) -> Option<&'a mut BarcodeEntry> {
        if !reference.is_dual() {
            return None;
        }
        let (index1, index2) = reference.split(barcode);
        let (best1, dist1) = best_index_match(reference, index1, |e| &e.index1);
        let (best2, dist2) = best_index_match(reference, index2, |e| &e.index2);

        if dist1 != 0 || dist2 != 0 || best1 == UNASSIGNED_INDEX || best1 == best2 {
            return None;
        }
        let index1 = &reference.entry(best1).index1;
        let index2 = &reference.entry(best2).index2;
        if reference.lookup_exact(&join_indices(index1, index2)).is_some() {
            return None;
        }
        Some(hops.get_or_insert(index1, index2))
    }
}
