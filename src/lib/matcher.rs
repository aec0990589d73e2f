//! Assign an observed barcode to the closest expected barcode.
//!
//! Barcodes are compared position by position.  Only no-calls in the observed barcode are
//! forgiven; an `N` in an expected barcode is an ordinary base.  An exact lookup is tried first
//! when `min_mismatch_delta <= 1`, otherwise every expected barcode is scanned, keeping the best
//! and second best mismatch counts.

use crate::barcode_reference::{BarcodeReference, UNASSIGNED_INDEX};

/// The base that is never counted as a mismatch in an observed barcode.
const WILDCARD: u8 = b'N';

/// Returns true if the base is a no-call.
#[inline]
fn byte_is_nocall(b: u8) -> bool {
    b == b'N' || b == b'n' || b == b'.'
}

/// The number of no-calls in `barcode`.
pub fn count_no_calls(barcode: &[u8]) -> usize {
    barcode.iter().filter(|&&b| byte_is_nocall(b)).count()
}

/// Counts the mismatches of `observed` against `expected`, stopping once `ceiling` is exceeded.
///
/// Positions of `expected` beyond the end of `observed` count as mismatches, extra observed bases
/// are ignored.  When the count goes past `ceiling` the returned value is `ceiling + 1`.
pub fn count_mismatches(expected: &[u8], observed: &[u8], ceiling: usize) -> usize {
    let mut mismatches = 0;
    for (i, &base) in expected.iter().enumerate() {
        let mismatch = match observed.get(i) {
            Some(&obs) => obs != WILDCARD && obs != base,
            None => true,
        };
        if mismatch {
            mismatches += 1;
            if mismatches > ceiling {
                break;
            }
        }
    }
    mismatches
}

/// The outcome of matching one observed barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Assigned to the entry at `index`.
    Match { index: usize },
    /// No expected barcode was close enough, or two were equally close.
    NoMatch,
    /// The barcode had more no-calls than allowed and was not compared.
    TooManyNoCalls,
}

impl MatchResult {
    /// Position of the resolved entry, the unassigned entry when not matched.
    pub fn index(&self) -> usize {
        match self {
            Self::Match { index } => *index,
            Self::NoMatch | Self::TooManyNoCalls => UNASSIGNED_INDEX,
        }
    }
}

/// Mismatch-tolerant barcode matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matcher {
    pub max_mismatches: usize,
    pub min_mismatch_delta: usize,
    pub max_no_calls: usize,
}

impl Matcher {
    pub fn new(max_mismatches: usize, min_mismatch_delta: usize, max_no_calls: usize) -> Self {
        Self { max_mismatches, min_mismatch_delta, max_no_calls }
    }

    /// Finds the entry `barcode` belongs to.
    pub fn classify(&self, barcode: &str, reference: &BarcodeReference) -> MatchResult {
        if count_no_calls(barcode.as_bytes()) > self.max_no_calls {
            return MatchResult::TooManyNoCalls;
        }
        self.best_match(barcode, reference)
    }

    /// Finds the closest entry without checking the number of no-calls.
    pub fn best_match(&self, barcode: &str, reference: &BarcodeReference) -> MatchResult {
        if self.min_mismatch_delta <= 1 {
            if let Some(index) = reference.lookup_exact(barcode) {
                return if index == UNASSIGNED_INDEX {
                    MatchResult::NoMatch
                } else {
                    MatchResult::Match { index }
                };
            }
        }

        let (index1_len, index2_len) = reference.widths();
        let mut best_dist = index1_len + index2_len + 1;
        let mut next_best_dist = best_dist;
        let mut best_index = None;

        let observed = barcode.as_bytes();
        for (index, entry) in reference.entries().iter().enumerate().skip(UNASSIGNED_INDEX + 1) {
            let dist = count_mismatches(entry.sequence.as_bytes(), observed, next_best_dist);
            if dist < best_dist {
                next_best_dist = best_dist;
                best_dist = dist;
                best_index = Some(index);
            } else if dist < next_best_dist {
                next_best_dist = dist;
            }
        }

        match best_index {
            Some(index)
                if best_dist <= self.max_mismatches
                    && next_best_dist - best_dist >= self.min_mismatch_delta =>
            {
                MatchResult::Match { index }
            }
            _ => MatchResult::NoMatch,
        }
    }
}
