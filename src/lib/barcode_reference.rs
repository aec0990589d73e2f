//! The reference panel of expected sample barcodes.
//!
//! The panel is a tab-separated file with one header line followed by rows of
//! `sequence, name, library, sample, description`.  Entry `0` of a loaded
//! [`BarcodeReference`] is always the synthetic "unassigned" entry, padded with no-calls to the
//! widths established by the first data row.
use std::{fmt::Display, io::Read, path::Path};

use ahash::AHashMap;
use csv::{ReaderBuilder, StringRecord};
use fgoxide::io::Io;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::metrics::BarcodeMetrics;

/// Separator between the two halves of a dual index.
pub const INDEX_SEPARATOR: char = '-';

/// The base used to pad the indices of the unassigned entry.
pub const NO_CALL: char = 'N';

/// The name given to the unassigned entry.
pub const UNASSIGNED_NAME: &str = "0";

/// Position of the unassigned entry within [`BarcodeReference::entries`].
pub const UNASSIGNED_INDEX: usize = 0;

/// The error that may occur when loading the [`BarcodeReference`].
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Io error occurred")]
    FgError(#[from] fgoxide::FgError),

    #[error("Unable to parse the barcode line number {line}: {source}")]
    InvalidLine { source: csv::Error, line: usize },

    #[error("The barcode file contained no barcodes")]
    Empty,

    #[error("Missing barcode sequence on line {line}")]
    MissingSequence { line: usize },

    #[error("Missing barcode name on line {line}")]
    MissingName { line: usize },

    #[error(
        "Barcode {sequence} on line {line} has index lengths {actual1}/{actual2}, expected {expected1}/{expected2}"
    )]
    InconsistentWidths {
        sequence: String,
        line: usize,
        actual1: usize,
        actual2: usize,
        expected1: usize,
        expected2: usize,
    },

    #[error("Barcode name '{name}' on line {line} is not unique")]
    DuplicateName { name: String, line: usize },
}

/// How a barcode string is divided into its two indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSplit {
    /// Split on [`INDEX_SEPARATOR`], the second index is empty if there is no separator.
    Separator,
    /// A fixed 1-based position within the barcode.
    ///
    /// The first index is everything before the position and the second index everything after
    /// it; the character at the position itself is the separator and is dropped.
    Offset(usize),
}

impl IndexSplit {
    /// Build the split policy from the optional dual tag position.
    pub fn new(dual_tag: Option<usize>) -> Self {
        match dual_tag {
            Some(position) if position > 0 => Self::Offset(position),
            _ => Self::Separator,
        }
    }

    /// Splits `barcode` into its first and second index.
    pub fn split<'a>(&self, barcode: &'a str) -> (&'a str, &'a str) {
        match *self {
            Self::Separator => {
                let mut parts = barcode.split(INDEX_SEPARATOR).filter(|p| !p.is_empty());
                (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
            }
            Self::Offset(position) => {
                match (barcode.get(..position.saturating_sub(1)), barcode.get(position..)) {
                    (Some(first), Some(second)) => (first, second),
                    (Some(first), None) => (first, ""),
                    _ => (barcode, ""),
                }
            }
        }
    }
}

impl Display for IndexSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Separator => write!(f, "separator '{}'", INDEX_SEPARATOR),
            Self::Offset(position) => write!(f, "fixed offset {}", position),
        }
    }
}

/// Joins two indices, adding the separator only when the second index is non-empty.
pub fn join_indices(index1: &str, index2: &str) -> String {
    if index2.is_empty() {
        index1.to_string()
    } else {
        format!("{}{}{}", index1, INDEX_SEPARATOR, index2)
    }
}

/// One row of the panel file.  Trailing columns may be omitted.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelRow {
    #[serde(default)]
    pub sequence: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub library: String,
    #[serde(default)]
    pub sample: String,
    #[serde(default)]
    pub description: String,
}

/// An expected barcode along with the counters of the reads assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeEntry {
    /// The full barcode, `index1` and `index2` joined by [`INDEX_SEPARATOR`].
    pub sequence: String,
    pub index1: String,
    /// Empty for single-index panels.
    pub index2: String,
    pub name: String,
    pub library: String,
    pub sample: String,
    pub description: String,
    pub metrics: BarcodeMetrics,
}

impl BarcodeEntry {
    pub fn new(
        index1: &str,
        index2: &str,
        name: &str,
        library: &str,
        sample: &str,
        description: &str,
    ) -> Self {
        Self {
            sequence: join_indices(index1, index2),
            index1: index1.to_string(),
            index2: index2.to_string(),
            name: name.to_string(),
            library: library.to_string(),
            sample: sample.to_string(),
            description: description.to_string(),
            metrics: BarcodeMetrics::default(),
        }
    }

    /// The entry that collects every read not assigned to a sample.
    pub fn unassigned(index1_len: usize, index2_len: usize) -> Self {
        let index1 = NO_CALL.to_string().repeat(index1_len);
        let index2 = NO_CALL.to_string().repeat(index2_len);
        Self::new(&index1, &index2, UNASSIGNED_NAME, "", "", "")
    }
}

/// The expected barcodes, in file order, preceded by the unassigned entry.
#[derive(Debug, Clone)]
pub struct BarcodeReference {
    entries: Vec<BarcodeEntry>,
    /// Full sequence to position in `entries`.
    exact: AHashMap<String, usize>,
    split: IndexSplit,
    index1_len: usize,
    index2_len: usize,
}

impl BarcodeReference {
    /// Reads the panel from a (possibly gzipped) file.
    pub fn from_path<P: AsRef<Path>>(path: P, split: IndexSplit) -> Result<Self, PanelError> {
        let io = Io::default();
        let reader = io.new_reader(&path)?;
        Self::from_reader(reader, split)
    }

    /// Reads the panel from `reader`, discarding the first line.
    pub fn from_reader<R: Read>(reader: R, split: IndexSplit) -> Result<Self, PanelError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut rows = vec![];
        for (ordinal, record) in reader.records().enumerate() {
            // +2 for the header line and 1-based counting
            let line = ordinal + 2;
            let record: StringRecord =
                record.map_err(|e| PanelError::InvalidLine { source: e, line })?;
            let row: PanelRow =
                record.deserialize(None).map_err(|e| PanelError::InvalidLine { source: e, line })?;
            rows.push((line, row));
        }
        Self::from_rows(rows, split)
    }

    /// Builds the panel from rows paired with the line they were read from.
    pub fn from_rows(rows: Vec<(usize, PanelRow)>, split: IndexSplit) -> Result<Self, PanelError> {
        if rows.is_empty() {
            return Err(PanelError::Empty);
        }

        let mut entries: Vec<BarcodeEntry> = Vec::with_capacity(rows.len() + 1);
        let mut widths: Option<(usize, usize)> = None;
        for (line, row) in rows {
            if row.sequence.is_empty() {
                return Err(PanelError::MissingSequence { line });
            }
            if row.name.is_empty() {
                return Err(PanelError::MissingName { line });
            }
            if entries.iter().any(|e| e.name == row.name) {
                return Err(PanelError::DuplicateName { name: row.name, line });
            }

            let (index1, index2) = split.split(&row.sequence);
            let (expected1, expected2) = *widths.get_or_insert((index1.len(), index2.len()));
            if index1.len() != expected1 || index2.len() != expected2 {
                return Err(PanelError::InconsistentWidths {
                    sequence: row.sequence.clone(),
                    line,
                    actual1: index1.len(),
                    actual2: index2.len(),
                    expected1,
                    expected2,
                });
            }

            entries.push(BarcodeEntry::new(
                index1,
                index2,
                &row.name,
                &row.library,
                &row.sample,
                &row.description,
            ));
        }

        let (index1_len, index2_len) = widths.unwrap_or_default();
        entries.insert(UNASSIGNED_INDEX, BarcodeEntry::unassigned(index1_len, index2_len));

        let mut exact = AHashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if let Some(previous) = exact.get(&entry.sequence) {
                let previous: &BarcodeEntry = &entries[*previous];
                warn!(
                    "Barcode {} for '{}' duplicates '{}', exact matches go to '{}'",
                    entry.sequence, entry.name, previous.name, previous.name
                );
                continue;
            }
            exact.insert(entry.sequence.clone(), index);
        }

        debug!(
            "Loaded {} barcodes with index widths {}/{} split by {}",
            entries.len() - 1,
            index1_len,
            index2_len,
            split
        );

        Ok(Self { entries, exact, split, index1_len, index2_len })
    }

    /// The position of the entry whose full sequence is exactly `sequence`.
    pub fn lookup_exact(&self, sequence: &str) -> Option<usize> {
        self.exact.get(sequence).copied()
    }

    /// All entries, the unassigned entry first.
    pub fn entries(&self) -> &[BarcodeEntry] {
        &self.entries
    }

    /// The expected sample entries, without the unassigned entry.
    pub fn samples(&self) -> &[BarcodeEntry] {
        &self.entries[UNASSIGNED_INDEX + 1..]
    }

    pub fn entry(&self, index: usize) -> &BarcodeEntry {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut BarcodeEntry {
        &mut self.entries[index]
    }

    pub fn unassigned(&self) -> &BarcodeEntry {
        &self.entries[UNASSIGNED_INDEX]
    }

    /// The lengths of the first and second index shared by every sample.
    pub fn widths(&self) -> (usize, usize) {
        (self.index1_len, self.index2_len)
    }

    /// True if the barcodes have a second index.
    pub fn is_dual(&self) -> bool {
        self.index2_len > 0
    }

    /// Splits `barcode` with the panel's split policy.
    pub fn split<'a>(&self, barcode: &'a str) -> (&'a str, &'a str) {
        self.split.split(barcode)
    }

    /// Truncates each index of an observed barcode to the panel widths and rejoins them.
    ///
    /// Indices shorter than the panel are kept as they are.
    pub fn fit_to_widths(&self, barcode: &str) -> String {
        let (index1, index2) = self.split(barcode);
        let index1 = index1.get(..self.index1_len).unwrap_or(index1);
        if self.is_dual() {
            let index2 = index2.get(..self.index2_len).unwrap_or(index2);
            format!("{}{}{}", index1, INDEX_SEPARATOR, index2)
        } else {
            index1.to_string()
        }
    }
}
