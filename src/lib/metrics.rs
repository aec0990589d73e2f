//! Per-barcode counters and the metrics reports written at the end of a run.
//!
//! The barcode report has one row per expected barcode, in panel order, followed by the
//! unassigned row.  For dual-index panels a second report lists each index hopping combination.

use std::{io::Write, path::Path};

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use fgoxide::io::Io;

use crate::{
    barcode_reference::{BarcodeEntry, BarcodeReference, UNASSIGNED_INDEX},
    matcher::count_mismatches,
    tag_hop::HopTable,
};

/// Suffix appended to the metrics path for the index hopping report.
pub const HOPS_SUFFIX: &str = ".hops";

/// The counts of templates assigned to one barcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarcodeMetrics {
    /// Templates assigned to the barcode.
    pub reads: u64,
    /// Templates assigned to the barcode that passed filter.
    pub pf_reads: u64,
    /// Templates whose barcode matched with no mismatches.
    pub perfect: u64,
    pub pf_perfect: u64,
    /// Templates whose barcode matched with exactly one mismatch.
    pub one_mismatch: u64,
    pub pf_one_mismatch: u64,
}

impl BarcodeMetrics {
    /// Counts one template with the given number of mismatches, if known.
    pub fn update(&mut self, mismatches: Option<usize>, pass_filter: bool) {
        self.reads += 1;
        if pass_filter {
            self.pf_reads += 1;
        }
        match mismatches {
            Some(0) => {
                self.perfect += 1;
                if pass_filter {
                    self.pf_perfect += 1;
                }
            }
            Some(1) => {
                self.one_mismatch += 1;
                if pass_filter {
                    self.pf_one_mismatch += 1;
                }
            }
            _ => (),
        }
    }
}

/// Counts one template against `entry`, comparing `observed` to the entry's full sequence.
pub fn record(entry: &mut BarcodeEntry, observed: Option<&str>, pass_filter: bool) {
    let mismatches = observed
        .map(|o| count_mismatches(entry.sequence.as_bytes(), o.as_bytes(), usize::MAX));
    entry.metrics.update(mismatches, pass_filter);
}

/// The run parameters echoed in the preamble of each report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub barcode_tag: String,
    pub max_mismatches: usize,
    pub min_mismatch_delta: usize,
    pub max_no_calls: usize,
    /// Leave out the pass-filter columns.
    pub ignore_pf: bool,
    pub tool: String,
    pub version: String,
    pub command_line: String,
}

/// Totals across the panel used to derive the per-row fractions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PanelTotals {
    /// Includes the unassigned entry.
    total_reads: u64,
    /// Includes the unassigned entry.
    total_pf_reads: u64,
    /// Reads assigned to expected barcodes.
    assigned_reads: u64,
    assigned_pf_reads: u64,
    max_reads: u64,
    max_pf_reads: u64,
    num_samples: u64,
}

impl PanelTotals {
    fn new(reference: &BarcodeReference) -> Self {
        let unassigned = reference.unassigned().metrics;
        let mut totals = Self {
            total_reads: unassigned.reads,
            total_pf_reads: unassigned.pf_reads,
            ..Self::default()
        };
        for entry in reference.samples() {
            let m = entry.metrics;
            totals.total_reads += m.reads;
            totals.total_pf_reads += m.pf_reads;
            totals.assigned_reads += m.reads;
            totals.assigned_pf_reads += m.pf_reads;
            totals.max_reads = totals.max_reads.max(m.reads);
            totals.max_pf_reads = totals.max_pf_reads.max(m.pf_reads);
            totals.num_samples += 1;
        }
        totals
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(numerator: u64, denominator: u64) -> String {
    let value = if denominator == 0 { 0.0 } else { numerator as f64 / denominator as f64 };
    format!("{:.3}", value)
}

/// Which columns a report carries.
#[derive(Debug, Clone, Copy)]
struct Layout {
    /// Include the name, library, sample, description and one mismatch columns.
    full: bool,
    ignore_pf: bool,
}

impl Layout {
    fn header(self) -> Vec<&'static str> {
        let mut columns = vec!["BARCODE"];
        if self.full {
            columns.extend(["BARCODE_NAME", "LIBRARY_NAME", "SAMPLE_NAME", "DESCRIPTION"]);
        }
        columns.push("READS");
        if !self.ignore_pf {
            columns.push("PF_READS");
        }
        columns.push("PERFECT_MATCHES");
        if !self.ignore_pf {
            columns.push("PF_PERFECT_MATCHES");
        }
        if self.full {
            columns.push("ONE_MISMATCH_MATCHES");
            if !self.ignore_pf {
                columns.push("PF_ONE_MISMATCH_MATCHES");
            }
        }
        columns.extend(["PCT_MATCHES", "RATIO_THIS_BARCODE_TO_BEST_BARCODE_PCT"]);
        if !self.ignore_pf {
            columns.extend([
                "PF_PCT_MATCHES",
                "PF_RATIO_THIS_BARCODE_TO_BEST_BARCODE_PCT",
                "PF_NORMALIZED_MATCHES",
            ]);
        }
        columns
    }

    /// Formats one row.  `assigned_pf_reads` is the denominator of the normalized column.
    fn row(
        self,
        entry: &BarcodeEntry,
        metrics: &BarcodeMetrics,
        name: &str,
        totals: &PanelTotals,
        assigned_pf_reads: u64,
    ) -> Vec<String> {
        let mut row = vec![entry.sequence.clone()];
        if self.full {
            row.extend([
                name.to_string(),
                entry.library.clone(),
                entry.sample.clone(),
                entry.description.clone(),
            ]);
        }
        row.push(metrics.reads.to_string());
        if !self.ignore_pf {
            row.push(metrics.pf_reads.to_string());
        }
        row.push(metrics.perfect.to_string());
        if !self.ignore_pf {
            row.push(metrics.pf_perfect.to_string());
        }
        if self.full {
            row.push(metrics.one_mismatch.to_string());
            if !self.ignore_pf {
                row.push(metrics.pf_one_mismatch.to_string());
            }
        }
        row.push(fraction(metrics.reads, totals.total_reads));
        row.push(fraction(metrics.reads, totals.max_reads));
        if !self.ignore_pf {
            row.push(fraction(metrics.pf_reads, totals.total_pf_reads));
            row.push(fraction(metrics.pf_reads, totals.max_pf_reads));
            row.push(fraction(metrics.pf_reads * totals.num_samples, assigned_pf_reads));
        }
        row
    }
}

/// Writes the parameter and provenance lines that precede the column header.
fn write_preamble<W: Write>(writer: &mut W, settings: &ReportSettings) -> std::io::Result<()> {
    writeln!(writer, "##")?;
    writeln!(
        writer,
        "# BARCODE_TAG_NAME={} MAX_MISMATCHES={} MIN_MISMATCH_DELTA={} MAX_NO_CALLS={} ",
        settings.barcode_tag,
        settings.max_mismatches,
        settings.min_mismatch_delta,
        settings.max_no_calls
    )?;
    writeln!(writer, "##")?;
    writeln!(
        writer,
        "# ID:{} VN:{} CL:{}",
        settings.tool, settings.version, settings.command_line
    )?;
    writeln!(writer)?;
    writeln!(writer, "##")
}

/// Writes the preamble and `rows` to `path` as tab-separated text.
fn write_report<P: AsRef<Path>>(
    path: &P,
    settings: &ReportSettings,
    summary: Option<String>,
    rows: Vec<Vec<String>>,
) -> Result<()> {
    let io = Io::default();
    let mut out = io
        .new_writer(path)
        .with_context(|| format!("Unable to create metrics file: {:?}", path.as_ref()))?;
    if let Some(summary) = summary {
        writeln!(out, "##")?;
        writeln!(out, "{}", summary)?;
    }
    write_preamble(&mut out, settings)?;

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .has_headers(false)
        .from_writer(out);
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the per-barcode report to `path`.
///
/// The unassigned entry is written last with its perfect match counts zeroed and no name.
pub fn write_barcode_metrics<P: AsRef<Path>>(
    path: &P,
    reference: &BarcodeReference,
    settings: &ReportSettings,
) -> Result<()> {
    let totals = PanelTotals::new(reference);
    let layout = Layout { full: true, ignore_pf: settings.ignore_pf };

    let mut rows = vec![layout.header().into_iter().map(String::from).collect::<Vec<_>>()];
    for entry in reference.samples() {
        rows.push(layout.row(entry, &entry.metrics, &entry.name, &totals, totals.assigned_pf_reads));
    }
    let unassigned = reference.entry(UNASSIGNED_INDEX);
    let metrics = BarcodeMetrics { perfect: 0, pf_perfect: 0, ..unassigned.metrics };
    rows.push(layout.row(unassigned, &metrics, "", &totals, 0));

    write_report(path, settings, None, rows)
}

/// Writes the index hopping report to `path`.
pub fn write_hop_metrics<P: AsRef<Path>>(
    path: &P,
    reference: &BarcodeReference,
    hops: &HopTable,
    settings: &ReportSettings,
) -> Result<()> {
    let totals = PanelTotals::new(reference);
    let layout = Layout { full: false, ignore_pf: settings.ignore_pf };
    let hop_reads = hops.total_reads();

    #[allow(clippy::cast_precision_loss)]
    let pct_hops = if totals.total_reads == 0 {
        0.0
    } else {
        hop_reads as f64 / totals.total_reads as f64 * 100.0
    };
    let summary = format!(
        "# TOTAL_READS={}, TOTAL_ORIGINAL_TAG_READS={}, TOTAL_TAG_HOP_READS={}, MAX_READ_ON_A_TAG={}, TOTAL_TAG_HOPS={}, PCT_TAG_HOPS={:.6}",
        totals.total_reads,
        totals.assigned_reads,
        hop_reads,
        totals.max_reads,
        hops.len(),
        pct_hops
    );

    let mut rows = vec![layout.header().into_iter().map(String::from).collect::<Vec<_>>()];
    for entry in hops.sorted() {
        rows.push(layout.row(entry, &entry.metrics, &entry.name, &totals, totals.assigned_pf_reads));
    }

    write_report(path, settings, Some(summary), rows)
}

/// The path of the index hopping report for the given metrics path.
pub fn hops_path<P: AsRef<Path>>(metrics: &P) -> std::path::PathBuf {
    let mut path = metrics.as_ref().as_os_str().to_owned();
    path.push(HOPS_SUFFIX);
    path.into()
}
