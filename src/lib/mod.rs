//! A library of functionality for decoding sample barcodes in SAM/BAM files.
//!
//! # Overview
//!
//! The flow of data is as follows:
//!
//! - The [`barcode_reference::BarcodeReference`] holds the expected barcodes loaded from the
//!   barcode file, along with the counters of the reads assigned to each.
//! - The [`record_io::AlignmentReader`] reads records, which the
//!   [`template::TemplateIterator`] groups by read name.
//! - The [`decode::Decoder`] matches the barcode tag of each template with the
//!   [`matcher::Matcher`], checks unassigned dual index barcodes with the
//!   [`tag_hop::TagHopDetector`], and rewrites the read group tags of the records.
//! - The output header gets one read group per barcode from [`header::expand_read_groups`], and
//!   the records are written with the [`record_io::AlignmentWriter`].
//! - [`metrics`] reports are written at the end of the run.
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod barcode_reference;
pub mod decode;
pub mod header;
pub mod matcher;
pub mod metrics;
pub mod opts;
pub mod quality;
pub mod record_io;
pub mod run;
pub mod tag_hop;
pub mod template;
pub mod utils;
