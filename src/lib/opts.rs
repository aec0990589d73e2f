#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use crate::{decode::DecodeConfig, record_io::AlignmentFormat, utils::built_info};

pub static TOOL_NAME: &str = "bamdecode";

static SHORT_USAGE: &str = "Decodes sample barcodes in SAM/BAM files and annotates read groups.";

static LONG_USAGE: &str = "
Decodes sample barcodes in SAM/BAM files and annotates read groups.

Records are processed in groups that share a read name, so all records of a read must be next to
one another in the input (as in unaligned or name grouped files).  The barcode of each read is
taken from its barcode tag (BC by default) and matched against the barcodes in the barcode file.
The read group tag of every record is suffixed with `#<barcode name>`, or `#0` for reads that match
no barcode, and the header gets one read group per original read group and barcode.

The barcode file is tab separated with a header line and the columns:

  barcode_sequence  barcode_name  library_name  sample_name  description

Dual index barcodes are written as `INDEX1-INDEX2`, or split at a fixed position with --dual-tag.

Example invocation:

bamdecode \\
  --input unaligned.bam \\
  --barcode-file barcodes.tsv \\
  --metrics-file decode.metrics \\
  --output decoded.bam
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    /// The input SAM/BAM, `-` for standard input.
    #[clap(long, short = 'i', display_order = 1, required_unless_present = "input-positional")]
    pub input: Option<PathBuf>,

    /// The input SAM/BAM, as an alternative to `--input`.
    #[clap(name = "input-positional", value_name = "INPUT", conflicts_with = "input")]
    pub input_positional: Option<PathBuf>,

    /// The output SAM/BAM, `-` for standard output.
    ///
    /// Written as SAM to standard output and BAM to files unless the extension or `--output-fmt`
    /// says otherwise.
    #[clap(long, short = 'o', default_value = "-", display_order = 2)]
    pub output: PathBuf,

    /// The tab separated file of expected barcodes.
    #[clap(long, short = 'b', display_order = 3)]
    pub barcode_file: PathBuf,

    /// Write per-barcode metrics to this file.
    ///
    /// For dual index barcodes the index hopping metrics are written to the same path with a
    /// `.hops` suffix.
    #[clap(long, display_order = 4)]
    pub metrics_file: Option<PathBuf>,

    /// Maximum mismatches for a barcode to be considered a match.
    #[clap(long, default_value = "1", display_order = 11)]
    pub max_mismatches: usize,

    /// Minimum difference between the number of mismatches in the best and second best barcodes.
    #[clap(long, default_value = "1", display_order = 11)]
    pub min_mismatch_delta: usize,

    /// Maximum no-calls in a barcode before it is left unassigned without being compared.
    #[clap(long, default_value = "2", display_order = 11)]
    pub max_no_calls: usize,

    /// Convert low quality barcode bases to no-calls before matching.
    #[clap(long, display_order = 12)]
    pub convert_low_quality: bool,

    /// The quality at or below which barcode bases are converted to no-calls.
    #[clap(long, default_value = "15", display_order = 12)]
    pub max_low_quality_to_convert: u8,

    /// The 1-based position of the separator between the two indices of a dual index barcode.
    ///
    /// Without this the indices are split on `-`.  Setting it also sets `--max-no-calls` to 0.
    #[clap(long, display_order = 13)]
    pub dual_tag: Option<usize>,

    /// Append `#<barcode name>` to read names.
    #[clap(long, display_order = 21)]
    pub change_read_name: bool,

    /// The tag holding the barcode.
    #[clap(long, default_value = "BC", display_order = 21)]
    pub barcode_tag_name: String,

    /// The tag holding the barcode qualities.
    #[clap(long, default_value = "QT", display_order = 21)]
    pub quality_tag_name: String,

    /// Leave the pass filter columns out of the metrics.
    #[clap(long, display_order = 21)]
    pub ignore_pf: bool,

    /// The input format, inferred from the extension or contents when not given.
    #[clap(long, display_order = 31)]
    pub input_fmt: Option<AlignmentFormat>,

    /// The output format, inferred from the extension when not given.
    #[clap(long, display_order = 31)]
    pub output_fmt: Option<AlignmentFormat>,

    /// The BGZF compression level (0-9) of BAM output.
    #[clap(long, display_order = 31)]
    pub compression_level: Option<u8>,

    /// Log debug messages.
    #[clap(long, short = 'v', display_order = 41)]
    pub verbose: bool,
}

impl Opts {
    /// The input path, from either `--input` or the positional argument.
    pub fn input_path(&self) -> Option<&PathBuf> {
        self.input.as_ref().or(self.input_positional.as_ref())
    }

    /// The no-call limit in effect, zero whenever the indices are split at a fixed position.
    pub fn effective_max_no_calls(&self) -> usize {
        if self.dual_tag.is_some() {
            0
        } else {
            self.max_no_calls
        }
    }

    /// Extract a [`DecodeConfig`] from the CLI opts.
    pub fn as_decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            max_mismatches: self.max_mismatches,
            min_mismatch_delta: self.min_mismatch_delta,
            max_no_calls: self.effective_max_no_calls(),
            max_low_quality_to_convert: self.max_low_quality_to_convert,
            convert_low_quality: self.convert_low_quality,
            change_read_name: self.change_read_name,
            dual_tag: self.dual_tag,
            ignore_pf: self.ignore_pf,
            barcode_tag: self.barcode_tag_name.clone(),
            quality_tag: self.quality_tag_name.clone(),
        }
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for Opts {
    fn default() -> Self {
        Self {
            input: None,
            input_positional: None,
            output: PathBuf::from(crate::record_io::STDIO_PATH),
            barcode_file: PathBuf::default(),
            metrics_file: None,
            max_mismatches: 1,
            min_mismatch_delta: 1,
            max_no_calls: 2,
            convert_low_quality: false,
            max_low_quality_to_convert: crate::quality::DEFAULT_MAX_LOW_QUALITY_TO_CONVERT,
            dual_tag: None,
            change_read_name: false,
            barcode_tag_name: String::from("BC"),
            quality_tag_name: String::from("QT"),
            ignore_pf: false,
            input_fmt: None,
            output_fmt: None,
            compression_level: None,
            verbose: false,
        }
    }
}

/// Parse args and set up logging / tracing
pub fn setup() -> Opts {
    let opts = Opts::parse();

    let default_level = if opts.verbose { "debug" } else { "info" };
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", default_level);
    }
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    opts
}
