use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use log::info;

use crate::{
    barcode_reference::BarcodeReference,
    decode::{parse_tag, Decoder},
    header::{add_program, expand_read_groups},
    metrics::{hops_path, write_barcode_metrics, write_hop_metrics},
    opts::{Opts, TOOL_NAME},
    record_io::{AlignmentReader, AlignmentWriter},
    template::TemplateIterator,
    utils::built_info,
};

/// How often, in templates, progress is logged.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// The highest BGZF compression level.
const MAX_COMPRESSION_LEVEL: u8 = 9;

/// Run barcode decoding.
#[allow(clippy::too_many_lines)]
pub fn run(opts: Opts) -> Result<(), anyhow::Error> {
    let config = opts.as_decode_config();
    let command_line = std::env::args().join(" ");

    // Preflight checks
    let input = opts.input_path().context("An input SAM/BAM must be given")?.clone();
    ensure!(
        opts.barcode_file.exists(),
        "Barcode file does not exist: {}",
        opts.barcode_file.to_string_lossy()
    );
    parse_tag(&config.barcode_tag).context("Invalid barcode tag name")?;
    parse_tag(&config.quality_tag).context("Invalid quality tag name")?;
    if let Some(position) = config.dual_tag {
        ensure!(position >= 2, "The dual tag position must be at least 2, found: {}", position);
    }
    if let Some(level) = opts.compression_level {
        ensure!(
            level <= MAX_COMPRESSION_LEVEL,
            "The compression level must be between 0 and {}, found: {}",
            MAX_COMPRESSION_LEVEL,
            level
        );
    }

    let reference = BarcodeReference::from_path(&opts.barcode_file, config.index_split())
        .with_context(|| {
            format!("Unable to read barcode file: {}", opts.barcode_file.to_string_lossy())
        })?;
    info!(
        "Loaded {} barcodes from {}",
        reference.samples().len(),
        opts.barcode_file.to_string_lossy()
    );

    let mut reader = AlignmentReader::from_path(&input, opts.input_fmt)?;
    info!("Reading {} from {}", reader.format(), input.to_string_lossy());

    let mut header = reader.header().clone();
    let read_groups = header.read_groups().len();
    expand_read_groups(&mut header, &reference);
    add_program(&mut header, TOOL_NAME, built_info::VERSION.as_str(), &command_line)
        .context("Unable to add the program record to the header")?;
    info!(
        "Expanded {} read groups to {} read groups",
        read_groups,
        header.read_groups().len()
    );

    let mut writer =
        AlignmentWriter::from_path(&opts.output, opts.output_fmt, opts.compression_level)?;
    let output_name = opts.output.to_string_lossy().to_string();
    info!("Writing {} to {}", writer.format(), output_name);
    writer
        .write_header(&header)
        .with_context(|| format!("Unable to write header to: {}", output_name))?;

    let mut decoder = Decoder::new(config.clone(), reference)?;
    for template in TemplateIterator::new(reader.records()) {
        let mut template = template
            .with_context(|| format!("Unable to read records from: {}", input.to_string_lossy()))?;
        decoder.decode(&mut template)?;
        for record in &template.records {
            writer
                .write_record(&header, record)
                .with_context(|| format!("Unable to write records to: {}", output_name))?;
        }

        let templates = decoder.counts().templates;
        if templates % PROGRESS_INTERVAL == 0 {
            info!("Processed {} templates", templates);
        }
    }
    writer.finish().with_context(|| format!("Unable to finish writing: {}", output_name))?;

    if let Some(metrics) = &opts.metrics_file {
        let settings =
            config.report_settings(TOOL_NAME, built_info::VERSION.as_str(), &command_line);
        write_barcode_metrics(metrics, decoder.reference(), &settings)?;
        info!("Wrote barcode metrics to {}", metrics.to_string_lossy());
        if decoder.reference().is_dual() {
            let hops = hops_path(metrics);
            write_hop_metrics(&hops, decoder.reference(), decoder.hops(), &settings)?;
            info!("Wrote index hopping metrics to {}", hops.to_string_lossy());
        }
    }

    let counts = decoder.counts();
    info!(
        "Processed {} records in {} templates: {} without a barcode, {} unassigned, {} index hops",
        counts.records, counts.templates, counts.without_barcode, counts.unassigned, counts.hopped
    );
    Ok(())
}
