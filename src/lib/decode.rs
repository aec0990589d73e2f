//! Per-template barcode decoding and record annotation.
//!
//! For each [`Template`] the [`Decoder`]:
//!
//! 1. finds the barcode tag (and the quality tag next to it) on its records,
//! 2. optionally converts low quality barcode bases to no-calls,
//! 3. truncates each index to the panel widths,
//! 4. matches the barcode against the panel, counting the template against the resolved entry and
//!    against any index hopping combination,
//! 5. appends `#<name>` to the read group of every record, and to the read names if requested.
//!
//! Templates without a barcode tag are left untouched.

use anyhow::{ensure, Result};
use bstr::{BString, ByteSlice};
use noodles::sam::alignment::{
    record::data::field::Tag, record_buf::data::field::Value, RecordBuf,
};
use thiserror::Error;

use crate::{
    barcode_reference::{BarcodeReference, IndexSplit},
    header::{with_name_suffix, NAME_SUFFIX_SEPARATOR},
    matcher::{MatchResult, Matcher},
    metrics::{self, ReportSettings},
    quality::{self, QualityLengthMismatch},
    tag_hop::{HopTable, TagHopDetector},
    template::Template,
};

/// The errors that abort decoding of a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Record {name} has two different barcode tags: {first} and {second}")]
    ConflictingBarcodes { name: String, first: String, second: String },

    #[error("Record {name} has a {tag} tag that is not a string")]
    InvalidTagType { name: String, tag: String },

    #[error("Unable to convert low quality bases for record {name}")]
    QualityLength {
        name: String,
        #[source]
        source: QualityLengthMismatch,
    },
}

/// Settings that control barcode decoding, fixed for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeConfig {
    pub max_mismatches: usize,
    pub min_mismatch_delta: usize,
    pub max_no_calls: usize,
    /// Zero means the default threshold.
    pub max_low_quality_to_convert: u8,
    pub convert_low_quality: bool,
    pub change_read_name: bool,
    /// The 1-based position splitting the two indices, `None` to split on the separator.
    pub dual_tag: Option<usize>,
    pub ignore_pf: bool,
    pub barcode_tag: String,
    pub quality_tag: String,
}

impl DecodeConfig {
    pub fn matcher(&self) -> Matcher {
        Matcher::new(self.max_mismatches, self.min_mismatch_delta, self.max_no_calls)
    }

    pub fn index_split(&self) -> IndexSplit {
        IndexSplit::new(self.dual_tag)
    }

    /// The settings echoed in the metrics reports.
    pub fn report_settings(&self, tool: &str, version: &str, command_line: &str) -> ReportSettings {
        ReportSettings {
            barcode_tag: self.barcode_tag.clone(),
            max_mismatches: self.max_mismatches,
            min_mismatch_delta: self.min_mismatch_delta,
            max_no_calls: self.max_no_calls,
            ignore_pf: self.ignore_pf,
            tool: tool.to_string(),
            version: version.to_string(),
            command_line: command_line.to_string(),
        }
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
#[cfg(test)]
impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_mismatches: 1,
            min_mismatch_delta: 1,
            max_no_calls: 2,
            max_low_quality_to_convert: quality::DEFAULT_MAX_LOW_QUALITY_TO_CONVERT,
            convert_low_quality: false,
            change_read_name: false,
            dual_tag: None,
            ignore_pf: false,
            barcode_tag: "BC".to_string(),
            quality_tag: "QT".to_string(),
        }
    }
}

/// Parses a two character auxiliary tag name.
pub fn parse_tag(name: &str) -> Result<Tag> {
    let bytes = name.as_bytes();
    ensure!(
        bytes.len() == 2 && bytes.iter().all(u8::is_ascii_alphanumeric),
        "Tag names must be two alphanumeric characters, found: '{}'",
        name
    );
    Ok(Tag::new(bytes[0], bytes[1]))
}

/// Running totals for progress and summary logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeCounts {
    pub templates: u64,
    pub records: u64,
    /// Templates with no barcode tag, passed through as is.
    pub without_barcode: u64,
    /// Templates assigned to the unassigned entry.
    pub unassigned: u64,
    /// Unassigned templates whose indices matched two different samples.
    pub hopped: u64,
}

/// Decodes templates against a barcode panel, accumulating the per-barcode metrics.
#[derive(Debug)]
pub struct Decoder {
    config: DecodeConfig,
    matcher: Matcher,
    barcode_tag: Tag,
    quality_tag: Tag,
    reference: BarcodeReference,
    hops: HopTable,
    counts: DecodeCounts,
}

impl Decoder {
    pub fn new(config: DecodeConfig, reference: BarcodeReference) -> Result<Self> {
        let barcode_tag = parse_tag(&config.barcode_tag)?;
        let quality_tag = parse_tag(&config.quality_tag)?;
        Ok(Self {
            matcher: config.matcher(),
            config,
            barcode_tag,
            quality_tag,
            reference,
            hops: HopTable::new(),
            counts: DecodeCounts::default(),
        })
    }

    pub fn reference(&self) -> &BarcodeReference {
        &self.reference
    }

    pub fn hops(&self) -> &HopTable {
        &self.hops
    }

    pub fn counts(&self) -> DecodeCounts {
        self.counts
    }

    /// Decodes and annotates `template` in place, returning the name it was assigned to.
    ///
    /// Returns `None` for templates without a barcode tag.
    pub fn decode(&mut self, template: &mut Template) -> Result<Option<String>, TemplateError> {
        self.counts.templates += 1;
        self.counts.records += template.len() as u64;

        let (barcode, quality) = match self.extract_barcode(template)? {
            Some(tags) => tags,
            None => {
                self.counts.without_barcode += 1;
                return Ok(None);
            }
        };

        let barcode = if self.config.convert_low_quality {
            quality::correct(&barcode, quality.as_deref(), self.config.max_low_quality_to_convert)
                .map_err(|source| TemplateError::QualityLength {
                    name: template_name(template),
                    source,
                })?
        } else {
            barcode
        };
        let barcode = self.reference.fit_to_widths(&barcode);

        let pass_filter = template.records.first().map_or(true, |r| !r.flags().is_qc_fail());
        let name = self.classify(&barcode, pass_filter);
        self.annotate(template, &name);
        Ok(Some(name))
    }

    /// Resolves `barcode` to an entry, updating its counters and any index hopping counters.
    fn classify(&mut self, barcode: &str, pass_filter: bool) -> String {
        let result = self.matcher.classify(barcode, &self.reference);
        let index = result.index();
        metrics::record(self.reference.entry_mut(index), Some(barcode), pass_filter);

        match result {
            MatchResult::Match { .. } => (),
            MatchResult::TooManyNoCalls => self.counts.unassigned += 1,
            MatchResult::NoMatch => {
                self.counts.unassigned += 1;
                if let Some(hop) = TagHopDetector.detect(barcode, &self.reference, &mut self.hops)
                {
                    metrics::record(hop, Some(barcode), pass_filter);
                    self.counts.hopped += 1;
                }
            }
        }
        self.reference.entry(index).name.clone()
    }

    /// Finds the barcode tag, and the quality tag of the first record carrying it.
    fn extract_barcode(
        &self,
        template: &Template,
    ) -> Result<Option<(String, Option<String>)>, TemplateError> {
        let mut found: Option<(String, Option<String>)> = None;
        for record in &template.records {
            let barcode = match string_tag(record, self.barcode_tag, &self.config.barcode_tag)? {
                Some(barcode) => barcode,
                None => continue,
            };
            match &found {
                Some((first, _)) if *first != barcode => {
                    return Err(TemplateError::ConflictingBarcodes {
                        name: record_name(record),
                        first: first.clone(),
                        second: barcode,
                    });
                }
                Some(_) => (),
                None => {
                    let quality = string_tag(record, self.quality_tag, &self.config.quality_tag)?;
                    found = Some((barcode, quality));
                }
            }
        }
        Ok(found)
    }

    /// Appends `#<name>` to the read group of every record, and to the read names if configured.
    fn annotate(&self, template: &mut Template, name: &str) {
        for record in &mut template.records {
            let read_group = match record.data().get(&Tag::READ_GROUP) {
                Some(Value::String(rg)) => Some(with_name_suffix(&rg.to_str_lossy(), name)),
                _ => None,
            };
            if let Some(read_group) = read_group {
                record.data_mut().insert(Tag::READ_GROUP, Value::String(BString::from(read_group)));
            }

            if self.config.change_read_name {
                if let Some(read_name) = record.name_mut() {
                    read_name.extend_from_slice(NAME_SUFFIX_SEPARATOR.as_bytes());
                    read_name.extend_from_slice(name.as_bytes());
                }
            }
        }
    }
}

fn record_name(record: &RecordBuf) -> String {
    record.name().map_or_else(|| "*".to_string(), ToString::to_string)
}

fn template_name(template: &Template) -> String {
    template.name().map_or_else(|| "*".to_string(), ToString::to_string)
}

/// The value of a string tag, an error if the tag holds another type.
fn string_tag(
    record: &RecordBuf,
    tag: Tag,
    tag_name: &str,
) -> Result<Option<String>, TemplateError> {
    match record.data().get(&tag) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.to_str_lossy().into_owned())),
        Some(_) => Err(TemplateError::InvalidTagType {
            name: record_name(record),
            tag: tag_name.to_string(),
        }),
    }
}

#[cfg(test)]
mod test {
    use matches::assert_matches;
    use noodles::sam::alignment::record::Flags;
    use rstest::rstest;

    use super::*;
    use crate::barcode_reference::PanelRow;

    fn reference(sequences: &[&str]) -> BarcodeReference {
        let rows = sequences
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let row = PanelRow {
                    sequence: (*s).to_string(),
                    name: format!("S{}", i + 1),
                    ..PanelRow::default()
                };
                (i + 2, row)
            })
            .collect();
        BarcodeReference::from_rows(rows, IndexSplit::Separator).unwrap()
    }

    fn record(name: &str, tags: &[(&str, &str)], flags: Flags) -> RecordBuf {
        let mut record = RecordBuf::default();
        *record.name_mut() = Some(BString::from(name));
        *record.flags_mut() = flags;
        for (tag, value) in tags {
            record
                .data_mut()
                .insert(parse_tag(tag).unwrap(), Value::String(BString::from(*value)));
        }
        record
    }

    fn template(records: Vec<RecordBuf>) -> Template {
        Template { records }
    }

    fn tag_value(record: &RecordBuf, tag: &str) -> Option<String> {
        string_tag(record, parse_tag(tag).unwrap(), tag).unwrap()
    }

    // ############################################################################################
    // Tests for parse_tag
    // ############################################################################################

    #[rstest]
    #[case("BC", true)]
    #[case("q2", true)]
    #[case("B", false)]
    #[case("BCD", false)]
    #[case("B-", false)]
    fn test_parse_tag(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(parse_tag(name).is_ok(), ok);
    }

    // ############################################################################################
    // Tests for Decoder::decode
    // ############################################################################################

    #[test]
    fn test_decode_one_mismatch() {
        let mut decoder = Decoder::new(DecodeConfig::default(), reference(&["ACGT"])).unwrap();
        let mut template = template(vec![record(
            "r1",
            &[("BC", "ACGA"), ("RG", "rg1")],
            Flags::UNMAPPED,
        )]);

        let name = decoder.decode(&mut template).unwrap();
        assert_eq!(name.as_deref(), Some("S1"));
        assert_eq!(tag_value(&template.records[0], "RG").as_deref(), Some("rg1#S1"));
        assert_eq!(tag_value(&template.records[0], "BC").as_deref(), Some("ACGA"));
        assert_eq!(template.records[0].name().map(ToString::to_string).as_deref(), Some("r1"));

        let metrics = decoder.reference().entry(1).metrics;
        assert_eq!(metrics.reads, 1);
        assert_eq!(metrics.pf_reads, 1);
        assert_eq!(metrics.one_mismatch, 1);
        assert_eq!(metrics.perfect, 0);
        assert_eq!(decoder.reference().unassigned().metrics.reads, 0);
    }

    #[test]
    fn test_decode_annotates_every_record_and_counts_once() {
        let config = DecodeConfig { change_read_name: true, ..DecodeConfig::default() };
        let mut decoder = Decoder::new(config, reference(&["ACGT", "TTTT"])).unwrap();
        let mut template = template(vec![
            record("r1", &[("RG", "rg1")], Flags::SEGMENTED | Flags::FIRST_SEGMENT),
            record("r1", &[("BC", "ACGT"), ("RG", "rg1")], Flags::SEGMENTED | Flags::LAST_SEGMENT),
            record("r1", &[("BC", "ACGT")], Flags::SECONDARY),
        ]);

        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("S1"));
        for (i, record) in template.records.iter().enumerate() {
            assert_eq!(record.name().map(ToString::to_string).as_deref(), Some("r1#S1"));
            let expected = if i < 2 { Some("rg1#S1") } else { None };
            assert_eq!(tag_value(record, "RG").as_deref(), expected);
        }
        assert_eq!(decoder.reference().entry(1).metrics.reads, 1);
        assert_eq!(decoder.reference().entry(1).metrics.perfect, 1);
        assert_eq!(decoder.counts().records, 3);
        assert_eq!(decoder.counts().templates, 1);
    }

    #[test]
    fn test_decode_without_barcode_passes_through() {
        let mut decoder = Decoder::new(DecodeConfig::default(), reference(&["ACGT"])).unwrap();
        let original = template(vec![record("r1", &[("RG", "rg1")], Flags::UNMAPPED)]);
        let mut template = original.clone();
        assert_eq!(decoder.decode(&mut template).unwrap(), None);
        assert_eq!(template, original);
        assert_eq!(decoder.counts().without_barcode, 1);
        assert!(decoder.reference().entries().iter().all(|e| e.metrics.reads == 0));
    }

    #[test]
    fn test_decode_conflicting_barcodes() {
        let mut decoder = Decoder::new(DecodeConfig::default(), reference(&["ACGT"])).unwrap();
        let mut template = template(vec![
            record("r1", &[("BC", "ACGT")], Flags::UNMAPPED),
            record("r1", &[("BC", "ACGA")], Flags::UNMAPPED),
        ]);
        assert_matches!(
            decoder.decode(&mut template),
            Err(TemplateError::ConflictingBarcodes { .. })
        );
    }

    #[test]
    fn test_decode_non_string_barcode() {
        let mut decoder = Decoder::new(DecodeConfig::default(), reference(&["ACGT"])).unwrap();
        let mut rec = record("r1", &[], Flags::UNMAPPED);
        rec.data_mut().insert(parse_tag("BC").unwrap(), Value::Int32(7));
        let mut template = template(vec![rec]);
        assert_matches!(
            decoder.decode(&mut template),
            Err(TemplateError::InvalidTagType { .. })
        );
    }

    #[test]
    fn test_decode_unassigned_and_qc_fail() {
        let mut decoder = Decoder::new(DecodeConfig::default(), reference(&["AAAA", "CCCC"])).unwrap();
        let mut template = template(vec![record(
            "r1",
            &[("BC", "GGGG"), ("RG", "rg1")],
            Flags::QC_FAIL,
        )]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("0"));
        assert_eq!(tag_value(&template.records[0], "RG").as_deref(), Some("rg1#0"));
        let unassigned = decoder.reference().unassigned().metrics;
        assert_eq!(unassigned.reads, 1);
        assert_eq!(unassigned.pf_reads, 0);
        assert_eq!(decoder.counts().unassigned, 1);
    }

    #[test]
    fn test_decode_converts_low_quality() {
        let config = DecodeConfig { convert_low_quality: true, ..DecodeConfig::default() };
        let mut decoder = Decoder::new(config, reference(&["ACGTACGT", "TTTTTTTT"])).unwrap();
        // two mismatching bases with low quality become no-calls
        let mut template = template(vec![record(
            "r1",
            &[("BC", "ACGTACCC"), ("QT", "IIIIII##")],
            Flags::UNMAPPED,
        )]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("S1"));
        assert_eq!(decoder.reference().entry(1).metrics.perfect, 1);
    }

    #[test]
    fn test_decode_quality_length_mismatch() {
        let config = DecodeConfig { convert_low_quality: true, ..DecodeConfig::default() };
        let mut decoder = Decoder::new(config, reference(&["ACGT"])).unwrap();
        let mut template =
            template(vec![record("r1", &[("BC", "ACGT"), ("QT", "II")], Flags::UNMAPPED)]);
        assert_matches!(decoder.decode(&mut template), Err(TemplateError::QualityLength { .. }));
    }

    #[test]
    fn test_decode_quality_ignored_unless_configured() {
        let mut decoder = Decoder::new(DecodeConfig::default(), reference(&["ACGT"])).unwrap();
        let mut template =
            template(vec![record("r1", &[("BC", "ACGT"), ("QT", "II")], Flags::UNMAPPED)]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("S1"));
    }

    #[test]
    fn test_decode_truncates_to_panel_widths() {
        let mut decoder =
            Decoder::new(DecodeConfig::default(), reference(&["AAAA-CCCC", "GGGG-TTTT"])).unwrap();
        let mut template =
            template(vec![record("r1", &[("BC", "AAAAGT-CCCCAC")], Flags::UNMAPPED)]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("S1"));
        assert_eq!(decoder.reference().entry(1).metrics.perfect, 1);
    }

    #[test]
    fn test_decode_tag_hop() {
        let mut decoder =
            Decoder::new(DecodeConfig::default(), reference(&["AAAA-CCCC", "GGGG-TTTT"])).unwrap();
        for _ in 0..2 {
            let mut template = template(vec![record("r1", &[("BC", "AAAA-TTTT")], Flags::UNMAPPED)]);
            assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("0"));
        }

        assert_eq!(decoder.reference().entry(1).metrics.reads, 0);
        assert_eq!(decoder.reference().entry(2).metrics.reads, 0);
        assert_eq!(decoder.reference().unassigned().metrics.reads, 2);
        assert_eq!(decoder.hops().len(), 1);
        let hop = decoder.hops().get("AAAA-TTTT").unwrap();
        assert_eq!(hop.metrics.reads, 2);
        assert_eq!(hop.metrics.perfect, 2);
        assert_eq!(decoder.counts().hopped, 2);
    }

    #[test]
    fn test_decode_ambiguous_expected_barcode_is_not_a_hop() {
        let config = DecodeConfig { min_mismatch_delta: 2, ..DecodeConfig::default() };
        let mut decoder =
            Decoder::new(config, reference(&["AAAA-TTTA", "GGGG-TTTT", "AAAA-TTTT"])).unwrap();
        let mut template = template(vec![record("r1", &[("BC", "AAAA-TTTT")], Flags::UNMAPPED)]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("0"));
        assert!(decoder.hops().is_empty());
        assert_eq!(decoder.counts().hopped, 0);
        assert_eq!(decoder.reference().unassigned().metrics.reads, 1);
    }

    #[test]
    fn test_decode_too_many_no_calls_skips_hop_detection() {
        let config = DecodeConfig { max_no_calls: 0, ..DecodeConfig::default() };
        let mut decoder = Decoder::new(config, reference(&["AAAA-CCCC", "GGGG-TTTT"])).unwrap();
        let mut template = template(vec![record("r1", &[("BC", "AAAN-TTTT")], Flags::UNMAPPED)]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("0"));
        assert!(decoder.hops().is_empty());
        assert_eq!(decoder.reference().unassigned().metrics.reads, 1);
    }

    #[test]
    fn test_decode_with_offset_split() {
        let config = DecodeConfig { dual_tag: Some(5), ..DecodeConfig::default() };
        let rows = vec![(
            2,
            PanelRow { sequence: "AAAAxCCCC".to_string(), name: "S1".to_string(), ..PanelRow::default() },
        )];
        let reference = BarcodeReference::from_rows(rows, config.index_split()).unwrap();
        let mut decoder = Decoder::new(config, reference).unwrap();
        let mut template = template(vec![record("r1", &[("BC", "AAAAyCCCC")], Flags::UNMAPPED)]);
        assert_eq!(decoder.decode(&mut template).unwrap().as_deref(), Some("S1"));
    }

    #[test]
    fn test_invalid_tag_names() {
        let config = DecodeConfig { barcode_tag: "BCX".to_string(), ..DecodeConfig::default() };
        assert!(Decoder::new(config, reference(&["ACGT"])).is_err());
    }
}
