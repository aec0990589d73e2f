//! Rewriting of the output header: one read group per input read group and barcode, plus a
//! `@PG` record for this run.

use std::collections::HashSet;

use anyhow::Result;
use bstr::BString;
use noodles::sam::{
    header::record::value::{
        map::{program::tag as pg_tag, read_group::tag as rg_tag, Program, ReadGroup},
        Map,
    },
    Header,
};

use crate::barcode_reference::{BarcodeEntry, BarcodeReference};

/// Separates the original value from the barcode name in read group IDs, tags and read names.
pub const NAME_SUFFIX_SEPARATOR: &str = "#";

/// Returns `value` with `#<name>` appended.
pub fn with_name_suffix(value: &str, name: &str) -> String {
    format!("{}{}{}", value, NAME_SUFFIX_SEPARATOR, name)
}

/// Copies `read_group` for `entry`.
///
/// The platform unit gets the entry name appended, and the library, sample and description are
/// replaced by the entry's own when it has them.  Fields missing from `read_group` are not added.
fn read_group_for_entry(read_group: &Map<ReadGroup>, entry: &BarcodeEntry) -> Map<ReadGroup> {
    let mut read_group = read_group.clone();
    let fields = read_group.other_fields_mut();
    if let Some(platform_unit) = fields.get_mut(&rg_tag::PLATFORM_UNIT) {
        let suffixed = with_name_suffix(&platform_unit.to_string(), &entry.name);
        *platform_unit = BString::from(suffixed);
    }
    for (tag, value) in [
        (rg_tag::LIBRARY, &entry.library),
        (rg_tag::SAMPLE, &entry.sample),
        (rg_tag::DESCRIPTION, &entry.description),
    ] {
        if value.is_empty() {
            continue;
        }
        if let Some(field) = fields.get_mut(&tag) {
            *field = BString::from(value.as_str());
        }
    }
    read_group
}

/// Replaces every read group with one copy per entry of `reference`, unassigned entry included.
///
/// Copies are identified by `<original id>#<entry name>`.
pub fn expand_read_groups(header: &mut Header, reference: &BarcodeReference) {
    let originals = std::mem::take(header.read_groups_mut());
    for (id, read_group) in originals {
        let id = id.to_string();
        for entry in reference.entries() {
            header.read_groups_mut().insert(
                BString::from(with_name_suffix(&id, &entry.name)),
                read_group_for_entry(&read_group, entry),
            );
        }
    }
}

/// The ID of the last program in the `@PG` chain, i.e. the one no other program points to.
pub fn get_last_program_id(header: &Header) -> Option<String> {
    let programs = header.programs();
    let program_map = programs.as_ref();

    let referenced: HashSet<&[u8]> = program_map
        .values()
        .filter_map(|pg| pg.other_fields().get(&pg_tag::PREVIOUS_PROGRAM_ID))
        .map(|pp| pp.as_slice())
        .collect();

    program_map
        .keys()
        .find(|id| !referenced.contains(id.as_slice()))
        .or_else(|| program_map.keys().next())
        .map(ToString::to_string)
}

/// Returns `base_id`, or `base_id.N` for the first N that is not already a program ID.
pub fn make_unique_program_id(header: &Header, base_id: &str) -> String {
    let programs = header.programs();
    let program_map = programs.as_ref();
    if !program_map.contains_key(base_id.as_bytes()) {
        return base_id.to_string();
    }
    (1..)
        .map(|i| format!("{}.{}", base_id, i))
        .find(|candidate| !program_map.contains_key(candidate.as_bytes()))
        .unwrap_or_else(|| base_id.to_string())
}

/// Appends a `@PG` record for `tool`, chained to the previous last program.
pub fn add_program(
    header: &mut Header,
    tool: &str,
    version: &str,
    command_line: &str,
) -> Result<()> {
    let previous = get_last_program_id(header);
    let id = make_unique_program_id(header, tool);

    let mut builder = Map::<Program>::builder()
        .insert(pg_tag::NAME, tool)
        .insert(pg_tag::VERSION, version)
        .insert(pg_tag::COMMAND_LINE, command_line);
    if let Some(pp) = previous.as_deref() {
        builder = builder.insert(pg_tag::PREVIOUS_PROGRAM_ID, pp);
    }

    header.programs_mut().add(BString::from(id), builder.build()?)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use bstr::BString;
    use noodles::sam::header::{
        record::value::{
            map::{read_group::tag as rg_tag, Program, ReadGroup},
            Map,
        },
        Builder as HeaderBuilder,
    };

    use super::*;
    use crate::barcode_reference::{IndexSplit, PanelRow};

    fn reference() -> BarcodeReference {
        let rows = vec![
            (
                2,
                PanelRow {
                    sequence: "AAAA".to_string(),
                    name: "sampleA".to_string(),
                    library: "libA".to_string(),
                    sample: "smA".to_string(),
                    description: String::new(),
                },
            ),
            (
                3,
                PanelRow {
                    sequence: "CCCC".to_string(),
                    name: "sampleB".to_string(),
                    ..PanelRow::default()
                },
            ),
        ];
        BarcodeReference::from_rows(rows, IndexSplit::Separator).unwrap()
    }

    macro_rules! field {
        ($header:expr, $id:expr, $tag:expr) => {
            $header
                .read_groups()
                .get($id.as_bytes())
                .and_then(|rg| rg.other_fields().get(&$tag))
                .map(ToString::to_string)
        };
    }

    #[test]
    fn test_expand_read_groups() {
        let rg = Map::<ReadGroup>::builder()
            .insert(rg_tag::PLATFORM_UNIT, "unit1")
            .insert(rg_tag::LIBRARY, "lib")
            .insert(rg_tag::SAMPLE, "sm")
            .insert(rg_tag::DESCRIPTION, "desc")
            .insert(rg_tag::PLATFORM, "ILLUMINA")
            .build()
            .unwrap();
        let mut header = HeaderBuilder::default().add_read_group(BString::from("rg1"), rg).build();

        expand_read_groups(&mut header, &reference());

        let ids: Vec<String> = header.read_groups().keys().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["rg1#0", "rg1#sampleA", "rg1#sampleB"]);

        assert_eq!(field!(header, "rg1#0", rg_tag::PLATFORM_UNIT).as_deref(), Some("unit1#0"));
        assert_eq!(field!(header, "rg1#0", rg_tag::LIBRARY).as_deref(), Some("lib"));
        assert_eq!(field!(header, "rg1#0", rg_tag::SAMPLE).as_deref(), Some("sm"));

        assert_eq!(
            field!(header, "rg1#sampleA", rg_tag::PLATFORM_UNIT).as_deref(),
            Some("unit1#sampleA")
        );
        assert_eq!(field!(header, "rg1#sampleA", rg_tag::LIBRARY).as_deref(), Some("libA"));
        assert_eq!(field!(header, "rg1#sampleA", rg_tag::SAMPLE).as_deref(), Some("smA"));
        assert_eq!(field!(header, "rg1#sampleA", rg_tag::DESCRIPTION).as_deref(), Some("desc"));
        assert_eq!(field!(header, "rg1#sampleA", rg_tag::PLATFORM).as_deref(), Some("ILLUMINA"));

        assert_eq!(field!(header, "rg1#sampleB", rg_tag::LIBRARY).as_deref(), Some("lib"));
    }

    #[test]
    fn test_expand_multiple_read_groups() {
        let rg1 = Map::<ReadGroup>::builder().build().unwrap();
        let rg2 = Map::<ReadGroup>::builder().build().unwrap();
        let mut header = HeaderBuilder::default()
            .add_read_group(BString::from("A"), rg1)
            .add_read_group(BString::from("B"), rg2)
            .build();

        expand_read_groups(&mut header, &reference());

        let ids: Vec<String> = header.read_groups().keys().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["A#0", "A#sampleA", "A#sampleB", "B#0", "B#sampleA", "B#sampleB"]);
        assert!(field!(header, "A#0", rg_tag::PLATFORM_UNIT).is_none());
        assert!(field!(header, "B#sampleA", rg_tag::LIBRARY).is_none());
    }

    #[test]
    fn test_expand_does_not_add_fields() {
        let rg = Map::<ReadGroup>::builder().insert(rg_tag::PLATFORM, "ILLUMINA").build().unwrap();
        let mut header = HeaderBuilder::default().add_read_group(BString::from("rg1"), rg).build();

        expand_read_groups(&mut header, &reference());

        let sample_a = header.read_groups().get(&b"rg1#sampleA"[..]).unwrap();
        assert_eq!(sample_a.other_fields().len(), 1);
        assert_eq!(field!(header, "rg1#sampleA", rg_tag::PLATFORM).as_deref(), Some("ILLUMINA"));
        assert!(field!(header, "rg1#sampleA", rg_tag::LIBRARY).is_none());
        assert!(field!(header, "rg1#sampleA", rg_tag::SAMPLE).is_none());
        assert!(field!(header, "rg1#sampleA", rg_tag::PLATFORM_UNIT).is_none());
    }

    #[test]
    fn test_expand_without_read_groups() {
        let mut header = Header::default();
        expand_read_groups(&mut header, &reference());
        assert!(header.read_groups().is_empty());
    }

    #[test]
    fn test_add_program() {
        let mut header = Header::default();
        add_program(&mut header, "bamdecode", "1.0", "bamdecode -i x.bam").unwrap();
        let programs = header.programs();
        let pg = programs.as_ref().get(&b"bamdecode"[..]).unwrap();
        assert_eq!(
            pg.other_fields().get(&pg_tag::VERSION).map(ToString::to_string).as_deref(),
            Some("1.0")
        );
        assert_eq!(
            pg.other_fields().get(&pg_tag::COMMAND_LINE).map(ToString::to_string).as_deref(),
            Some("bamdecode -i x.bam")
        );
        assert!(pg.other_fields().get(&pg_tag::PREVIOUS_PROGRAM_ID).is_none());
    }

    #[test]
    fn test_add_program_chains_and_uniquifies() {
        let mut header = Header::default();
        header.programs_mut().add(BString::from("bwa"), Map::<Program>::default()).unwrap();
        add_program(&mut header, "bamdecode", "1.0", "first").unwrap();
        add_program(&mut header, "bamdecode", "1.0", "second").unwrap();

        assert_eq!(get_last_program_id(&header).as_deref(), Some("bamdecode.1"));
        let programs = header.programs();
        let second = programs.as_ref().get(&b"bamdecode.1"[..]).unwrap();
        assert_eq!(
            second
                .other_fields()
                .get(&pg_tag::PREVIOUS_PROGRAM_ID)
                .map(ToString::to_string)
                .as_deref(),
            Some("bamdecode")
        );
        let first = programs.as_ref().get(&b"bamdecode"[..]).unwrap();
        assert_eq!(
            first.other_fields().get(&pg_tag::PREVIOUS_PROGRAM_ID).map(ToString::to_string).as_deref(),
            Some("bwa")
        );
    }

    #[test]
    fn test_with_name_suffix() {
        assert_eq!(with_name_suffix("ACGT", "S1"), "ACGT#S1");
    }
}
