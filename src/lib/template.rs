//! Grouping of consecutive records that share a read name.
use std::io;

use bstr::BStr;
use noodles::sam::alignment::RecordBuf;

/// All records of one read: mates, secondary and supplementary alignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub records: Vec<RecordBuf>,
}

impl Template {
    /// The read name shared by the records.
    pub fn name(&self) -> Option<&BStr> {
        self.records.first().and_then(RecordBuf::name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Groups records into [`Template`]s.
///
/// The input must already have the records of each read next to one another; no sorting is done.
/// Records without a name are grouped with each other.
pub struct TemplateIterator<I>
where
    I: Iterator<Item = io::Result<RecordBuf>>,
{
    records: I,
    /// The first record of the next template, read while finishing the previous one.
    pending: Option<RecordBuf>,
}

impl<I> TemplateIterator<I>
where
    I: Iterator<Item = io::Result<RecordBuf>>,
{
    pub fn new(records: I) -> Self {
        Self { records, pending: None }
    }
}

impl<I> Iterator for TemplateIterator<I>
where
    I: Iterator<Item = io::Result<RecordBuf>>,
{
    type Item = io::Result<Template>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.pending.take() {
            Some(record) => record,
            None => match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            },
        };

        let mut records = vec![first];
        loop {
            match self.records.next() {
                None => break,
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(record)) => {
                    if record.name() == records[0].name() {
                        records.push(record);
                    } else {
                        self.pending = Some(record);
                        break;
                    }
                }
            }
        }
        Some(Ok(Template { records }))
    }
}
