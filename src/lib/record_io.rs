//! Opening SAM and BAM files (or standard streams) for reading and writing.
//!
//! The format is taken from an explicit hint when given, then from the file extension.  Inputs
//! with neither are sniffed for the gzip magic bytes that start every BGZF (BAM) file; outputs
//! with neither are written as BAM, or as SAM when writing to standard output.

use std::{
    ffi::OsStr,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use noodles::{
    bam, bgzf,
    sam::{self, alignment::io::Write as AlignmentWrite, alignment::RecordBuf, Header},
};
use strum::{Display, EnumString};

/// The path that denotes standard input or output.
pub const STDIO_PATH: &str = "-";

/// The first two bytes of any gzip (and thus BGZF) stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Size of the buffer around raw input and output streams.
const BUFSIZE: usize = 64 * 1024;

/// The container formats that can be read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum AlignmentFormat {
    Sam,
    Bam,
}

impl AlignmentFormat {
    /// The format implied by the extension of `path`, if any.
    pub fn from_extension<P: AsRef<Path>>(path: &P) -> Option<Self> {
        let ext = path.as_ref().extension().and_then(OsStr::to_str)?;
        if ext.eq_ignore_ascii_case("bam") {
            Some(Self::Bam)
        } else if ext.eq_ignore_ascii_case("sam") {
            Some(Self::Sam)
        } else {
            None
        }
    }
}

fn is_stdio<P: AsRef<Path>>(path: &P) -> bool {
    path.as_ref().as_os_str() == STDIO_PATH
}

enum ReaderInner {
    Sam(sam::io::Reader<Box<dyn BufRead>>),
    Bam(bam::io::Reader<bgzf::io::Reader<Box<dyn BufRead>>>),
}

/// Sequential reader of alignment records.
pub struct AlignmentReader {
    inner: ReaderInner,
    header: Header,
    format: AlignmentFormat,
}

impl AlignmentReader {
    /// Opens `path` (or standard input for `-`) and reads its header.
    pub fn from_path<P: AsRef<Path>>(path: &P, hint: Option<AlignmentFormat>) -> Result<Self> {
        let name = path.as_ref().to_string_lossy().to_string();
        let raw: Box<dyn BufRead> = if is_stdio(path) {
            Box::new(BufReader::with_capacity(BUFSIZE, io::stdin()))
        } else {
            let file = File::open(path)
                .with_context(|| format!("Unable to open input file: {}", name))?;
            Box::new(BufReader::with_capacity(BUFSIZE, file))
        };
        Self::from_reader(raw, hint.or_else(|| AlignmentFormat::from_extension(path)))
            .with_context(|| format!("Unable to read alignments from: {}", name))
    }

    /// Wraps `reader`, sniffing the format when `format` is not given, and reads the header.
    pub fn from_reader(
        mut reader: Box<dyn BufRead>,
        format: Option<AlignmentFormat>,
    ) -> Result<Self> {
        let format = match format {
            Some(format) => format,
            None => {
                if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
                    AlignmentFormat::Bam
                } else {
                    AlignmentFormat::Sam
                }
            }
        };

        let (inner, header) = match format {
            AlignmentFormat::Sam => {
                let mut reader = sam::io::Reader::new(reader);
                let header = reader.read_header().context("Unable to read SAM header")?;
                (ReaderInner::Sam(reader), header)
            }
            AlignmentFormat::Bam => {
                let mut reader = bam::io::Reader::new(reader);
                let header = reader.read_header().context("Unable to read BAM header")?;
                (ReaderInner::Bam(reader), header)
            }
        };
        Ok(Self { inner, header, format })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn format(&self) -> AlignmentFormat {
        self.format
    }

    /// Reads the next record into `record`, returning 0 at the end of the input.
    pub fn read_record(&mut self, record: &mut RecordBuf) -> io::Result<usize> {
        match &mut self.inner {
            ReaderInner::Sam(reader) => reader.read_record_buf(&self.header, record),
            ReaderInner::Bam(reader) => reader.read_record_buf(&self.header, record),
        }
    }

    /// Iterates over the remaining records.
    pub fn records(&mut self) -> impl Iterator<Item = io::Result<RecordBuf>> + '_ {
        std::iter::from_fn(move || {
            let mut record = RecordBuf::default();
            match self.read_record(&mut record) {
                Ok(0) => None,
                Ok(_) => Some(Ok(record)),
                Err(e) => Some(Err(e)),
            }
        })
    }
}

enum WriterInner {
    Sam(sam::io::Writer<Box<dyn Write>>),
    Bam(bam::io::Writer<bgzf::io::Writer<Box<dyn Write>>>),
}

/// Sequential writer of alignment records.
pub struct AlignmentWriter {
    inner: WriterInner,
    format: AlignmentFormat,
}

impl AlignmentWriter {
    /// Creates `path` (or standard output for `-`).
    ///
    /// `compression_level` only applies to BAM output.
    pub fn from_path<P: AsRef<Path>>(
        path: &P,
        hint: Option<AlignmentFormat>,
        compression_level: Option<u8>,
    ) -> Result<Self> {
        let stdout = is_stdio(path);
        let format = hint.or_else(|| AlignmentFormat::from_extension(path)).unwrap_or(if stdout {
            AlignmentFormat::Sam
        } else {
            AlignmentFormat::Bam
        });
        let raw: Box<dyn Write> = if stdout {
            Box::new(BufWriter::with_capacity(BUFSIZE, io::stdout()))
        } else {
            let file = File::create(path).with_context(|| {
                format!("Unable to create output file: {}", path.as_ref().to_string_lossy())
            })?;
            Box::new(BufWriter::with_capacity(BUFSIZE, file))
        };
        Self::from_writer(raw, format, compression_level)
    }

    pub fn from_writer(
        writer: Box<dyn Write>,
        format: AlignmentFormat,
        compression_level: Option<u8>,
    ) -> Result<Self> {
        let inner = match format {
            AlignmentFormat::Sam => WriterInner::Sam(sam::io::Writer::new(writer)),
            AlignmentFormat::Bam => {
                let mut builder = bgzf::io::writer::Builder::default();
                if let Some(level) = compression_level {
                    let level = bgzf::io::writer::CompressionLevel::new(level).with_context(
                        || format!("Invalid compression level: {}", level),
                    )?;
                    builder = builder.set_compression_level(level);
                }
                WriterInner::Bam(bam::io::Writer::from(builder.build_from_writer(writer)))
            }
        };
        Ok(Self { inner, format })
    }

    pub fn format(&self) -> AlignmentFormat {
        self.format
    }

    pub fn write_header(&mut self, header: &Header) -> io::Result<()> {
        match &mut self.inner {
            WriterInner::Sam(writer) => writer.write_header(header),
            WriterInner::Bam(writer) => writer.write_header(header),
        }
    }

    pub fn write_record(&mut self, header: &Header, record: &RecordBuf) -> io::Result<()> {
        match &mut self.inner {
            WriterInner::Sam(writer) => writer.write_alignment_record(header, record),
            WriterInner::Bam(writer) => writer.write_alignment_record(header, record),
        }
    }

    /// Flushes all output, terminating BAM output with the BGZF end-of-file block.
    pub fn finish(self) -> io::Result<()> {
        match self.inner {
            WriterInner::Sam(mut writer) => writer.get_mut().flush(),
            WriterInner::Bam(writer) => {
                let mut inner = writer.into_inner().finish()?;
                inner.flush()
            }
        }
    }
}
