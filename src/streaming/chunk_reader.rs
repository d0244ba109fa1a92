//! Record-aware chunked reading of a delimited source.
//!
//! Uses the `csv` crate so embedded delimiters and newlines inside quoted
//! fields never split a record. Rows are decoded, typed, and grouped into
//! fixed-size chunks lazily; the source is read at most once per run.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder};
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::error::PipelineError;
use crate::record::Record;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ─────────────────────────────────────────────────────────────────────────────
// TextEncoding
// ─────────────────────────────────────────────────────────────────────────────

/// Supported source encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8, with or without a leading BOM.
    Utf8,
    /// ISO-8859-1; every byte maps to the code point of the same value.
    Latin1,
}

impl TextEncoding {
    /// Resolves an encoding label (case-insensitive, `_` and `-` interchangeable).
    pub fn from_label(label: &str) -> Result<Self, PipelineError> {
        let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" | "utf-8-sig" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Latin1),
            _ => Err(PipelineError::UnsupportedEncoding(label.to_string())),
        }
    }

    fn decode(self, bytes: &[u8], row: u64) -> Result<String, PipelineError> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| PipelineError::CsvInvalid(format!("row {} is not valid UTF-8", row))),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk
// ─────────────────────────────────────────────────────────────────────────────

/// One row-count-bounded slice of the source, in read order.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Zero-based position of this chunk in the run.
    pub index: usize,
    pub records: Vec<Record>,
}

impl Chunk {
    pub fn new(index: usize, records: Vec<Record>) -> Self {
        Self { index, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChunkReader
// ─────────────────────────────────────────────────────────────────────────────

/// Lazy iterator of fixed-size chunks over a delimited source.
///
/// Yields `Err` at most once; after an error the iterator is exhausted.
pub struct ChunkReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    encoding: TextEncoding,
    chunk_size: usize,
    limit_rows: u64,
    na_values: Vec<String>,
    id_field: String,
    seen_ids: HashSet<String>,
    rows_read: u64,
    next_index: usize,
    record_buf: ByteRecord,
    done: bool,
}

impl ChunkReader<BufReader<File>> {
    /// Opens a delimited file for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::SourceRead` if the file cannot be opened, and
    /// the errors of [`ChunkReader::from_reader`] for a bad header.
    pub fn open(path: &Path, config: &ReaderConfig) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| {
            PipelineError::SourceRead(format!("Failed to open {}: {}", path.display(), e))
        })?;

        info!(
            source = %path.display(),
            chunk_size = config.chunk_size,
            limit_rows = config.limit_rows,
            "[READER] Opening source"
        );

        Self::from_reader(BufReader::new(file), config)
    }
}

impl<R: Read> ChunkReader<R> {
    /// Wraps any byte source. Reads and validates the header row eagerly.
    ///
    /// # Errors
    ///
    /// - `PipelineError::CsvInvalid` - no header row, or no id column
    /// - `PipelineError::UnsupportedEncoding` - unknown encoding label
    /// - `PipelineError::Config` - invalid reader options
    pub fn from_reader(source: R, config: &ReaderConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let encoding = TextEncoding::from_label(&config.encoding)?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(config.delimiter_byte()?)
            .from_reader(source);

        let raw_headers = reader.byte_headers()?.clone();
        if raw_headers.is_empty() || (raw_headers.len() == 1 && raw_headers[0].is_empty()) {
            return Err(PipelineError::CsvInvalid("source has no header row".to_string()));
        }

        let mut headers = Vec::with_capacity(raw_headers.len());
        for (i, field) in raw_headers.iter().enumerate() {
            let field = if i == 0 {
                field.strip_prefix(UTF8_BOM).unwrap_or(field)
            } else {
                field
            };
            headers.push(encoding.decode(field, 0)?.trim().to_string());
        }

        if !headers.iter().any(|h| h == &config.id_field) {
            return Err(PipelineError::CsvInvalid(format!(
                "header has no '{}' column",
                config.id_field
            )));
        }

        Ok(Self {
            reader,
            headers,
            encoding,
            chunk_size: config.chunk_size,
            limit_rows: config.limit_rows,
            na_values: config.na_values.iter().map(|v| v.trim().to_string()).collect(),
            id_field: config.id_field.clone(),
            seen_ids: HashSet::new(),
            rows_read: 0,
            next_index: 0,
            record_buf: ByteRecord::new(),
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows consumed so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn read_chunk(&mut self) -> Result<Option<Chunk>, PipelineError> {
        let mut records = Vec::with_capacity(self.chunk_size);

        while records.len() < self.chunk_size && self.rows_read < self.limit_rows {
            if !self.reader.read_byte_record(&mut self.record_buf)? {
                break;
            }
            self.rows_read += 1;
            let record = self.build_record()?;
            records.push(record);
        }

        if records.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk::new(self.next_index, records);
        self.next_index += 1;

        debug!(
            chunk_index = chunk.index,
            rows = chunk.len(),
            "[READER] Read chunk"
        );

        Ok(Some(chunk))
    }

    fn build_record(&mut self) -> Result<Record, PipelineError> {
        let row = self.rows_read;

        if self.record_buf.len() > self.headers.len() {
            return Err(PipelineError::CsvInvalid(format!(
                "row {} has {} fields, header has {}",
                row,
                self.record_buf.len(),
                self.headers.len()
            )));
        }

        let mut record = Record::new();
        for (i, header) in self.headers.iter().enumerate() {
            let value = match self.record_buf.get(i) {
                Some(bytes) => {
                    let text = self.encoding.decode(bytes, row)?;
                    parse_value(&text, &self.na_values)
                }
                // Short rows are padded with nulls.
                None => Value::Null,
            };
            record.insert(header.clone(), value);
        }

        let id = record.source_id(&self.id_field).ok_or_else(|| PipelineError::MissingSourceId {
            row,
            field: self.id_field.clone(),
        })?;
        if !self.seen_ids.insert(id.clone()) {
            return Err(PipelineError::DuplicateSourceId { row, id });
        }

        Ok(record)
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Chunk, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                info!(rows = self.rows_read, chunks = self.next_index, "[READER] Source exhausted");
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value typing
// ─────────────────────────────────────────────────────────────────────────────

/// Types one raw field: null sentinel, number, or string.
fn parse_value(raw: &str, na_values: &[String]) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() || na_values.iter().any(|na| na.eq_ignore_ascii_case(trimmed)) {
        return Value::Null;
    }

    match parse_number(trimmed) {
        Some(n) => Value::Number(n),
        None => Value::String(raw.to_string()),
    }
}

/// Parses canonical integers and plain decimals. Anything that would not
/// round-trip (leading zeros, exponents, `+` signs) stays text, so values
/// like `02134` keep their zeros.
fn parse_number(text: &str) -> Option<Number> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if int_part.len() > 1 && int_part.starts_with('0') {
        return None;
    }

    match frac_part {
        None => text.parse::<i64>().ok().map(Number::from),
        Some(frac) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            text.parse::<f64>().ok().and_then(Number::from_f64)
        }
    }
}
