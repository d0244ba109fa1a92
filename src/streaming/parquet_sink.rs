//! Columnar output for reconciled batches.
//!
//! Each batch becomes one Snappy-compressed parquet file at
//! `{root}/{bucket}/{base_key}-{batch_id}-result`, with every `.` in the
//! bucket and key replaced by `-`. Writes go through [`AtomicFileWriter`],
//! so re-running a batch replaces the file wholesale.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::info;

use crate::error::PipelineError;
use crate::reconcile::{CanonicalAddress, ReconciledRecord, ReconciledTable};
use crate::streaming::AtomicFileWriter;

/// Output column names, in file order.
pub const OUTPUT_COLUMNS: &[&str] = &[
    "i_input_msg_id",
    "i_batch_index",
    "i_input_id",
    "i_full_addr_txt",
    "o_street_address1",
    "o_street_address2",
    "o_city",
    "o_state",
    "o_full_postal_code",
    "o_country",
    "o_external_addr_id",
    "o_valid",
];

/// Destination for reconciled tables.
pub trait ResultSink {
    /// Persists one batch's table, replacing any earlier write for the same batch.
    fn write(&self, table: &ReconciledTable) -> Result<PathBuf, PipelineError>;
}

/// Writes parquet files under a local root laid out like the object store.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    root: PathBuf,
    bucket: String,
    base_key: String,
}

impl ParquetSink {
    pub fn new(root: impl AsRef<Path>, bucket: &str, base_key: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bucket: bucket.to_string(),
            base_key: base_key.to_string(),
        }
    }

    /// Output location for a batch.
    pub fn location_for(&self, batch_id: &str) -> PathBuf {
        let key = format!("{}-{}-result", self.base_key, batch_id).replace('.', "-");
        let mut path = self.root.join(self.bucket.replace('.', "-"));
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

impl ResultSink for ParquetSink {
    fn write(&self, table: &ReconciledTable) -> Result<PathBuf, PipelineError> {
        let location = self.location_for(&table.batch_id);
        let batch = to_record_batch(table)?;

        let mut file = AtomicFileWriter::new(&location)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer = ArrowWriter::try_new(file.writer_mut(), batch.schema(), Some(props))
            .map_err(|e| PipelineError::Sink(format!("Failed to start parquet writer: {}", e)))?;
        writer
            .write(&batch)
            .map_err(|e| PipelineError::Sink(format!("Failed to write parquet rows: {}", e)))?;
        writer
            .close()
            .map_err(|e| PipelineError::Sink(format!("Failed to finish parquet file: {}", e)))?;

        let path = file.finish()?;
        info!(
            batch_id = %table.batch_id,
            rows = table.len(),
            invalid = table.invalid_count,
            location = %path.display(),
            "[SINK] Wrote batch"
        );
        Ok(path)
    }
}

/// Arrow schema of the output files.
pub fn output_schema() -> SchemaRef {
    let text = |name: &str, nullable: bool| Field::new(name, DataType::Utf8, nullable);
    Arc::new(Schema::new(vec![
        text("i_input_msg_id", false),
        Field::new("i_batch_index", DataType::Int64, false),
        text("i_input_id", false),
        text("i_full_addr_txt", false),
        text("o_street_address1", true),
        text("o_street_address2", true),
        text("o_city", true),
        text("o_state", true),
        text("o_full_postal_code", true),
        text("o_country", true),
        text("o_external_addr_id", true),
        Field::new("o_valid", DataType::Int64, false),
    ]))
}

/// Converts a table into one Arrow record batch.
pub fn to_record_batch(table: &ReconciledTable) -> Result<RecordBatch, PipelineError> {
    let rows = &table.rows;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.input_msg_id.clone()).collect::<Vec<String>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| i64::from(r.batch_index)).collect::<Vec<i64>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.input_id.clone()).collect::<Vec<String>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.full_addr_txt.clone()).collect::<Vec<String>>(),
        )),
        output_column(rows, |o| o.street_address1.clone()),
        output_column(rows, |o| o.street_address2.clone()),
        output_column(rows, |o| o.city.clone()),
        output_column(rows, |o| o.state.clone()),
        output_column(rows, |o| o.full_postal_code.clone()),
        output_column(rows, |o| o.country.clone()),
        output_column(rows, |o| o.external_addr_id.clone()),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| i64::from(r.is_valid())).collect::<Vec<i64>>(),
        )),
    ];

    RecordBatch::try_new(output_schema(), columns)
        .map_err(|e| PipelineError::Sink(format!("Failed to build output table: {}", e)))
}

/// One `o_*` column; null for invalid rows.
fn output_column<F>(rows: &[ReconciledRecord], pick: F) -> ArrayRef
where
    F: Fn(&CanonicalAddress) -> Option<String>,
{
    Arc::new(StringArray::from(
        rows.iter()
            .map(|r| r.output.as_ref().and_then(&pick))
            .collect::<Vec<Option<String>>>(),
    ))
}
