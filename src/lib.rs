//! Batch address validation.
//!
//! Reads a delimited address file in chunks, sizes the chunks into batches
//! under a transport byte ceiling, validates each batch against an address
//! service, and writes one reconciled parquet file per batch.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod streaming;
pub mod transport;
pub mod validation;

pub use config::{BatchMode, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::{run_consume, run_direct, run_produce, RunSummary};
pub use record::{Record, SchemaMap};
