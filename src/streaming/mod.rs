//! Streaming stages of the pipeline.
//!
//! Record-aware chunked reading that keeps quoted delimiters and newlines
//! intact, batch sizing under a byte ceiling, dispatch under a per-call cap,
//! and atomic columnar output.

mod atomic_writer;
mod batch_sizer;
mod chunk_reader;
mod dispatcher;
mod parquet_sink;

pub use atomic_writer::{write_atomic, AtomicFileWriter};
pub use batch_sizer::{Batch, BatchSizer, FixedCountSizer, MaxSizeAccumulator, SizedBatches};
pub use chunk_reader::{Chunk, ChunkReader, TextEncoding};
pub use dispatcher::{partition, publish, resolve_cap, Dispatcher};
pub use parquet_sink::{output_schema, to_record_batch, ParquetSink, ResultSink, OUTPUT_COLUMNS};
