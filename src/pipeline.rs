//! Run orchestration: reader → sizer → dispatcher → adapter → reconciler → sink.
//!
//! Three entry points share the same per-batch step:
//!
//! - [`run_direct`] validates a source file end to end in one invocation.
//! - [`run_produce`] sizes a source file into queue messages.
//! - [`run_consume`] validates one poll of queued messages.
//!
//! Batches are processed strictly one after another. A batch whose lookup
//! fails with a batch-local error is logged and skipped; any other error
//! ends the run.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::reconcile::reconcile_batch;
use crate::record::Record;
use crate::streaming::{publish, BatchSizer, ChunkReader, Dispatcher, ResultSink};
use crate::transport::Transport;
use crate::validation::ValidationAdapter;

/// Outcome counters for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Non-empty batches (or messages) handled.
    pub batches: usize,
    /// Batches whose results reached the sink.
    pub batches_written: usize,
    /// Ids of batches skipped after a batch-local failure.
    pub skipped_batches: Vec<String>,
    /// Records in written batches, or published records in producer mode.
    pub records: usize,
    pub invalid_records: usize,
    pub messages_published: usize,
}

impl RunSummary {
    fn log(&self, mode: &str) {
        info!(
            mode,
            batches = self.batches,
            written = self.batches_written,
            skipped = self.skipped_batches.len(),
            records = self.records,
            invalid = self.invalid_records,
            published = self.messages_published,
            "[PIPELINE] Run complete"
        );
    }
}

/// Identifier used for a directly validated batch.
pub fn direct_batch_id(index: usize) -> String {
    format!("batch-{:05}", index)
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Validates a whole source file in one invocation.
///
/// # Errors
///
/// Any fatal error: bad configuration or batch mode, unreadable source,
/// sizing violations, or a sink failure.
pub async fn run_direct(
    config: &PipelineConfig,
    source: &Path,
    adapter: &dyn ValidationAdapter,
    sink: &dyn ResultSink,
) -> Result<RunSummary, PipelineError> {
    let sizer = BatchSizer::new(config.batch_mode()?, config.size_ceiling)
        .with_id_field(&config.reader.id_field);
    let dispatcher = Dispatcher::new(adapter, config.dispatch_cap)?;
    let reader = ChunkReader::open(source, &config.reader)?;

    let mut summary = RunSummary::default();
    for batch in sizer.batches(reader) {
        let batch = batch?;
        if batch.is_empty() {
            continue;
        }
        let batch_id = direct_batch_id(batch.index);
        process_batch(
            config,
            &dispatcher,
            sink,
            batch.index,
            &batch_id,
            &batch.records,
            &mut summary,
        )
        .await?;
    }

    summary.log("validate");
    Ok(summary)
}

/// Sizes a source file into messages on the transport.
///
/// Empty batches are not published.
pub fn run_produce(
    config: &PipelineConfig,
    source: &Path,
    transport: &dyn Transport,
) -> Result<RunSummary, PipelineError> {
    let sizer = BatchSizer::new(config.batch_mode()?, config.size_ceiling)
        .with_id_field(&config.reader.id_field);
    let reader = ChunkReader::open(source, &config.reader)?;

    let mut summary = RunSummary::default();
    for batch in sizer.batches(reader) {
        let batch = batch?;
        if batch.is_empty() {
            continue;
        }
        publish(&batch, transport, config.size_ceiling)?;
        summary.batches += 1;
        summary.records += batch.len();
        summary.messages_published += 1;
    }

    summary.log("produce");
    Ok(summary)
}

/// Validates up to `max_messages` pending messages.
///
/// A message is acknowledged only after its results are written. Messages
/// whose batch was skipped stay pending for a later invocation.
pub async fn run_consume(
    config: &PipelineConfig,
    transport: &dyn Transport,
    adapter: &dyn ValidationAdapter,
    sink: &dyn ResultSink,
    max_messages: usize,
) -> Result<RunSummary, PipelineError> {
    let dispatcher = Dispatcher::new(adapter, config.dispatch_cap)?;
    let messages = transport.receive(max_messages)?;

    let mut summary = RunSummary::default();
    for (index, message) in messages.into_iter().enumerate() {
        if message.records.is_empty() {
            transport.ack(&message.id)?;
            continue;
        }
        let written = process_batch(
            config,
            &dispatcher,
            sink,
            index,
            &message.id,
            &message.records,
            &mut summary,
        )
        .await?;
        if written {
            transport.ack(&message.id)?;
        }
    }

    summary.log("consume");
    Ok(summary)
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-batch step
// ─────────────────────────────────────────────────────────────────────────────

/// Validates, reconciles, and writes one batch. Returns `false` when the
/// batch was skipped after a batch-local failure.
async fn process_batch(
    config: &PipelineConfig,
    dispatcher: &Dispatcher<'_>,
    sink: &dyn ResultSink,
    batch_index: usize,
    batch_id: &str,
    records: &[Record],
    summary: &mut RunSummary,
) -> Result<bool, PipelineError> {
    summary.batches += 1;

    let results = match dispatcher
        .validate(batch_index, records, &config.schema_map)
        .await
    {
        Ok(results) => results,
        Err(e) if e.is_batch_local() => {
            warn!(
                batch_index,
                batch_id,
                error = %e.redacted_message(),
                "[PIPELINE] Skipping batch"
            );
            summary.skipped_batches.push(batch_id.to_string());
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let table = reconcile_batch(batch_id, &config.reader.id_field, records, &results)?;
    sink.write(&table)?;

    summary.batches_written += 1;
    summary.records += table.len();
    summary.invalid_records += table.invalid_count;
    Ok(true)
}
