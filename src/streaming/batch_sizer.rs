//! Turns the chunk stream into dispatchable batches under a byte ceiling.
//!
//! Two strategies share one interface: `FixedCountSizer` emits each chunk as
//! its own batch, `MaxSizeAccumulator` concatenates whole chunks until the
//! next one would reach the ceiling. Both keep their running state locally,
//! so independent runs never share counters.

use tracing::{debug, info};

use crate::config::BatchMode;
use crate::error::PipelineError;
use crate::record::{serialized_size, Record};
use crate::streaming::Chunk;

/// One dispatch-ready unit of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Zero-based position of this batch in the run.
    pub index: usize,
    pub records: Vec<Record>,
    /// Accounted size in bytes: the sum of the serialized sizes of the
    /// chunks it was built from. Never less than the encoded size of
    /// `records` as one array.
    pub serialized_size: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy A: fixed count
// ─────────────────────────────────────────────────────────────────────────────

/// Emits every chunk as exactly one batch.
#[derive(Debug)]
pub struct FixedCountSizer {
    ceiling: usize,
    next_index: usize,
}

impl FixedCountSizer {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            next_index: 0,
        }
    }

    /// # Errors
    ///
    /// - `PipelineError::EmptyChunk` - the chunk has no rows
    /// - `PipelineError::ChunkTooLarge` - the chunk alone exceeds the ceiling
    pub fn push(&mut self, chunk: Chunk) -> Result<Batch, PipelineError> {
        if chunk.is_empty() {
            return Err(PipelineError::EmptyChunk { index: chunk.index });
        }

        let size = serialized_size(&chunk.records)?;
        if size > self.ceiling {
            return Err(PipelineError::ChunkTooLarge {
                index: chunk.index,
                size,
                ceiling: self.ceiling,
            });
        }

        let batch = Batch {
            index: self.next_index,
            records: chunk.records,
            serialized_size: size,
        };
        self.next_index += 1;
        Ok(batch)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy B: max-size accumulation
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates whole chunks until adding the next one would reach the ceiling.
///
/// The flush check is `accumulated + chunk >= ceiling`, so a chunk that would
/// land exactly on the ceiling starts the next batch instead. Chunks are never
/// split, and every flushed batch stays strictly below the ceiling.
#[derive(Debug)]
pub struct MaxSizeAccumulator {
    ceiling: usize,
    id_field: String,
    accumulator: Vec<Record>,
    accumulated_size: usize,
    next_index: usize,
    finished: bool,
}

impl MaxSizeAccumulator {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            id_field: "source_id".to_string(),
            accumulator: Vec::new(),
            accumulated_size: 0,
            next_index: 0,
            finished: false,
        }
    }

    /// Sets the field reported in `RecordTooLarge` errors.
    pub fn with_id_field(mut self, id_field: &str) -> Self {
        self.id_field = id_field.to_string();
        self
    }

    /// Adds one chunk. Returns the flushed batch when the chunk triggered one.
    ///
    /// # Errors
    ///
    /// - `PipelineError::EmptyChunk` - the chunk has no rows
    /// - `PipelineError::RecordTooLarge` - one record alone exceeds the ceiling
    /// - `PipelineError::ChunkTooLarge` - the chunk alone reaches the ceiling,
    ///   so no batch could ever hold it
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Batch>, PipelineError> {
        if chunk.is_empty() {
            return Err(PipelineError::EmptyChunk { index: chunk.index });
        }

        let chunk_size = self.checked_chunk_size(&chunk)?;
        let candidate_size = self.accumulated_size + chunk_size;

        if candidate_size >= self.ceiling {
            let flushed = self.take_batch();
            debug!(
                chunk_index = chunk.index,
                candidate_size,
                ceiling = self.ceiling,
                "[SIZER] Ceiling reached, flushing before chunk"
            );
            self.accumulator = chunk.records;
            self.accumulated_size = chunk_size;
            Ok(Some(flushed))
        } else {
            self.accumulator.extend(chunk.records);
            self.accumulated_size = candidate_size;
            Ok(None)
        }
    }

    /// Flushes the remainder. Always yields one batch the first time it is
    /// called, empty if nothing is pending; `None` afterwards.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.take_batch())
    }

    fn checked_chunk_size(&self, chunk: &Chunk) -> Result<usize, PipelineError> {
        for record in &chunk.records {
            let size = serialized_size(std::slice::from_ref(record))?;
            if size > self.ceiling {
                return Err(PipelineError::RecordTooLarge {
                    source_id: record.source_id(&self.id_field).unwrap_or_default(),
                    size,
                    ceiling: self.ceiling,
                });
            }
        }

        let size = serialized_size(&chunk.records)?;
        if size >= self.ceiling {
            return Err(PipelineError::ChunkTooLarge {
                index: chunk.index,
                size,
                ceiling: self.ceiling,
            });
        }
        Ok(size)
    }

    fn take_batch(&mut self) -> Batch {
        let batch = Batch {
            index: self.next_index,
            records: std::mem::take(&mut self.accumulator),
            serialized_size: self.accumulated_size,
        };
        self.accumulated_size = 0;
        self.next_index += 1;
        batch
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchSizer
// ─────────────────────────────────────────────────────────────────────────────

/// Either batching strategy, selected by `batch_mode`.
#[derive(Debug)]
pub enum BatchSizer {
    FixedCount(FixedCountSizer),
    MaxSize(MaxSizeAccumulator),
}

impl BatchSizer {
    pub fn new(mode: BatchMode, ceiling: usize) -> Self {
        match mode {
            BatchMode::ChunkSize => BatchSizer::FixedCount(FixedCountSizer::new(ceiling)),
            BatchMode::MaxSize => BatchSizer::MaxSize(MaxSizeAccumulator::new(ceiling)),
        }
    }

    /// Sets the id field used when reporting oversized records.
    pub fn with_id_field(self, id_field: &str) -> Self {
        match self {
            BatchSizer::MaxSize(sizer) => BatchSizer::MaxSize(sizer.with_id_field(id_field)),
            other => other,
        }
    }

    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Batch>, PipelineError> {
        match self {
            BatchSizer::FixedCount(sizer) => sizer.push(chunk).map(Some),
            BatchSizer::MaxSize(sizer) => sizer.push(chunk),
        }
    }

    pub fn finish(&mut self) -> Option<Batch> {
        match self {
            BatchSizer::FixedCount(_) => None,
            BatchSizer::MaxSize(sizer) => sizer.finish(),
        }
    }

    /// Drives the sizer over a chunk stream.
    pub fn batches<I>(self, chunks: I) -> SizedBatches<I>
    where
        I: Iterator<Item = Result<Chunk, PipelineError>>,
    {
        SizedBatches {
            sizer: self,
            chunks,
            done: false,
        }
    }
}

/// Iterator of batches over a fallible chunk stream.
///
/// The first error ends the stream: nothing pending in the accumulator is
/// flushed after a failure.
pub struct SizedBatches<I> {
    sizer: BatchSizer,
    chunks: I,
    done: bool,
}

impl<I> Iterator for SizedBatches<I>
where
    I: Iterator<Item = Result<Chunk, PipelineError>>,
{
    type Item = Result<Batch, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.chunks.next() {
                Some(Ok(chunk)) => match self.sizer.push(chunk) {
                    Ok(Some(batch)) => {
                        info!(
                            batch_index = batch.index,
                            records = batch.len(),
                            bytes = batch.serialized_size,
                            "[SIZER] Batch ready"
                        );
                        return Some(Ok(batch));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return self.sizer.finish().map(|batch| {
                        info!(
                            batch_index = batch.index,
                            records = batch.len(),
                            bytes = batch.serialized_size,
                            "[SIZER] Final flush"
                        );
                        Ok(batch)
                    });
                }
            }
        }
        None
    }
}
