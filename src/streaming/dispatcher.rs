//! Hands batches to their consumer under a per-call record cap.
//!
//! A batch is cut into consecutive sub-batches of at most `cap` records; all
//! but the last are exactly `cap` long. Sub-batches go to the validation
//! adapter in order. Batches bound for the queue are published whole, as one
//! JSON message under the byte ceiling.

use tracing::{debug, info};

use crate::config::DEFAULT_DISPATCH_CAP;
use crate::error::PipelineError;
use crate::record::{Record, SchemaMap};
use crate::streaming::Batch;
use crate::transport::Transport;
use crate::validation::{LookupResult, ValidationAdapter};

/// Splits `records` into consecutive slices of at most `cap` records.
///
/// # Errors
///
/// Returns `PipelineError::Config` when `cap` is zero.
pub fn partition(records: &[Record], cap: usize) -> Result<Vec<&[Record]>, PipelineError> {
    if cap == 0 {
        return Err(PipelineError::Config("dispatch cap must be greater than 0".into()));
    }
    Ok(records.chunks(cap).collect())
}

/// The configured cap, or the adapter's limit clamped to the default.
pub fn resolve_cap(configured: Option<usize>, adapter_max: usize) -> usize {
    configured.unwrap_or_else(|| adapter_max.min(DEFAULT_DISPATCH_CAP))
}

/// Sends batches to a validation adapter.
pub struct Dispatcher<'a> {
    adapter: &'a dyn ValidationAdapter,
    cap: usize,
}

impl<'a> Dispatcher<'a> {
    /// # Errors
    ///
    /// - `PipelineError::Config` - a configured cap of zero
    /// - `PipelineError::SubBatchOverCap` - a configured cap above what the
    ///   adapter accepts
    pub fn new(
        adapter: &'a dyn ValidationAdapter,
        configured_cap: Option<usize>,
    ) -> Result<Self, PipelineError> {
        let cap = resolve_cap(configured_cap, adapter.max_batch_size());
        if cap == 0 {
            return Err(PipelineError::Config("dispatch cap must be greater than 0".into()));
        }
        if cap > adapter.max_batch_size() {
            return Err(PipelineError::SubBatchOverCap {
                len: cap,
                cap: adapter.max_batch_size(),
            });
        }
        Ok(Self { adapter, cap })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Looks up every record of a batch, one sub-batch at a time.
    ///
    /// Returns one result per record, in record order. The first adapter
    /// failure ends the batch; nothing from earlier sub-batches is kept.
    pub async fn validate(
        &self,
        batch_index: usize,
        records: &[Record],
        schema_map: &SchemaMap,
    ) -> Result<Vec<LookupResult>, PipelineError> {
        let sub_batches = partition(records, self.cap)?;
        info!(
            batch_index,
            records = records.len(),
            sub_batches = sub_batches.len(),
            adapter = self.adapter.name(),
            "[DISPATCH] Validating batch"
        );

        let mut results = Vec::with_capacity(records.len());
        for (sub_index, sub_batch) in sub_batches.into_iter().enumerate() {
            if sub_batch.len() > self.adapter.max_batch_size() {
                return Err(PipelineError::SubBatchOverCap {
                    len: sub_batch.len(),
                    cap: self.adapter.max_batch_size(),
                });
            }

            debug!(batch_index, sub_index, records = sub_batch.len(), "[DISPATCH] Sub-batch");
            let sub_results = self.adapter.lookup(sub_batch, schema_map).await?;
            if sub_results.len() != sub_batch.len() {
                return Err(PipelineError::Internal(format!(
                    "{} returned {} results for {} records",
                    self.adapter.name(),
                    sub_results.len(),
                    sub_batch.len()
                )));
            }
            results.extend(sub_results);
        }
        Ok(results)
    }
}

/// Publishes one batch as a single JSON message.
///
/// # Errors
///
/// Returns `PipelineError::MessageTooLarge` if the encoded body exceeds the
/// ceiling, or the transport's own error.
pub fn publish(
    batch: &Batch,
    transport: &dyn Transport,
    ceiling: usize,
) -> Result<String, PipelineError> {
    let body = serde_json::to_vec(&batch.records)
        .map_err(|e| PipelineError::Internal(format!("Failed to encode batch: {}", e)))?;
    if body.len() > ceiling {
        return Err(PipelineError::MessageTooLarge {
            size: body.len(),
            ceiling,
        });
    }

    let message_id = transport.send(&body)?;
    info!(
        batch_index = batch.index,
        records = batch.len(),
        bytes = body.len(),
        message_id = %message_id,
        "[DISPATCH] Published batch"
    );
    Ok(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| [("source_id", json!(format!("id-{}", i)))].into_iter().collect())
            .collect()
    }

    /// Adapter that records call sizes and answers every lookup as unmatched.
    struct FakeAdapter {
        max: usize,
        calls: Mutex<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    impl FakeAdapter {
        fn new(max: usize) -> Self {
            Self {
                max,
                calls: Mutex::new(Vec::new()),
                fail_on_call: None,
            }
        }
    }

    impl ValidationAdapter for FakeAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn max_batch_size(&self) -> usize {
            self.max
        }

        fn lookup<'a>(
            &'a self,
            records: &'a [Record],
            _schema_map: &'a SchemaMap,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupResult>, PipelineError>> + Send + 'a>>
        {
            Box::pin(async move {
                let call = {
                    let mut calls = self.calls.lock().unwrap();
                    calls.push(records.len());
                    calls.len() - 1
                };
                if self.fail_on_call == Some(call) {
                    return Err(PipelineError::ConnectionFailed("boom".into()));
                }
                Ok(records
                    .iter()
                    .map(|r| LookupResult::Street {
                        address_text: r.source_id("source_id").unwrap_or_default(),
                        candidates: Vec::new(),
                    })
                    .collect())
            })
        }
    }

    #[test]
    fn partition_counts_follow_ceiling_division() {
        for (len, cap) in [(0, 3), (1, 3), (3, 3), (7, 3), (250, 100), (100, 100)] {
            let recs = records(len);
            let parts = partition(&recs, cap).unwrap();

            assert_eq!(parts.len(), len.div_ceil(cap), "len={} cap={}", len, cap);
            if let Some((last, full)) = parts.split_last() {
                assert!(full.iter().all(|p| p.len() == cap));
                assert!(!last.is_empty() && last.len() <= cap);
            }
            assert_eq!(parts.iter().map(|p| p.len()).sum::<usize>(), len);
        }
    }

    #[test]
    fn zero_cap_is_rejected() {
        assert!(matches!(partition(&records(3), 0), Err(PipelineError::Config(_))));
    }

    #[test]
    fn cap_defaults_to_adapter_limit_clamped() {
        assert_eq!(resolve_cap(None, 100), 100);
        assert_eq!(resolve_cap(None, 500), 100);
        assert_eq!(resolve_cap(None, 10), 10);
        assert_eq!(resolve_cap(Some(25), 100), 25);
    }

    #[test]
    fn cap_above_adapter_limit_is_fatal() {
        let adapter = FakeAdapter::new(100);
        let result = Dispatcher::new(&adapter, Some(101));
        assert!(matches!(
            result,
            Err(PipelineError::SubBatchOverCap { len: 101, cap: 100 })
        ));
    }

    #[tokio::test]
    async fn validate_sends_sub_batches_in_order() {
        let adapter = FakeAdapter::new(100);
        let dispatcher = Dispatcher::new(&adapter, None).unwrap();
        let recs = records(250);

        let results = dispatcher
            .validate(0, &recs, &SchemaMap::new([("a", "b")]))
            .await
            .unwrap();

        assert_eq!(*adapter.calls.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(results.len(), 250);
        assert_eq!(results[0].address_text(), "id-0");
        assert_eq!(results[249].address_text(), "id-249");
    }

    #[tokio::test]
    async fn adapter_failure_ends_the_batch() {
        let mut adapter = FakeAdapter::new(10);
        adapter.fail_on_call = Some(1);
        let dispatcher = Dispatcher::new(&adapter, None).unwrap();

        let err = dispatcher
            .validate(3, &records(30), &SchemaMap::new([("a", "b")]))
            .await
            .unwrap_err();

        assert!(err.is_batch_local());
        assert_eq!(adapter.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn publish_rejects_oversized_message() {
        use crate::transport::SpoolTransport;
        let dir = tempfile::TempDir::new().unwrap();
        let spool = SpoolTransport::open(dir.path(), 1_000).unwrap();
        let batch = Batch {
            index: 0,
            records: records(100),
            serialized_size: 0,
        };

        let result = publish(&batch, &spool, 64);

        assert!(matches!(result, Err(PipelineError::MessageTooLarge { ceiling: 64, .. })));
        assert!(spool.receive(10).unwrap().is_empty());
    }
}
