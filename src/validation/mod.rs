//! Address validation services.
//!
//! Each service implements [`ValidationAdapter`]. Results come back as
//! [`LookupResult`] variants tagged by service, so the reconciler maps each
//! candidate shape explicitly instead of probing for fields.

pub mod address;
pub mod http;
pub mod location;
pub mod smarty;

use std::future::Future;
use std::pin::Pin;

use crate::config::ValidatorConfig;
use crate::error::PipelineError;
use crate::record::{Record, SchemaMap};

pub use address::address_text;
pub use location::{LocationAdapter, Place, PlaceResult};
pub use smarty::{SmartyAdapter, StreetCandidate, StreetComponents};

/// Minimum place-index relevance counted as a match.
pub const RELEVANCE_THRESHOLD: f64 = 1.0;

/// Outcome of one record's lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    /// Street API: ranked candidates, best first. Empty means no match.
    Street {
        address_text: String,
        candidates: Vec<StreetCandidate>,
    },
    /// Place index: at most one result with its relevance score.
    Place {
        address_text: String,
        result: Option<PlaceResult>,
    },
}

impl LookupResult {
    /// The free-text address that was submitted.
    pub fn address_text(&self) -> &str {
        match self {
            LookupResult::Street { address_text, .. } | LookupResult::Place { address_text, .. } => {
                address_text
            }
        }
    }

    /// Zero candidates, or a place result below the relevance threshold, is invalid.
    pub fn is_valid(&self) -> bool {
        match self {
            LookupResult::Street { candidates, .. } => !candidates.is_empty(),
            LookupResult::Place { result, .. } => result
                .as_ref()
                .is_some_and(|r| r.relevance >= RELEVANCE_THRESHOLD),
        }
    }
}

/// A service that can look up addresses.
///
/// `lookup` returns exactly one result per input record, in input order.
pub trait ValidationAdapter: Send + Sync {
    /// Short tag used in logs.
    fn name(&self) -> &'static str;

    /// Hard cap on records per `lookup` call.
    fn max_batch_size(&self) -> usize;

    fn lookup<'a>(
        &'a self,
        records: &'a [Record],
        schema_map: &'a SchemaMap,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupResult>, PipelineError>> + Send + 'a>>;
}

/// Builds the adapter named by the configuration.
///
/// # Errors
///
/// Returns `PipelineError::Config` for a bad URL or missing credentials.
pub fn build_adapter(
    config: &ValidatorConfig,
    id_field: &str,
) -> Result<Box<dyn ValidationAdapter>, PipelineError> {
    match config {
        ValidatorConfig::Smarty(smarty) => Ok(Box::new(SmartyAdapter::new(smarty, id_field)?)),
        ValidatorConfig::Location(location) => Ok(Box::new(LocationAdapter::new(location)?)),
    }
}
