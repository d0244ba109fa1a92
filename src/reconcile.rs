//! Merges input records with lookup results into the canonical output rows.
//!
//! Both services' candidate shapes are mapped here, and only here, onto one
//! [`CanonicalAddress`]. Rows are appended to a per-batch table that also
//! counts invalid addresses.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::record::Record;
use crate::validation::{LookupResult, PlaceResult, StreetCandidate};

/// Country written for street API matches, which are US-only.
const STREET_API_COUNTRY: &str = "USA";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized output address, identical for every service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalAddress {
    pub street_address1: Option<String>,
    pub street_address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub full_postal_code: Option<String>,
    pub country: Option<String>,
    pub external_addr_id: Option<String>,
}

/// One output row. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledRecord {
    /// Identifier of the batch (message id or generated batch id).
    pub input_msg_id: String,
    /// Position of the record within its batch.
    pub batch_index: u32,
    pub input_id: String,
    pub full_addr_txt: String,
    /// Present only for valid records.
    pub output: Option<CanonicalAddress>,
}

impl ReconciledRecord {
    pub fn is_valid(&self) -> bool {
        self.output.is_some()
    }
}

/// All rows of one batch, ready for the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledTable {
    pub batch_id: String,
    pub rows: Vec<ReconciledRecord>,
    pub invalid_count: usize,
}

impl ReconciledTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciler
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the table for one batch.
#[derive(Debug)]
pub struct Reconciler {
    id_field: String,
    table: ReconciledTable,
}

impl Reconciler {
    pub fn new(batch_id: &str, id_field: &str) -> Self {
        Self {
            id_field: id_field.to_string(),
            table: ReconciledTable {
                batch_id: batch_id.to_string(),
                ..ReconciledTable::default()
            },
        }
    }

    /// Appends the row for one `(record, result)` pair.
    pub fn push(&mut self, record: &Record, result: &LookupResult) -> &ReconciledRecord {
        let batch_index = self.table.rows.len() as u32;
        let input_id = record.source_id(&self.id_field).unwrap_or_default();

        let output = canonical_address(result);
        if output.is_none() {
            warn!(
                batch_id = %self.table.batch_id,
                batch_index,
                input_id = %input_id,
                "[RECONCILE] Address is invalid"
            );
            self.table.invalid_count += 1;
        }

        self.table.rows.push(ReconciledRecord {
            input_msg_id: self.table.batch_id.clone(),
            batch_index,
            input_id,
            full_addr_txt: result.address_text().to_string(),
            output,
        });
        &self.table.rows[self.table.rows.len() - 1]
    }

    pub fn invalid_count(&self) -> usize {
        self.table.invalid_count
    }

    pub fn finish(self) -> ReconciledTable {
        info!(
            batch_id = %self.table.batch_id,
            total = self.table.len(),
            invalid = self.table.invalid_count,
            "[RECONCILE] Total/Invalid addresses in this batch: {}/{}",
            self.table.len(),
            self.table.invalid_count
        );
        self.table
    }
}

/// Reconciles a whole batch in one call.
///
/// # Errors
///
/// Returns `PipelineError::Internal` if the adapter returned a different
/// number of results than records it was given.
pub fn reconcile_batch(
    batch_id: &str,
    id_field: &str,
    records: &[Record],
    results: &[LookupResult],
) -> Result<ReconciledTable, PipelineError> {
    if records.len() != results.len() {
        return Err(PipelineError::Internal(format!(
            "batch {} has {} records but {} lookup results",
            batch_id,
            records.len(),
            results.len()
        )));
    }

    let mut reconciler = Reconciler::new(batch_id, id_field);
    for (record, result) in records.iter().zip(results) {
        reconciler.push(record, result);
    }
    Ok(reconciler.finish())
}

// ─────────────────────────────────────────────────────────────────────────────
// Candidate mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical address for a valid result, `None` for an invalid one.
pub fn canonical_address(result: &LookupResult) -> Option<CanonicalAddress> {
    if !result.is_valid() {
        return None;
    }
    match result {
        LookupResult::Street { candidates, .. } => candidates.first().map(map_street_candidate),
        LookupResult::Place { result, .. } => result.as_ref().map(map_place_result),
    }
}

pub fn map_street_candidate(candidate: &StreetCandidate) -> CanonicalAddress {
    let c = &candidate.components;
    CanonicalAddress {
        street_address1: join_present(&[&c.primary_number, &c.street_name, &c.street_suffix]),
        street_address2: join_present(&[
            &c.secondary_number,
            &c.secondary_designator,
            &c.extra_secondary_designator,
            &c.extra_secondary_number,
        ]),
        city: non_blank(&c.city_name),
        state: non_blank(&c.state_abbreviation),
        full_postal_code: join_present(&[&c.zipcode, &c.plus4_code]),
        country: Some(STREET_API_COUNTRY.to_string()),
        external_addr_id: non_blank(&candidate.delivery_point_barcode),
    }
}

pub fn map_place_result(result: &PlaceResult) -> CanonicalAddress {
    let p = &result.place;
    CanonicalAddress {
        street_address1: join_present(&[&p.address_number, &p.street]),
        street_address2: join_present(&[&p.unit_type, &p.unit_number]),
        city: non_blank(&p.municipality),
        state: non_blank(&p.region),
        full_postal_code: non_blank(&p.postal_code),
        country: non_blank(&p.country),
        external_addr_id: non_blank(&result.place_id),
    }
}

fn non_blank(part: &Option<String>) -> Option<String> {
    part.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Joins the present parts with single spaces; `None` when every part is absent.
fn join_present(parts: &[&Option<String>]) -> Option<String> {
    let present: Vec<String> = parts.iter().filter_map(|p| non_blank(p)).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.join(" "))
    }
}
