//! Read-then-assign `order_index` allocation.
//!
//! Not a sequence generator: two writers reading the same maximum get the same
//! indices. The store's unique constraint plus `max_order_retries` is the
//! stricter path (see `persistence.rs`).

use uuid::Uuid;

use crate::domain::{CandidateQuestion, NewQuestion};
use crate::error::StoreError;
use crate::store::ContentStore;

/// First index after `max`; an empty collection starts at 0.
pub fn next_index(max: Option<u32>) -> u32 {
  max.map_or(0, |m| m + 1)
}

/// Assign `max+1, max+2, ...` in input order.
pub fn assign(collection_id: Uuid, max: Option<u32>, batch: Vec<CandidateQuestion>) -> Vec<NewQuestion> {
  let start = next_index(max);
  batch
    .into_iter()
    .enumerate()
    .map(|(i, body)| NewQuestion { collection_id, order_index: start + i as u32, body })
    .collect()
}

/// Read the current maximum from the store, then assign.
pub async fn allocate(
  store: &dyn ContentStore,
  collection_id: Uuid,
  batch: Vec<CandidateQuestion>,
) -> Result<Vec<NewQuestion>, StoreError> {
  let max = store.max_order_index(collection_id).await?;
  Ok(assign(collection_id, max, batch))
}
