//! Size governor: keeps any single in-memory batch under a byte ceiling.

use std::mem::size_of;

use tracing::debug;

use crate::core::{Batch, Row};

/// Estimated in-memory size of a batch in bytes.
///
/// Counts each row's `Vec` header plus every value's enum slot and heap
/// payload, so narrow rows are not undercounted.
pub fn estimate_bytes(batch: &Batch) -> u64 {
    batch
        .rows
        .iter()
        .map(|row| {
            size_of::<Row>() as u64 + row.iter().map(|v| v.estimated_size()).sum::<u64>()
        })
        .sum()
}

/// Split a batch whose estimate exceeds `threshold` bytes.
///
/// The batch becomes `ceil(size / threshold)` sub-batches of near-equal row
/// counts (never more sub-batches than rows). Rows keep their order, the
/// parent `sequence_index` is kept and `sub_index` runs `0..n`. A batch under
/// the threshold comes back unchanged as the only element.
pub fn maybe_split(batch: Batch, threshold: u64) -> Vec<Batch> {
    let size = estimate_bytes(&batch);
    if threshold == 0 || size <= threshold || batch.len() <= 1 {
        return vec![batch];
    }

    let wanted = size.div_ceil(threshold) as usize;
    let parts = wanted.min(batch.len());

    debug!(
        "Splitting batch {} ({} rows, ~{} bytes) into {} parts",
        batch.sequence_index,
        batch.len(),
        size,
        parts
    );

    let sequence_index = batch.sequence_index;
    let total = batch.len();
    let base = total / parts;
    let extra = total % parts;

    let mut rows = batch.rows.into_iter();
    (0..parts)
        .map(|sub_index| {
            let take = base + usize::from(sub_index < extra);
            Batch {
                rows: rows.by_ref().take(take).collect(),
                sequence_index,
                sub_index,
            }
        })
        .collect()
}
