//! Per-table chunking: how many rows go into each batch, and slicing a row
//! stream into batches.

use super::value::{Batch, Row};

/// Tables at or above this many rows are read in chunks.
pub const LARGE_TABLE_ROWS: i64 = 1_000_000;

/// Rows per chunk for large tables when no chunk size is configured.
pub const DEFAULT_CHUNK_ROWS: usize = 1_000_000;

/// Chunk size decision for one table.
///
/// Decided fresh for every table; a size chosen for one table never leaks
/// into the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPlan {
    /// The whole table in one batch.
    Single,
    /// Batches of at most this many rows.
    Rows(usize),
}

impl ChunkPlan {
    /// Pick the chunking for a table.
    ///
    /// An explicit size always wins. Otherwise tables under
    /// [`LARGE_TABLE_ROWS`] are read whole and larger ones in
    /// [`DEFAULT_CHUNK_ROWS`] chunks.
    pub fn for_table(row_count: i64, explicit: Option<usize>) -> Self {
        match explicit {
            Some(size) => ChunkPlan::Rows(size.max(1)),
            None if row_count < LARGE_TABLE_ROWS => ChunkPlan::Single,
            None => ChunkPlan::Rows(DEFAULT_CHUNK_ROWS),
        }
    }

    /// Row limit per batch, `None` when unbounded.
    pub fn rows_per_batch(&self) -> Option<usize> {
        match self {
            ChunkPlan::Single => None,
            ChunkPlan::Rows(n) => Some(*n),
        }
    }
}

/// Slices an ordered row stream into numbered batches.
///
/// Rows come out in exactly the order they were pushed. If the stream is
/// empty, [`Chunker::finish`] still yields one empty batch at sequence 0 so
/// a replace-mode write empties the destination.
#[derive(Debug)]
pub struct Chunker {
    limit: Option<usize>,
    next_sequence: usize,
    rows: Vec<Row>,
}

impl Chunker {
    pub fn new(plan: ChunkPlan) -> Self {
        let rows = match plan.rows_per_batch() {
            Some(n) => Vec::with_capacity(n.min(10_000)),
            None => Vec::new(),
        };
        Self {
            limit: plan.rows_per_batch(),
            next_sequence: 0,
            rows,
        }
    }

    /// Add a row; returns a full batch once the chunk limit is reached.
    pub fn push(&mut self, row: Row) -> Option<Batch> {
        self.rows.push(row);
        match self.limit {
            Some(limit) if self.rows.len() >= limit => Some(self.take()),
            _ => None,
        }
    }

    /// Flush whatever is left.
    pub fn finish(mut self) -> Option<Batch> {
        if !self.rows.is_empty() || self.next_sequence == 0 {
            Some(self.take())
        } else {
            None
        }
    }

    fn take(&mut self) -> Batch {
        let rows = std::mem::take(&mut self.rows);
        let batch = Batch::new(self.next_sequence, rows);
        self.next_sequence += 1;
        batch
    }
}

/// Slice a complete row set into batches.
pub fn chunk_rows(rows: impl IntoIterator<Item = Row>, plan: ChunkPlan) -> Vec<Batch> {
    let mut chunker = Chunker::new(plan);
    let mut batches: Vec<Batch> = rows.into_iter().filter_map(|r| chunker.push(r)).collect();
    batches.extend(chunker.finish());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;

    fn rows(n: i32) -> Vec<Row> {
        (0..n).map(|i| vec![SqlValue::I32(i)]).collect()
    }

    fn flatten(batches: &[Batch]) -> Vec<Row> {
        batches.iter().flat_map(|b| b.rows.clone()).collect()
    }

    #[test]
    fn test_plan_for_table() {
        assert_eq!(ChunkPlan::for_table(10, None), ChunkPlan::Single);
        assert_eq!(ChunkPlan::for_table(999_999, None), ChunkPlan::Single);
        assert_eq!(
            ChunkPlan::for_table(1_000_000, None),
            ChunkPlan::Rows(DEFAULT_CHUNK_ROWS)
        );
        assert_eq!(ChunkPlan::for_table(10, Some(3)), ChunkPlan::Rows(3));
        assert_eq!(ChunkPlan::for_table(5_000_000, Some(50)), ChunkPlan::Rows(50));
    }

    #[test]
    fn test_reassembly_preserves_rows_and_order() {
        let n = 10;
        for k in [1usize, 5, 10, 11] {
            let batches = chunk_rows(rows(n), ChunkPlan::Rows(k));
            assert_eq!(flatten(&batches), rows(n), "chunk size {}", k);
            let sequences: Vec<usize> = batches.iter().map(|b| b.sequence_index).collect();
            let expected: Vec<usize> = (0..batches.len()).collect();
            assert_eq!(sequences, expected);
            assert!(batches.iter().all(|b| b.len() <= k));
        }
    }

    #[test]
    fn test_single_plan_yields_one_batch() {
        let batches = chunk_rows(rows(25), ChunkPlan::Single);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 25);
    }

    #[test]
    fn test_empty_stream_yields_one_empty_batch() {
        let batches = chunk_rows(Vec::new(), ChunkPlan::Rows(4));
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_empty());
        assert_eq!(batches[0].sequence_index, 0);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_empty_batch() {
        let batches = chunk_rows(rows(8), ChunkPlan::Rows(4));
        assert_eq!(batches.len(), 2);
    }
}
