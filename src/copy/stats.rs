//! Load statistics.
//!
//! Counts rows at each stage of one staging-table load.

use serde::Serialize;

/// Statistics for a single load operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Records submitted by the caller
    pub records: usize,
    /// Rows accepted by COPY into the staging table
    pub copied: u64,
    /// Rows that landed in the target table
    pub inserted: u64,
    /// Rows discarded by the conflict clause
    pub skipped: u64,
}

impl LoadStats {
    /// Merge another LoadStats into this one by summing all counts.
    ///
    /// Used to combine statistics from several batches.
    pub fn merge(&mut self, other: LoadStats) {
        self.records += other.records;
        self.copied += other.copied;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}
