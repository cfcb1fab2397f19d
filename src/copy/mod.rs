//! Deduplicating bulk load through a temporary staging table.
//!
//! COPY aborts the whole statement on the first duplicate key, so rows are
//! never copied straight into the target:
//!
//! 1. **Staging** (`staging`) - `CREATE TEMP TABLE ... ON COMMIT DROP` clone of the target
//! 2. **Transfer** (`loader`) - stream encoded CSV rows with `COPY ... FROM STDIN`
//! 3. **Merge** (`loader`) - `INSERT ... SELECT ... ON CONFLICT DO NOTHING` into the target
//! 4. **Statistics** (`stats`) - rows copied, inserted and skipped
//!
//! All three statements share one transaction. Committing applies the merge
//! and drops the staging table; any error rolls both back.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use copy_loader::{insert_with_copy, Record};
//!
//! let records: Vec<Record> = (0..100_000)
//!     .map(|i| {
//!         Record::new()
//!             .with("id", i)
//!             .with("description", format!("record description {i}"))
//!     })
//!     .collect();
//!
//! insert_with_copy(&pool, &records, "example_table", None).await?;
//! ```

pub mod loader;
pub mod staging;
pub mod stats;

pub use loader::CopyLoader;
pub use staging::TargetTable;
pub use stats::LoadStats;

use crate::error::LoadError;
use crate::models::Record;
use sqlx::PgPool;

/// Insert `records` into `target_table`, silently skipping rows whose
/// primary or unique key already exists.
///
/// All records must share the same column names; the first record decides
/// the column order. The load is atomic for the whole batch.
pub async fn insert_with_copy(
    pool: &PgPool,
    records: &[Record],
    target_table: &str,
    target_schema: Option<&str>,
) -> Result<(), LoadError> {
    let target = TargetTable::new(target_table, target_schema);
    CopyLoader::new(pool.clone()).load(records, &target).await?;
    Ok(())
}
