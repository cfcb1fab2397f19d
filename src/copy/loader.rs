//! COPY-through-staging load with skip-on-conflict merge.

use crate::config::LoaderConfig;
use crate::copy::staging::{
    copy_in_sql, create_staging_sql, merge_sql, staging_table_name, TargetTable,
};
use crate::copy::stats::LoadStats;
use crate::encoder::RowEncoder;
use crate::error::LoadError;
use crate::models::Record;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Instant;

/// Statements for one load, built before any database work so that naming
/// and identifier errors surface without opening a transaction.
struct LoadPlan {
    staging: String,
    create_staging: String,
    copy_in: String,
    merge: String,
}

impl LoadPlan {
    fn new(
        encoder: &RowEncoder<'_>,
        target: &TargetTable,
        config: &LoaderConfig,
    ) -> Result<Self, LoadError> {
        let staging = staging_table_name(&config.staging_prefix, &target.table);
        Ok(Self {
            create_staging: create_staging_sql(&staging, target)?,
            copy_in: copy_in_sql(&staging, encoder.columns())?,
            merge: merge_sql(&staging, target, encoder.columns())?,
            staging,
        })
    }
}

/// Loads record batches into PostgreSQL, skipping rows whose key already exists.
pub struct CopyLoader {
    pool: PgPool,
    config: LoaderConfig,
}

impl CopyLoader {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, LoaderConfig::default())
    }

    pub fn with_config(pool: PgPool, config: LoaderConfig) -> Self {
        Self { pool, config }
    }

    /// Load one batch in its own transaction and commit it.
    ///
    /// Either every non-conflicting row lands or none do: on error the
    /// transaction is dropped uncommitted, which rolls it back and drops the
    /// staging table with it.
    pub async fn load(
        &self,
        records: &[Record],
        target: &TargetTable,
    ) -> Result<LoadStats, LoadError> {
        let encoder = RowEncoder::new(records)?;
        let plan = LoadPlan::new(&encoder, target, &self.config)?;

        let mut tx = self.pool.begin().await?;
        let stats = self.run(&mut tx, &encoder, &plan).await?;

        let commit_start = Instant::now();
        tx.commit().await?;
        log::debug!("committed load into {} in {:?}", target, commit_start.elapsed());

        log::info!(
            "loaded {} records into {}: {} inserted, {} skipped",
            stats.records,
            target,
            stats.inserted,
            stats.skipped
        );
        Ok(stats)
    }

    /// Run the staging load inside a caller-owned transaction.
    ///
    /// Nothing is committed here. The staging table lives until the caller
    /// commits or rolls back.
    pub async fn load_in_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        records: &[Record],
        target: &TargetTable,
    ) -> Result<LoadStats, LoadError> {
        let encoder = RowEncoder::new(records)?;
        let plan = LoadPlan::new(&encoder, target, &self.config)?;
        self.run(tx, &encoder, &plan).await
    }

    async fn run(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        encoder: &RowEncoder<'_>,
        plan: &LoadPlan,
    ) -> Result<LoadStats, LoadError> {
        let total_start = Instant::now();

        let create_start = Instant::now();
        sqlx::query(&plan.create_staging).execute(&mut **tx).await?;
        log::debug!(
            "created staging table {} in {:?}",
            plan.staging,
            create_start.elapsed()
        );

        let copy_start = Instant::now();
        let copied = self.stream_rows(tx, encoder, &plan.copy_in).await?;
        let copy_time = copy_start.elapsed();

        let merge_start = Instant::now();
        let result = sqlx::query(&plan.merge).execute(&mut **tx).await?;
        let merge_time = merge_start.elapsed();

        let inserted = result.rows_affected();
        let skipped = copied.saturating_sub(inserted);
        if skipped > 0 {
            log::debug!(
                "merge from {}: copied {} rows, inserted {} ({} skipped due to conflicts)",
                plan.staging,
                copied,
                inserted,
                skipped
            );
        }

        log::debug!(
            "[PERF] {}: copy={:?} ({:.0} rows/sec), merge={:?}, total={:?}",
            plan.staging,
            copy_time,
            copied as f64 / copy_time.as_secs_f64().max(f64::EPSILON),
            merge_time,
            total_start.elapsed()
        );

        Ok(LoadStats {
            records: encoder.len(),
            copied,
            inserted,
            skipped,
        })
    }

    /// Stream encoded rows into the staging table, one bounded chunk at a time.
    async fn stream_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        encoder: &RowEncoder<'_>,
        statement: &str,
    ) -> Result<u64, LoadError> {
        let chunk_bytes = self.config.copy_chunk_bytes;
        let mut copy = tx.copy_in_raw(statement).await?;
        let mut buffer = String::with_capacity(chunk_bytes);
        let mut chunks = 0usize;

        for row in encoder.rows() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    copy.abort(err.to_string()).await?;
                    return Err(err);
                }
            };

            buffer.push_str(&row);
            if buffer.len() >= chunk_bytes {
                copy.send(buffer.as_bytes()).await?;
                buffer.clear();
                chunks += 1;
            }
        }

        if !buffer.is_empty() {
            copy.send(buffer.as_bytes()).await?;
            chunks += 1;
        }

        let copied = copy.finish().await?;
        log::trace!("copied {} rows in {} chunks", copied, chunks);
        Ok(copied)
    }
}
