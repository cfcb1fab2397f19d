use thiserror::Error;

/// Errors raised while encoding or loading a batch.
///
/// Database failures are passed through untouched so callers see the
/// driver's own message and SQLSTATE.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("batch is empty: at least one record is required to derive the column set")]
    EmptyBatch,
    #[error("records have no columns")]
    NoColumns,
    #[error("record {row} does not match the batch column set at column '{column}'")]
    ColumnMismatch { row: usize, column: String },
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl LoadError {
    pub fn column_mismatch(row: usize, column: impl Into<String>) -> Self {
        LoadError::ColumnMismatch {
            row,
            column: column.into(),
        }
    }

    /// The SQLSTATE code of an underlying database error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            LoadError::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().map(|code| code.into_owned())
            }
            _ => None,
        }
    }
}
