//! Staging relation naming and the SQL issued by the loader.
//!
//! Every identifier is double-quoted, so table and column names reach
//! PostgreSQL verbatim (no case folding, no injection through names).

use crate::encoder::{Columns, NULL_SENTINEL};
use crate::error::LoadError;
use uuid::Uuid;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_identifier(name: &str) -> Result<String, LoadError> {
    if name.is_empty() || name.contains('\0') {
        return Err(LoadError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Comma-separated, quoted column list for COPY and INSERT.
pub fn column_list(columns: &Columns) -> Result<String, LoadError> {
    let quoted = columns
        .iter()
        .map(quote_identifier)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(", "))
}

/// Target relation, optionally schema qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    pub table: String,
    pub schema: Option<String>,
}

impl TargetTable {
    pub fn new(table: impl Into<String>, schema: Option<&str>) -> Self {
        Self {
            table: table.into(),
            schema: schema.map(str::to_string),
        }
    }

    /// `"schema"."table"` when a schema was supplied, `"table"` otherwise.
    pub fn qualified(&self) -> Result<String, LoadError> {
        let table = quote_identifier(&self.table)?;
        match &self.schema {
            Some(schema) => Ok(format!("{}.{}", quote_identifier(schema)?, table)),
            None => Ok(table),
        }
    }
}

impl std::fmt::Display for TargetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// Derive a staging table name unique to this invocation.
///
/// Format: `{prefix}{table}_{token}` where the token is a random UUID in simple
/// form. The table part is shortened so the token always survives
/// PostgreSQL's identifier length limit.
pub fn staging_table_name(prefix: &str, table: &str) -> String {
    staging_table_name_with_token(prefix, table, Uuid::new_v4())
}

fn staging_table_name_with_token(prefix: &str, table: &str, token: Uuid) -> String {
    let token = token.simple().to_string();
    let budget = MAX_IDENTIFIER_BYTES.saturating_sub(prefix.len() + 1 + token.len());

    let mut cut = table.len().min(budget);
    while !table.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut name = format!("{}{}_{}", prefix, &table[..cut], token);
    // Oversized prefixes still end with the token
    if name.len() > MAX_IDENTIFIER_BYTES {
        name = format!("staging_{}", token);
    }
    name
}

/// Empty, session-scoped clone of the target, dropped when the transaction ends.
pub fn create_staging_sql(staging: &str, target: &TargetTable) -> Result<String, LoadError> {
    Ok(format!(
        "CREATE TEMP TABLE {} ON COMMIT DROP AS SELECT * FROM {} WITH NO DATA",
        quote_identifier(staging)?,
        target.qualified()?
    ))
}

pub fn copy_in_sql(staging: &str, columns: &Columns) -> Result<String, LoadError> {
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, NULL '{}')",
        quote_identifier(staging)?,
        column_list(columns)?,
        NULL_SENTINEL
    ))
}

/// Set-based merge that skips rows violating any unique constraint on the target.
pub fn merge_sql(staging: &str, target: &TargetTable, columns: &Columns) -> Result<String, LoadError> {
    let columns = column_list(columns)?;
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT DO NOTHING",
        target.qualified()?,
        columns,
        columns,
        quote_identifier(staging)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::RowEncoder;
    use crate::models::Record;

    fn example_columns() -> Columns {
        let batch = vec![Record::new().with("id", 1).with("description", "a")];
        RowEncoder::new(&batch).unwrap().columns().clone()
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("example_table").unwrap(), "\"example_table\"");
        assert_eq!(quote_identifier("Mixed Case").unwrap(), "\"Mixed Case\"");
        assert_eq!(quote_identifier("a\"b").unwrap(), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_identifier_rejects_empty_and_nul() {
        assert!(matches!(quote_identifier(""), Err(LoadError::InvalidIdentifier(_))));
        assert!(matches!(quote_identifier("a\0b"), Err(LoadError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_target_qualified() {
        let plain = TargetTable::new("example_table", None);
        assert_eq!(plain.qualified().unwrap(), "\"example_table\"");
        assert_eq!(plain.to_string(), "example_table");

        let schema = TargetTable::new("example_table", Some("analytics"));
        assert_eq!(schema.qualified().unwrap(), "\"analytics\".\"example_table\"");
        assert_eq!(schema.to_string(), "analytics.example_table");
    }

    #[test]
    fn test_staging_name_contains_table_and_token() {
        let token = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();
        let name = staging_table_name_with_token("staging_", "example_table", token);
        assert_eq!(name, "staging_example_table_0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_staging_names_differ_per_invocation() {
        let a = staging_table_name("staging_", "example_table");
        let b = staging_table_name("staging_", "example_table");
        assert_ne!(a, b);
        assert!(a.starts_with("staging_example_table_"));
    }

    #[test]
    fn test_staging_name_fits_identifier_limit() {
        let token = Uuid::new_v4();
        let long_table = "t".repeat(200);
        let name = staging_table_name_with_token("staging_", &long_table, token);

        assert!(name.len() <= MAX_IDENTIFIER_BYTES);
        assert!(name.ends_with(&token.simple().to_string()));
    }

    #[test]
    fn test_staging_name_truncates_on_char_boundary() {
        let token = Uuid::new_v4();
        let table = "é".repeat(40);
        let name = staging_table_name_with_token("staging_", &table, token);

        assert!(name.len() <= MAX_IDENTIFIER_BYTES);
        assert!(name.ends_with(&token.simple().to_string()));
    }

    #[test]
    fn test_statements() {
        let columns = example_columns();
        let target = TargetTable::new("example_table", Some("public"));
        let staging = "staging_example_table_x";

        assert_eq!(
            create_staging_sql(staging, &target).unwrap(),
            "CREATE TEMP TABLE \"staging_example_table_x\" ON COMMIT DROP AS SELECT * FROM \"public\".\"example_table\" WITH NO DATA"
        );
        assert_eq!(
            copy_in_sql(staging, &columns).unwrap(),
            "COPY \"staging_example_table_x\" (\"id\", \"description\") FROM STDIN WITH (FORMAT csv, NULL '\\N')"
        );
        assert_eq!(
            merge_sql(staging, &target, &columns).unwrap(),
            "INSERT INTO \"public\".\"example_table\" (\"id\", \"description\") SELECT \"id\", \"description\" FROM \"staging_example_table_x\" ON CONFLICT DO NOTHING"
        );
    }
}
