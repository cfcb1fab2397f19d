//! Row encoder for PostgreSQL `COPY ... WITH (FORMAT csv, NULL '\N')`.
//!
//! Turns a batch of [`Record`]s into one CSV record per input. The column
//! order is taken from the first record and shared with the loader through
//! [`Columns`], so the COPY column list and the field order always agree.

use crate::error::LoadError;
use crate::models::{Record, Value};
use chrono::SecondsFormat;

/// Marker COPY is told to read as SQL NULL. Strings are always quoted, so an
/// unquoted `\N` can never be produced by string content.
pub const NULL_SENTINEL: &str = "\\N";

const FIELD_DELIMITER: char = ',';

/// Ordered column names shared by every record in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns(Vec<String>);

impl Columns {
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Validated view over a batch, ready to be streamed row by row.
pub struct RowEncoder<'a> {
    records: &'a [Record],
    columns: Columns,
}

impl<'a> RowEncoder<'a> {
    /// Derive the column set from the first record and check every other
    /// record carries exactly the same keys.
    pub fn new(records: &'a [Record]) -> Result<Self, LoadError> {
        let first = records.first().ok_or(LoadError::EmptyBatch)?;
        if first.is_empty() {
            return Err(LoadError::NoColumns);
        }

        let columns = Columns(first.columns().map(str::to_string).collect());

        for (row, record) in records.iter().enumerate().skip(1) {
            if let Some(column) = columns.iter().find(|c| !record.contains(c)) {
                return Err(LoadError::column_mismatch(row, column));
            }
            // Same length plus every expected key present means identical sets
            if record.len() != columns.len() {
                let extra = record
                    .columns()
                    .find(|c| !first.contains(c))
                    .unwrap_or_default();
                return Err(LoadError::column_mismatch(row, extra));
            }
        }

        Ok(Self { records, columns })
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lazily encode the batch, one CSV record per input record, in input order.
    pub fn rows(&self) -> EncodedRows<'_> {
        EncodedRows {
            columns: &self.columns,
            records: self.records.iter(),
            position: 0,
        }
    }
}

/// Single-pass iterator of encoded CSV records, each ending in `\n`.
pub struct EncodedRows<'a> {
    columns: &'a Columns,
    records: std::slice::Iter<'a, Record>,
    position: usize,
}

impl Iterator for EncodedRows<'_> {
    type Item = Result<String, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let mut line = String::with_capacity(self.columns.len() * 16);
        let row = self.position;
        self.position += 1;
        Some(write_row(row, self.columns, record, &mut line).map(|_| line))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for EncodedRows<'_> {}

fn write_row(
    row: usize,
    columns: &Columns,
    record: &Record,
    out: &mut String,
) -> Result<(), LoadError> {
    for (idx, column) in columns.iter().enumerate() {
        let value = record
            .get(column)
            .ok_or_else(|| LoadError::column_mismatch(row, column))?;
        if idx > 0 {
            out.push(FIELD_DELIMITER);
        }
        write_value(value, out);
    }
    out.push('\n');
    Ok(())
}

/// Encode a single value as one CSV field.
pub fn encode_value(value: &Value) -> String {
    let mut field = String::new();
    write_value(value, &mut field);
    field
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str(NULL_SENTINEL),
        Value::Text(s) => write_text(s, out),
        // Integers beyond i64 keep their exact digits
        Value::Json(serde_json::Value::Number(n)) => out.push_str(&n.to_string()),
        Value::Json(json) => write_text(&json.to_string(), out),
        Value::Timestamp(ts) => {
            out.push('"');
            out.push_str(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
            out.push('"');
        }
        Value::TimestampTz(ts) => {
            out.push('"');
            out.push_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, false));
            out.push('"');
        }
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => write_float(*f, out),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Date(d) => out.push_str(&d.format("%Y-%m-%d").to_string()),
        Value::Uuid(u) => out.push_str(&u.hyphenated().to_string()),
    }
}

fn write_float(f: f64, out: &mut String) {
    if f.is_nan() {
        out.push_str("NaN");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        out.push_str(&f.to_string());
    }
}

/// Quote and escape a string field.
///
/// Inside a quoted CSV field PostgreSQL reads every character literally
/// except the quote, so only `"` is doubled. Backslashes, newlines and
/// carriage returns are kept raw; a value with a line break makes the row
/// span several physical lines, which quoting allows. NUL is deleted.
pub fn escape_text(s: &str) -> String {
    let mut field = String::with_capacity(s.len() + 2);
    write_text(s, &mut field);
    field
}

fn write_text(s: &str, out: &mut String) {
    out.reserve(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\"\""),
            // PostgreSQL text cannot hold NUL; it is dropped
            '\0' => {}
            other => out.push(other),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use serde_json::json;
    use uuid::Uuid;

    /// How PostgreSQL's CSV parser reads one quoted field back.
    fn parse_csv_field(field: &str) -> String {
        field
            .strip_prefix('"')
            .and_then(|f| f.strip_suffix('"'))
            .expect("quoted field")
            .replace("\"\"", "\"")
    }

    fn example_batch() -> Vec<Record> {
        vec![
            Record::new().with("id", 1).with("description", "a"),
            Record::new().with("id", 2).with("description", "b"),
        ]
    }

    #[test]
    fn test_escape_plain_string() {
        assert_eq!(escape_text("record description 1"), "\"record description 1\"");
    }

    #[test]
    fn test_backslash_and_line_breaks_kept_raw() {
        assert_eq!(escape_text("a\\nb"), "\"a\\nb\"");
        assert_eq!(escape_text("a\nb"), "\"a\nb\"");
        assert_ne!(escape_text("a\\nb"), escape_text("a\nb"));
        assert_eq!(escape_text("C:\\temp\\"), "\"C:\\temp\\\"");
    }

    #[test]
    fn test_escape_quotes_and_carriage_return() {
        assert_eq!(escape_text("He said \"hi\"\n"), "\"He said \"\"hi\"\"\n\"");
        assert_eq!(escape_text("line\r\n"), "\"line\r\n\"");
    }

    #[test]
    fn test_escape_removes_nul() {
        assert_eq!(escape_text("a\0b\x00c\u{0000}"), "\"abc\"");
    }

    #[test]
    fn test_escape_round_trip_modulo_nul() {
        let samples = [
            "",
            "plain",
            "back\\slash",
            "trailing\\",
            "\\n literal",
            "quote \" inside",
            "\"\"",
            "multi\nline\r\nbody",
            "mixed \\\"\n\r\0 end",
            "comma, separated",
            "\\N",
            "unicode ünïcødé \u{1F600}",
        ];

        for sample in samples {
            let encoded = escape_text(sample);
            assert_eq!(parse_csv_field(&encoded), sample.replace('\0', ""), "sample {sample:?}");
        }
    }

    #[test]
    fn test_multiline_value_spans_physical_lines() {
        let batch = vec![Record::new().with("id", 1).with("description", "He said \"hi\"\n")];
        let encoder = RowEncoder::new(&batch).unwrap();
        let rows: Vec<String> = encoder.rows().collect::<Result<_, _>>().unwrap();

        assert_eq!(rows, vec!["1,\"He said \"\"hi\"\"\n\"\n"]);
    }

    #[test]
    fn test_null_uses_sentinel() {
        assert_eq!(encode_value(&Value::Null), "\\N");
        assert_eq!(encode_value(&Value::from(None::<i64>)), "\\N");
        // The literal string "\N" stays a quoted string
        assert_eq!(encode_value(&Value::from("\\N")), "\"\\N\"");
        assert_ne!(encode_value(&Value::from("")), NULL_SENTINEL);
    }

    #[test]
    fn test_scalars_unquoted() {
        assert_eq!(encode_value(&Value::Int(-42)), "-42");
        assert_eq!(encode_value(&Value::Float(0.25)), "0.25");
        assert_eq!(encode_value(&Value::Float(f64::NAN)), "NaN");
        assert_eq!(encode_value(&Value::Float(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(encode_value(&Value::Bool(true)), "true");
        assert_eq!(
            encode_value(&Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())),
            "2024-02-29"
        );
        let id = Uuid::nil();
        assert_eq!(encode_value(&Value::Uuid(id)), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_timestamps_quoted_iso8601() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(encode_value(&Value::Timestamp(naive)), "\"2024-01-02T03:04:05\"");

        let micros = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 123_456)
            .unwrap();
        assert_eq!(
            encode_value(&Value::Timestamp(micros)),
            "\"2024-01-02T03:04:05.123456\""
        );

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let aware = offset.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            encode_value(&Value::from(aware)),
            "\"2024-01-02T03:04:05+02:00\""
        );
    }

    #[test]
    fn test_json_encoded_as_string() {
        let value = Value::Json(json!({"k": "v \"q\""}));
        assert_eq!(encode_value(&value), r#""{""k"":""v \""q\""""}""#);
    }

    #[test]
    fn test_json_number_beyond_i64_keeps_digits() {
        let big: serde_json::Value = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(encode_value(&Value::from(big)), "18446744073709551615");
    }

    #[test]
    fn test_rows_match_batch_in_order() {
        let batch = example_batch();
        let encoder = RowEncoder::new(&batch).unwrap();

        assert_eq!(encoder.columns().names(), &["id", "description"]);

        let rows: Vec<String> = encoder.rows().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows, vec!["1,\"a\"\n", "2,\"b\"\n"]);
        assert_eq!(encoder.rows().len(), batch.len());
    }

    #[test]
    fn test_rows_follow_first_record_order() {
        let batch = vec![
            Record::new().with("id", 1).with("description", "a"),
            Record::new().with("description", "b").with("id", 2),
        ];
        let encoder = RowEncoder::new(&batch).unwrap();
        let rows: Vec<String> = encoder.rows().collect::<Result<_, _>>().unwrap();

        assert_eq!(rows[1], "2,\"b\"\n");
    }

    #[test]
    fn test_null_row() {
        let batch = vec![Record::new().with("id", 3).with("description", Value::Null)];
        let encoder = RowEncoder::new(&batch).unwrap();
        let rows: Vec<String> = encoder.rows().collect::<Result<_, _>>().unwrap();

        assert_eq!(rows, vec!["3,\\N\n"]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let batch: Vec<Record> = Vec::new();
        assert!(matches!(RowEncoder::new(&batch), Err(LoadError::EmptyBatch)));
    }

    #[test]
    fn test_record_without_columns_rejected() {
        let batch = vec![Record::new()];
        assert!(matches!(RowEncoder::new(&batch), Err(LoadError::NoColumns)));
    }

    #[test]
    fn test_missing_column_rejected() {
        let batch = vec![
            Record::new().with("id", 1).with("description", "a"),
            Record::new().with("id", 2),
        ];
        match RowEncoder::new(&batch) {
            Err(LoadError::ColumnMismatch { row, column }) => {
                assert_eq!(row, 1);
                assert_eq!(column, "description");
            }
            other => panic!("expected column mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_extra_column_rejected() {
        let batch = vec![
            Record::new().with("id", 1),
            Record::new().with("id", 2),
            Record::new().with("id", 3).with("extra", true),
        ];
        match RowEncoder::new(&batch) {
            Err(LoadError::ColumnMismatch { row, column }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "extra");
            }
            other => panic!("expected column mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
