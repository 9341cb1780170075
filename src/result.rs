//! Query result decoding.
//!
//! The backend returns results column by column, every cell encoded as an
//! optional string, with the column's logical representation (`rep`) carried
//! in the result schema. This module turns that into a list of rows keyed by
//! column name, and into JSON text that can be handed to tools such as `jq`.
//!
//! Decoding is driven by a [`DecodeTable`] mapping each `rep` to a decoder
//! function. Unknown reps fall back to passing the raw string through.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::debug;

use crate::error::ProviderError;
use crate::wire::TaskResult;

/// A decoded result cell.
#[derive(Debug, Clone)]
pub enum Cell {
    /// The backend returned no value.
    Null,
    /// Raw JSON text, embedded verbatim when serialized.
    Json(Box<RawValue>),
    /// An integer, also used for durations in nanoseconds.
    Int64(i64),
    /// A floating point number.
    Float64(f64),
    /// An absolute instant.
    Timestamp(DateTime<Utc>),
    /// Any other value, as the backend sent it.
    String(String),
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Json(a), Cell::Json(b)) => a.get() == b.get(),
            (Cell::Int64(a), Cell::Int64(b)) => a == b,
            (Cell::Float64(a), Cell::Float64(b)) => a == b,
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a == b,
            (Cell::String(a), Cell::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Json(raw) => raw.serialize(serializer),
            Cell::Int64(v) => serializer.serialize_i64(*v),
            Cell::Float64(v) if !v.is_finite() => {
                Err(S::Error::custom(format!("cannot represent {} in JSON", v)))
            },
            Cell::Float64(v) => serializer.serialize_f64(*v),
            Cell::Timestamp(ts) => ts.serialize(serializer),
            Cell::String(s) => serializer.serialize_str(s),
        }
    }
}

/// One result row; cells keep the column order of the result schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<(String, Cell)>,
}

impl Row {
    /// Look up a cell by column name.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    /// Iterate over `(column, cell)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

/// A decoded query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Backend query id.
    pub id: String,
    /// Start of the window the results cover.
    pub start_time: Option<DateTime<Utc>>,
    /// End of the window the results cover.
    pub end_time: Option<DateTime<Utc>>,
    /// Number of rows.
    pub row_count: i64,
    /// Schema fields as returned by the backend.
    pub fields: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Decoded rows.
    pub rows: Vec<Row>,
    /// `rows` serialized as a JSON array.
    pub json: Vec<u8>,
}

/// Decodes a single non-null cell.
pub type CellDecoder = fn(&str) -> Result<Cell, String>;

/// Table of cell decoders keyed by column `rep`.
#[derive(Clone)]
pub struct DecodeTable {
    decoders: HashMap<String, CellDecoder>,
    fallback: CellDecoder,
}

impl fmt::Debug for DecodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reps: Vec<_> = self.decoders.keys().collect();
        reps.sort();
        f.debug_struct("DecodeTable").field("reps", &reps).finish()
    }
}

fn decode_json(raw: &str) -> Result<Cell, String> {
    RawValue::from_string(raw.to_string())
        .map(Cell::Json)
        .map_err(|e| e.to_string())
}

fn decode_int64(raw: &str) -> Result<Cell, String> {
    raw.parse().map(Cell::Int64).map_err(|e| format!("{}", e))
}

fn decode_float64(raw: &str) -> Result<Cell, String> {
    let v: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if !v.is_finite() {
        return Err("not a finite number".to_string());
    }
    Ok(Cell::Float64(v))
}

fn decode_timestamp(raw: &str) -> Result<Cell, String> {
    let nanos: i64 = raw.parse().map_err(|e| format!("{}", e))?;
    Ok(Cell::Timestamp(DateTime::from_timestamp_nanos(nanos)))
}

fn decode_string(raw: &str) -> Result<Cell, String> {
    Ok(Cell::String(raw.to_string()))
}

impl Default for DecodeTable {
    fn default() -> Self {
        Self::empty()
            .with_decoder("any", decode_json)
            .with_decoder("object", decode_json)
            .with_decoder("duration", decode_int64)
            .with_decoder("int64", decode_int64)
            .with_decoder("float64", decode_float64)
            .with_decoder("timestamp", decode_timestamp)
            .with_decoder("string", decode_string)
    }
}

impl DecodeTable {
    /// A table with no decoders; every rep passes through as a string.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
            fallback: decode_string,
        }
    }

    /// Register or replace the decoder for a rep.
    pub fn with_decoder(mut self, rep: impl Into<String>, decoder: CellDecoder) -> Self {
        self.register(rep, decoder);
        self
    }

    /// Register or replace the decoder for a rep.
    pub fn register(&mut self, rep: impl Into<String>, decoder: CellDecoder) {
        self.decoders.insert(rep.into(), decoder);
    }

    /// Decode a single cell. Null cells decode to [`Cell::Null`] whatever the rep.
    pub fn decode_cell(&self, rep: &str, raw: Option<&str>) -> Result<Cell, String> {
        match raw {
            None => Ok(Cell::Null),
            Some(raw) => {
                let decoder = self.decoders.get(rep).copied().unwrap_or(self.fallback);
                decoder(raw)
            },
        }
    }

    /// Decode the task results of an executed query.
    ///
    /// Exactly one task result is expected. A backend error on that result is
    /// returned as [`ProviderError::Backend`] without decoding any rows, and
    /// any cell that fails to decode fails the whole result.
    pub fn decode(&self, results: &[TaskResult]) -> Result<QueryResult, ProviderError> {
        let [result] = results else {
            return Err(ProviderError::UnexpectedResultCount(results.len()));
        };

        if let Some(message) = &result.error {
            return Err(ProviderError::Backend(message.clone()));
        }

        let cursor = result
            .result_cursor
            .as_ref()
            .ok_or_else(|| ProviderError::MalformedResult("missing result cursor".to_string()))?;
        let fields = &result
            .result_schema
            .as_ref()
            .ok_or_else(|| ProviderError::MalformedResult("missing result schema".to_string()))?
            .typedef_definition
            .fields;

        let mut columns = Vec::with_capacity(fields.len());
        for (j, field) in fields.iter().enumerate() {
            let name = field
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ProviderError::MalformedResult(format!("field {} has no name", j)))?;
            let rep = field
                .get("type")
                .and_then(|t| t.get("rep"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            columns.push((name, rep));
        }

        let num_rows = usize::try_from(cursor.total_row_count).map_err(|_| {
            ProviderError::MalformedResult(format!(
                "negative row count {}",
                cursor.total_row_count
            ))
        })?;

        if columns.is_empty() && num_rows > 0 {
            return Err(ProviderError::MalformedResult(format!(
                "{} rows but no columns",
                num_rows
            )));
        }
        if cursor.columns.len() != columns.len() {
            return Err(ProviderError::MalformedResult(format!(
                "{} columns but {} schema fields",
                cursor.columns.len(),
                columns.len()
            )));
        }
        if let Some((j, column)) = cursor
            .columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.len() < num_rows)
        {
            return Err(ProviderError::MalformedResult(format!(
                "column {:?} has {} cells, expected {}",
                columns[j].0,
                column.len(),
                num_rows
            )));
        }

        let mut rows = Vec::with_capacity(num_rows.min(
            cursor.columns.iter().map(Vec::len).min().unwrap_or(0),
        ));
        for i in 0..num_rows {
            let mut cells = Vec::with_capacity(columns.len());
            for (j, (name, rep)) in columns.iter().enumerate() {
                let raw = cursor.columns[j][i].as_deref();
                let cell = self.decode_cell(rep, raw).map_err(|e| {
                    ProviderError::CellDecode(format!(
                        "column {:?} row {}: cannot read {:?} as {}: {}",
                        name,
                        i,
                        raw.unwrap_or_default(),
                        rep,
                        e
                    ))
                })?;
                cells.push((name.to_string(), cell));
            }
            rows.push(Row { cells });
        }

        let json = serde_json::to_vec(&rows)?;

        debug!(
            query_id = %result.query_id,
            rows = rows.len(),
            columns = columns.len(),
            "Decoded query result"
        );

        Ok(QueryResult {
            id: result.query_id.clone(),
            start_time: result.start_time,
            end_time: result.end_time,
            row_count: cursor.total_row_count,
            fields: fields.clone(),
            rows,
            json,
        })
    }
}

/// Decode task results with the default [`DecodeTable`].
pub fn decode_task_results(results: &[TaskResult]) -> Result<QueryResult, ProviderError> {
    DecodeTable::default().decode(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{SnowflakeCursor, TaskResultSchema, TypedefDefinition};
    use chrono::TimeZone;
    use serde_json::json;

    fn task_result(fields: &[(&str, &str)], columns: Vec<Vec<Option<&str>>>) -> TaskResult {
        let total_row_count = columns.first().map(|c| c.len()).unwrap_or(0) as i64;
        TaskResult {
            query_id: "q-1".to_string(),
            result_cursor: Some(SnowflakeCursor {
                total_row_count,
                columns: columns
                    .into_iter()
                    .map(|c| c.into_iter().map(|v| v.map(String::from)).collect())
                    .collect(),
                ..Default::default()
            }),
            result_schema: Some(TaskResultSchema {
                typedef_definition: TypedefDefinition {
                    fields: fields
                        .iter()
                        .map(|(name, rep)| {
                            json!({"name": name, "type": {"rep": rep}})
                                .as_object()
                                .cloned()
                                .unwrap()
                        })
                        .collect(),
                },
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_int_and_timestamp() {
        let result = task_result(
            &[("col1", "int64"), ("col2", "timestamp")],
            vec![vec![Some("5")], vec![Some("1000000000")]],
        );

        let decoded = decode_task_results(&[result]).unwrap();
        assert_eq!(decoded.row_count, 1);
        assert_eq!(decoded.rows.len(), 1);

        let row = &decoded.rows[0];
        assert_eq!(row.get("col1"), Some(&Cell::Int64(5)));
        assert_eq!(
            row.get("col2"),
            Some(&Cell::Timestamp(Utc.timestamp_opt(1, 0).unwrap()))
        );

        let json: serde_json::Value = serde_json::from_slice(&decoded.json).unwrap();
        assert_eq!(json, json!([{"col1": 5, "col2": "1970-01-01T00:00:01Z"}]));
    }

    #[test]
    fn test_all_reps() {
        let result = task_result(
            &[
                ("obj", "object"),
                ("any", "any"),
                ("dur", "duration"),
                ("f", "float64"),
                ("s", "string"),
                ("other", "bool"),
            ],
            vec![
                vec![Some(r#"{"k": [1, 2]}"#)],
                vec![Some("\"text\"")],
                vec![Some("90000000000")],
                vec![Some("1.5")],
                vec![Some("hello")],
                vec![Some("true")],
            ],
        );

        let decoded = decode_task_results(&[result]).unwrap();
        let row = &decoded.rows[0];
        assert_eq!(row.get("dur"), Some(&Cell::Int64(90_000_000_000)));
        assert_eq!(row.get("f"), Some(&Cell::Float64(1.5)));
        assert_eq!(row.get("s"), Some(&Cell::String("hello".to_string())));
        assert_eq!(row.get("other"), Some(&Cell::String("true".to_string())));
        assert!(matches!(row.get("obj"), Some(Cell::Json(raw)) if raw.get() == r#"{"k": [1, 2]}"#));

        // raw JSON is embedded as-is, unknown reps stay strings
        let text = String::from_utf8(decoded.json).unwrap();
        assert!(text.contains(r#""obj":{"k": [1, 2]}"#));
        assert!(text.contains(r#""any":"text""#));
        assert!(text.contains(r#""other":"true""#));
    }

    #[test]
    fn test_nulls() {
        let result = task_result(
            &[("a", "int64"), ("b", "timestamp"), ("c", "object")],
            vec![vec![None, Some("1")], vec![None, None], vec![None, Some("null")]],
        );

        let decoded = decode_task_results(&[result]).unwrap();
        assert_eq!(decoded.rows[0].get("a"), Some(&Cell::Null));
        assert_eq!(decoded.rows[0].get("b"), Some(&Cell::Null));
        assert_eq!(decoded.rows[1].get("a"), Some(&Cell::Int64(1)));

        let json: serde_json::Value = serde_json::from_slice(&decoded.json).unwrap();
        assert_eq!(
            json,
            json!([{"a": null, "b": null, "c": null}, {"a": 1, "b": null, "c": null}])
        );
    }

    #[test]
    fn test_column_order_follows_schema() {
        let result = task_result(
            &[("zeta", "string"), ("alpha", "string"), ("mid", "string")],
            vec![vec![Some("z")], vec![Some("a")], vec![Some("m")]],
        );

        let decoded = decode_task_results(&[result]).unwrap();
        let names: Vec<_> = decoded.rows[0].iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(
            String::from_utf8(decoded.json).unwrap(),
            r#"[{"zeta":"z","alpha":"a","mid":"m"}]"#
        );
    }

    #[test]
    fn test_backend_error() {
        let mut result = task_result(&[("a", "int64")], vec![vec![Some("1")]]);
        result.error = Some("OPAL compilation failed".to_string());

        let err = decode_task_results(&[result]).unwrap_err();
        assert!(matches!(err, ProviderError::Backend(msg) if msg == "OPAL compilation failed"));
    }

    #[test]
    fn test_unexpected_result_count() {
        let err = decode_task_results(&[]).unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedResultCount(0)));

        let result = task_result(&[("a", "int64")], vec![vec![Some("1")]]);
        let err = decode_task_results(&[result.clone(), result]).unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedResultCount(2)));
    }

    #[test]
    fn test_cell_decode_error_is_fatal() {
        let result = task_result(
            &[("a", "int64")],
            vec![vec![Some("1"), Some("two"), Some("3")]],
        );

        let err = decode_task_results(&[result]).unwrap_err();
        match err {
            ProviderError::CellDecode(msg) => {
                assert!(msg.contains("row 1"));
                assert!(msg.contains("\"two\""));
            },
            other => panic!("expected CellDecode, got {:?}", other),
        }

        let result = task_result(&[("o", "object")], vec![vec![Some("{not json")]]);
        assert!(matches!(
            decode_task_results(&[result]),
            Err(ProviderError::CellDecode(_))
        ));
    }

    #[test]
    fn test_row_count_without_columns() {
        let mut result = task_result(&[], vec![]);
        if let Some(cursor) = result.result_cursor.as_mut() {
            cursor.total_row_count = i64::MAX;
        }
        assert!(matches!(
            decode_task_results(&[result]),
            Err(ProviderError::MalformedResult(_))
        ));

        let decoded = decode_task_results(&[task_result(&[], vec![])]).unwrap();
        assert!(decoded.rows.is_empty());
        assert_eq!(decoded.json, b"[]");
    }

    #[test]
    fn test_non_finite_float_rejected() {
        for raw in ["NaN", "inf", "-infinity"] {
            let result = task_result(&[("f", "float64")], vec![vec![Some(raw)]]);
            assert!(
                matches!(decode_task_results(&[result]), Err(ProviderError::CellDecode(_))),
                "{:?} should not decode",
                raw
            );
        }
    }

    #[test]
    fn test_non_finite_cell_does_not_serialize() {
        let table =
            DecodeTable::default().with_decoder("float64", |_| Ok(Cell::Float64(f64::NAN)));
        let result = task_result(&[("f", "float64")], vec![vec![Some("1")]]);

        assert!(matches!(
            table.decode(&[result]),
            Err(ProviderError::Serialization(_))
        ));
        assert!(serde_json::to_string(&Cell::Float64(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        let mut result = task_result(&[("a", "int64"), ("b", "int64")], vec![vec![Some("1")]]);
        if let Some(cursor) = result.result_cursor.as_mut() {
            cursor.columns.push(Vec::new());
        }
        assert!(matches!(
            decode_task_results(&[result]),
            Err(ProviderError::MalformedResult(_))
        ));

        let result = task_result(&[("a", "int64")], vec![vec![Some("1")], vec![Some("2")]]);
        assert!(matches!(
            decode_task_results(&[result]),
            Err(ProviderError::MalformedResult(_))
        ));

        let mut result = task_result(&[("a", "int64")], vec![vec![Some("1")]]);
        result.result_cursor = None;
        assert!(matches!(
            decode_task_results(&[result]),
            Err(ProviderError::MalformedResult(_))
        ));
    }

    #[test]
    fn test_empty_result() {
        let result = task_result(&[("a", "int64")], vec![vec![]]);
        let decoded = decode_task_results(&[result]).unwrap();
        assert!(decoded.rows.is_empty());
        assert_eq!(decoded.json, b"[]");
    }

    #[test]
    fn test_custom_decoder() {
        fn decode_bool(raw: &str) -> Result<Cell, String> {
            match raw {
                "true" => Ok(Cell::Int64(1)),
                "false" => Ok(Cell::Int64(0)),
                other => Err(format!("not a bool: {}", other)),
            }
        }

        let table = DecodeTable::default().with_decoder("bool", decode_bool);
        let result = task_result(&[("flag", "bool")], vec![vec![Some("true"), Some("false")]]);

        let decoded = table.decode(&[result]).unwrap();
        assert_eq!(decoded.rows[0].get("flag"), Some(&Cell::Int64(1)));
        assert_eq!(decoded.rows[1].get("flag"), Some(&Cell::Int64(0)));
    }

    #[test]
    fn test_empty_table_passes_through() {
        let table = DecodeTable::empty();
        assert_eq!(
            table.decode_cell("int64", Some("5")).unwrap(),
            Cell::String("5".to_string())
        );
        assert_eq!(table.decode_cell("int64", None).unwrap(), Cell::Null);
    }
}
