//! Record tables
//!
//! The in-memory shape every stage exchanges: an ordered list of records,
//! each a flat map of field name to scalar value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Largest magnitude at which every whole f64 is exactly an i64
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// A single scalar field value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl Value {
    /// Numeric view of the value; booleans map to 0/1. Feature inference
    /// does not count booleans as numeric, see `FeatureFrame::infer_columns`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) | Value::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse a raw cell (CSV and similar) into the narrowest value
    pub fn parse_cell(cell: &str) -> Self {
        let cell = cell.trim();
        if cell.is_empty() {
            return Value::Null;
        }
        match cell {
            "true" | "True" | "TRUE" => return Value::Bool(true),
            "false" | "False" | "FALSE" => return Value::Bool(false),
            _ => {}
        }
        match cell.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Text(cell.to_string()),
        }
    }
}

/// Whole numbers are written as JSON integers, so 0/1 flags read `1` rather
/// than `1.0`
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Null => serializer.serialize_unit(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Null => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Nested arrays and objects are kept as their JSON text
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            serde_json::Value::String(s) => Value::Text(s),
            nested => Value::Text(nested.to_string()),
        }
    }
}

/// One log record
pub type Record = BTreeMap<String, Value>;

/// Ordered collection of records sharing a universe of column names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureTable {
    records: Vec<Record>,
}

impl FeatureTable {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Union of column names across all records, in sorted order
    pub fn columns(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.records.iter().flat_map(|r| r.keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// Whether any record carries this column
    pub fn has_column(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.contains_key(name))
    }

    /// Values of one column, `None` where a record lacks the field
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.records.iter().map(move |r| r.get(name))
    }

    /// Set (or overwrite) a column; `values` must have one entry per record
    pub fn set_column<V: Into<Value>>(&mut self, name: &str, values: impl IntoIterator<Item = V>) {
        for (record, value) in self.records.iter_mut().zip(values) {
            record.insert(name.to_string(), value.into());
        }
    }

    /// Subset of rows by index, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            records: indices
                .iter()
                .filter_map(|&i| self.records.get(i).cloned())
                .collect(),
        }
    }
}

impl From<Vec<Record>> for FeatureTable {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl FromIterator<Record> for FeatureTable {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_columns_are_union_sorted() {
        let table = FeatureTable::new(vec![
            record(&[("b", Value::Number(1.0))]),
            record(&[("a", Value::Null), ("c", "x".into())]),
        ]);
        assert_eq!(table.columns(), vec!["a", "b", "c"]);
        assert!(table.has_column("c"));
        assert!(!table.has_column("d"));
    }

    #[test]
    fn test_set_column() {
        let mut table = FeatureTable::new(vec![Record::new(), Record::new()]);
        table.set_column("score", vec![0.5, 0.7]);
        let values: Vec<_> = table.column("score").map(|v| v.and_then(Value::as_f64)).collect();
        assert_eq!(values, vec![Some(0.5), Some(0.7)]);
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(Value::parse_cell(""), Value::Null);
        assert_eq!(Value::parse_cell("3.5"), Value::Number(3.5));
        assert_eq!(Value::parse_cell("true"), Value::Bool(true));
        assert_eq!(Value::parse_cell("sshd"), Value::Text("sshd".into()));
        assert_eq!(Value::parse_cell("NaN"), Value::Text("NaN".into()));
    }

    #[test]
    fn test_value_json_roundtrip() {
        let rec = record(&[
            ("n", Value::Number(2.0)),
            ("b", Value::Bool(true)),
            ("s", "hello".into()),
            ("z", Value::Null),
        ]);
        let json = serde_json::to_string(&rec).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_whole_numbers_written_as_integers() {
        let rec = record(&[("flag", Value::Number(1.0)), ("score", Value::Number(0.25))]);
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"flag":1,"score":0.25}"#);
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back["flag"], Value::Number(1.0));
    }

    #[test]
    fn test_nested_json_kept_as_text() {
        let v: serde_json::Value = serde_json::json!([0.5, 1.5]);
        assert_eq!(Value::from(v), Value::Text("[0.5,1.5]".into()));
        assert_eq!(Value::from(serde_json::json!(7)), Value::Number(7.0));
    }
}
