//! Log record enrichment
//!
//! Builds the normalized base record from a raw log event and merges in the
//! time, statistical and entity feature groups. Every extractor tolerates
//! missing fields; absent inputs produce nulls, never errors.

pub mod normalize;
pub mod statistical;
pub mod time;
pub mod ueba;

use crate::table::{FeatureTable, Record, Value};

pub use normalize::clean_message;
pub use statistical::statistical_features;
pub use time::time_features;
pub use ueba::ueba_features;

/// Input field holding the raw log line
pub const MESSAGE_FIELD: &str = "message";

/// Fields copied from the raw event as text, empty when absent
const PASSTHROUGH_TEXT: &[&str] = &["@timestamp", "hostname", "process"];
/// Fields copied only when present
const PASSTHROUGH_OPTIONAL: &[&str] = &["embedding", "entities"];

fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => v.to_string(),
    }
}

/// Enrich one raw event
pub fn enrich(input: &Record) -> Record {
    let raw = as_text(input.get(MESSAGE_FIELD));
    let clean = clean_message(&raw);

    let mut record = Record::new();
    for &field in PASSTHROUGH_TEXT {
        record.insert(field.into(), Value::Text(as_text(input.get(field))));
    }
    for &field in PASSTHROUGH_OPTIONAL {
        if let Some(value) = input.get(field).filter(|v| !v.is_null()) {
            record.insert(field.into(), value.clone());
        }
    }
    record.insert("raw_message".into(), Value::Text(raw));
    record.insert("clean_message".into(), Value::Text(clean));

    let groups = [
        time_features(&record),
        statistical_features(&record),
        ueba_features(&record),
    ];
    for group in groups {
        record.extend(group);
    }
    record
}

/// Enrich every record of a table
pub fn enrich_table(table: &FeatureTable) -> FeatureTable {
    table.records().iter().map(enrich).collect()
}
