//! Message length and embedding magnitude

use crate::table::{Record, Value};

pub const EMBEDDING_FIELD: &str = "embedding";

/// L2 norm of a JSON-encoded numeric vector
pub fn embedding_norm(raw: &str) -> Option<f64> {
    let vector: Vec<f64> = serde_json::from_str(raw).ok()?;
    Some(vector.iter().map(|v| v * v).sum::<f64>().sqrt())
}

/// `message_length` in characters of the cleaned message and
/// `embedding_norm` (null without a parsable embedding)
pub fn statistical_features(record: &Record) -> Record {
    let length = record
        .get("clean_message")
        .and_then(Value::as_str)
        .map_or(0, |m| m.chars().count());
    let norm = record
        .get(EMBEDDING_FIELD)
        .and_then(Value::as_str)
        .filter(|raw| !raw.is_empty())
        .and_then(embedding_norm);

    let mut out = Record::new();
    out.insert("message_length".into(), length.into());
    out.insert("embedding_norm".into(), norm.into());
    out
}
