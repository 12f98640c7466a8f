//! User and entity features
//!
//! Pulls the acting user, source address and process out of a record and
//! counts how many of them were found.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::table::{Record, Value};

/// Named-entity types that identify a person
const USER_ENTITY_TYPES: &[&str] = &["USER", "PER", "PERSON"];

static USER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"user\s+([a-zA-Z0-9_\-]+)").expect("user pattern"));
static IPV4_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("ipv4 pattern"));

/// One entry of the JSON `entities` field
#[derive(Debug, Deserialize)]
struct Entity {
    entity: String,
    #[serde(rename = "type")]
    kind: String,
}

fn text<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Username from tagged entities, else from `user <name>` in the raw message
pub fn extract_username(record: &Record) -> Option<String> {
    let tagged = text(record, "entities")
        .and_then(|raw| serde_json::from_str::<Vec<Entity>>(raw).ok())
        .and_then(|entities| {
            entities
                .into_iter()
                .find(|e| USER_ENTITY_TYPES.contains(&e.kind.as_str()))
        })
        .map(|e| e.entity);

    tagged.or_else(|| {
        let msg = text(record, "raw_message")?;
        USER_PATTERN
            .captures(msg)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// First IPv4 address in the raw message
pub fn extract_ip(record: &Record) -> Option<String> {
    let msg = text(record, "raw_message")?;
    IPV4_PATTERN.find(msg).map(|m| m.as_str().to_string())
}

pub fn extract_process(record: &Record) -> Option<String> {
    text(record, "process").map(str::to_string)
}

pub fn ueba_features(record: &Record) -> Record {
    let username = extract_username(record);
    let ip = extract_ip(record);
    let process = extract_process(record);
    let entity_count = [username.is_some(), ip.is_some(), process.is_some()]
        .iter()
        .filter(|&&found| found)
        .count();

    let mut out = Record::new();
    out.insert("has_username".into(), username.is_some().into());
    out.insert("username".into(), username.into());
    out.insert("has_ip".into(), ip.is_some().into());
    out.insert("src_ip".into(), ip.into());
    out.insert("has_process".into(), process.is_some().into());
    out.insert("process_name".into(), process.into());
    out.insert("entity_count".into(), entity_count.into());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_regex_fallback() {
        let r = record(&[
            ("raw_message", "Invalid user admin from 203.0.113.9 port 4242"),
            ("process", "sshd"),
        ]);
        let f = ueba_features(&r);
        assert_eq!(f["username"], Value::from("admin"));
        assert_eq!(f["src_ip"], Value::from("203.0.113.9"));
        assert_eq!(f["process_name"], Value::from("sshd"));
        assert_eq!(f["entity_count"], Value::Number(3.0));
    }

    #[test]
    fn test_entities_take_precedence() {
        let r = record(&[
            ("raw_message", "session opened for user root"),
            ("entities", r#"[{"entity": "web01", "type": "HOST"}, {"entity": "alice", "type": "PER"}]"#),
        ]);
        assert_eq!(extract_username(&r), Some("alice".into()));
    }

    #[test]
    fn test_malformed_entities_fall_back() {
        let r = record(&[("raw_message", "user bob logged in"), ("entities", "{oops")]);
        assert_eq!(extract_username(&r), Some("bob".into()));
    }

    #[test]
    fn test_empty_process_counts_as_absent() {
        let r = record(&[("raw_message", "Invalid user admin from 203.0.113.9"), ("process", "")]);
        let f = ueba_features(&r);
        assert_eq!(f["has_process"], Value::Bool(false));
        assert!(f["process_name"].is_null());
        assert_eq!(f["entity_count"], Value::Number(2.0));
    }

    #[test]
    fn test_nothing_found() {
        let f = ueba_features(&record(&[("raw_message", "kernel: link up"), ("process", "")]));
        assert_eq!(f["has_username"], Value::Bool(false));
        assert_eq!(f["has_ip"], Value::Bool(false));
        assert_eq!(f["has_process"], Value::Bool(false));
        assert!(f["username"].is_null());
        assert_eq!(f["entity_count"], Value::Number(0.0));
    }
}
