//! Log message normalization
//!
//! Strips the volatile parts of a log line (addresses, numbers, paths) so
//! that messages from the same template collapse to the same text.

use std::sync::LazyLock;

use regex::Regex;

struct Patterns {
    ipv4: Regex,
    number: Regex,
    path: Regex,
    parenthesized: Regex,
    non_letter: Regex,
    whitespace: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    ipv4: Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("ipv4 pattern"),
    number: Regex::new(r"\b\d+\b").expect("number pattern"),
    path: Regex::new(r"/[a-zA-Z0-9_\-./]+").expect("path pattern"),
    parenthesized: Regex::new(r"\(.*?\)").expect("parenthesized pattern"),
    non_letter: Regex::new(r"[^a-zA-Z ]+").expect("non-letter pattern"),
    whitespace: Regex::new(r"\s+").expect("whitespace pattern"),
});

/// Normalize a raw log message.
///
/// Lowercases, then in order: IPv4 addresses become `IP`, standalone
/// integers are dropped, absolute paths become `PATH`, parenthesized text is
/// dropped, anything but ASCII letters turns into spaces, and runs of
/// whitespace collapse to one space.
pub fn clean_message(msg: &str) -> String {
    let p = &*PATTERNS;
    let text = msg.to_lowercase();
    let text = p.ipv4.replace_all(&text, " IP ");
    let text = p.number.replace_all(&text, " ");
    let text = p.path.replace_all(&text, " PATH ");
    let text = p.parenthesized.replace_all(&text, " ");
    let text = p.non_letter.replace_all(&text, " ");
    p.whitespace.replace_all(&text, " ").trim().to_string()
}
