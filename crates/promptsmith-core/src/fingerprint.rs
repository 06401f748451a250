use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Identity of a prompt text for duplicate detection.
///
/// Whitespace runs collapse and case folds, so trivially reformatted variants
/// hash the same.
pub fn prompt_fingerprint(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    sha256_hex(&normalized)
}

/// Keeps the first occurrence of each fingerprint, skipping anything already in `seen`.
pub fn dedupe_by_fingerprint<T>(
    items: Vec<T>,
    text: impl Fn(&T) -> &str,
    seen: &mut HashSet<String>,
) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| seen.insert(prompt_fingerprint(text(item))))
        .collect()
}
