//! Shared helpers: handle parsing, human-readable formatting.

pub mod fs;

use std::time::Duration;

/// Normalize a single handle: trim, strip a leading `@`, lowercase.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_ascii_lowercase()
}

/// Parse one or many handles from free-form text.
///
/// Accepts `@`-prefixed names, comma or whitespace separation, and mixed
/// case; returns normalized handles with duplicates removed, order
/// preserved.
pub fn parse_handles(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    text.split([',', ' ', '\n', '\t'])
        .map(normalize_handle)
        .filter(|h| !h.is_empty())
        .filter(|h| seen.insert(h.clone()))
        .collect()
}

/// Format an elapsed duration as `2h 5m 3.4s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let secs = (total % 60.0 * 10.0).round() / 10.0;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0.0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

/// Format a follower/following count with K/M suffixes.
pub fn format_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

/// Truncate text to `max_len` characters, appending an ellipsis.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let truncated: String = text.chars().take(max_len).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@Alice "), "alice");
        assert_eq!(normalize_handle("BOB"), "bob");
    }

    #[test]
    fn test_parse_handles_mixed_separators() {
        let handles = parse_handles("@Alice, bob\ncharlie @alice");
        assert_eq!(handles, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn test_parse_handles_empty() {
        assert!(parse_handles("  , \n ").is_empty());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_elapsed(Duration::from_secs(3600 + 125)), "1h 2m 5s");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_500), "1.5K");
        assert_eq!(format_count(2_300_000), "2.3M");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdefghij", 5), "abcde...");
    }
}
