//! Small shared helpers

use chrono::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Generate a prefixed unique identifier, e.g. `dec-1f0c…`
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Parse a short human duration: `30m`, `4h`, `2d` (seconds accepted as `45s`).
///
/// Rejects zero, negative, missing-unit and garbage inputs; used for
/// override expiries and dismissal windows where a malformed duration must
/// fail fast.
pub fn parse_short_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.len() < 2 {
        return Err(Error::Validation(format!("invalid duration: {:?}", input)));
    }
    let (num, unit) = s.split_at(s.len() - 1);
    let value: i64 = num
        .parse()
        .map_err(|_| Error::Validation(format!("invalid duration: {:?}", input)))?;
    if value <= 0 {
        return Err(Error::Validation(format!(
            "duration must be positive: {:?}",
            input
        )));
    }
    match unit {
        "s" => Ok(Duration::seconds(value)),
        "m" => Ok(Duration::minutes(value)),
        "h" => Ok(Duration::hours(value)),
        "d" => Ok(Duration::days(value)),
        _ => Err(Error::Validation(format!(
            "invalid duration unit: {:?}",
            input
        ))),
    }
}

/// SHA-256 of the input, hex-encoded
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    let mut out = String::with_capacity(64);
    for byte in digest.as_ref() {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Truncate to at most `max` characters, appending an ellipsis marker when
/// anything was cut
pub fn truncate_summary(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_short_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_short_duration("4h").unwrap(), Duration::hours(4));
        assert_eq!(parse_short_duration("2d").unwrap(), Duration::days(2));
        assert_eq!(parse_short_duration("45s").unwrap(), Duration::seconds(45));
    }

    #[test]
    fn malformed_durations_rejected() {
        for bad in ["", "m", "30", "-4h", "0m", "4 h", "1w", "h4", "4.5h"] {
            assert!(parse_short_duration(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn sha256_is_stable() {
        let a = sha256_hex(b"ls -la");
        let b = sha256_hex(b"ls -la");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex(b"ls -l"));
    }

    #[test]
    fn truncation_marks_cut() {
        assert_eq!(truncate_summary("short", 10), "short");
        let long = "x".repeat(20);
        let cut = truncate_summary(&long, 10);
        assert!(cut.chars().count() <= 10);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_id("dec");
        let b = new_id("dec");
        assert!(a.starts_with("dec-"));
        assert_ne!(a, b);
    }
}
