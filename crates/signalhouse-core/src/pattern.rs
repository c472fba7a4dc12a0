//! Log pattern fingerprinting for first-seen detection.
//!
//! Two log lines that differ only in numbers, ids or hex blobs should land on
//! the same fingerprint. The skeleton keeps the textual shape of the message
//! and wildcards every token that carries variable data.

use xxhash_rust::xxh3::xxh3_64;

/// Placeholder substituted for variable tokens in the skeleton.
const WILDCARD: &str = "<*>";

/// Stable 64-bit fingerprint of a log body's structural skeleton.
pub fn fingerprint(body: &str) -> u64 {
    xxh3_64(skeleton(body).as_bytes())
}

/// Collapse variable tokens: any whitespace-delimited token containing a digit
/// becomes a wildcard. This folds ips, ports, durations, counters, uuids and
/// hex ids without trying to enumerate their shapes.
fn skeleton(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    for (i, token) in body.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if token.chars().any(|c| c.is_ascii_digit()) {
            out.push_str(WILDCARD);
        } else {
            out.push_str(token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_fold_to_same_fingerprint() {
        let a = fingerprint("connected to 10.0.0.1:8080 in 32ms");
        let b = fingerprint("connected to 10.0.0.2:9090 in 970ms");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_shapes_differ() {
        let a = fingerprint("connection refused");
        let b = fingerprint("connection established");
        assert_ne!(a, b);
    }

    #[test]
    fn test_uuid_tokens_fold() {
        let a = fingerprint("session 550e8400-e29b-41d4-a716-446655440000 expired");
        let b = fingerprint("session 123e4567-e89b-12d3-a456-426614174000 expired");
        assert_eq!(a, b);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        assert_eq!(fingerprint("a  b"), fingerprint("a b"));
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(fingerprint(""), fingerprint("   "));
    }
}
