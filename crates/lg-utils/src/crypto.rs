//! Constant-time comparison for authentication secrets.
//!
//! The API-key check in §4.1 must take time independent of the *content* of
//! the supplied key, not just its length — otherwise an attacker who can
//! measure response latency could recover the key byte by byte. `subtle`'s
//! `ConstantTimeEq` compares fixed-length byte slices without early exit; we
//! first hash both sides so the comparison itself never branches on the
//! untrusted input's length either.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Returns true if `candidate` matches `expected`, in time that does not
/// depend on where the two strings first differ.
pub fn constant_time_eq(expected: &str, candidate: &str) -> bool {
    let expected_hash = Sha256::digest(expected.as_bytes());
    let candidate_hash = Sha256::digest(candidate.as_bytes());
    expected_hash.ct_eq(&candidate_hash).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_identical_strings() {
        assert!(constant_time_eq("sk-test", "sk-test"));
    }

    #[test]
    fn rejects_mismatched_strings() {
        assert!(!constant_time_eq("sk-test", "sk-wrong"));
    }

    #[test]
    fn rejects_different_length_strings() {
        assert!(!constant_time_eq("sk-test", "sk-test-longer"));
    }

    #[test]
    fn rejects_empty_candidate() {
        assert!(!constant_time_eq("sk-test", ""));
    }
}
