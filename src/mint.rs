//! Short-code minting.
//!
//! Codes are drawn uniformly from a 62-character alphabet with the OS CSPRNG;
//! custom codes are validated against a fixed pattern. Collision handling
//! (probe + bounded retry) lives with the create path, which owns the store.

use anyhow::Context;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::Result;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

static CUSTOM_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{4,16}$").expect("valid custom code pattern"));

/// Generate a random short code of the given length.
///
/// Bytes above the largest multiple of the alphabet size are rejected so the
/// draw stays uniform. Fails only if the OS RNG fails.
pub fn generate(length: usize) -> Result<String> {
    // 62 * 4 = 248: accept bytes in [0, 248) and fold them onto the alphabet.
    let limit = (u8::MAX as usize / CHARSET.len()) * CHARSET.len();
    let mut code = String::with_capacity(length);
    let mut buf = [0u8; 64];

    while code.len() < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .context("system RNG failure while minting a short code")?;
        for &byte in buf.iter() {
            if (byte as usize) < limit {
                code.push(CHARSET[byte as usize % CHARSET.len()] as char);
                if code.len() == length {
                    break;
                }
            }
        }
    }

    Ok(code)
}

/// True iff `code` is an acceptable caller-chosen short code.
pub fn validate_custom(code: &str) -> bool {
    CUSTOM_CODE_RE.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_requested_length_and_charset() {
        for length in [4, 6, 8, 16] {
            let code = generate(length).unwrap();
            assert_eq!(code.len(), length);
            assert!(code.bytes().all(|b| CHARSET.contains(&b)), "{code}");
        }
    }

    #[test]
    fn generated_codes_are_distinct() {
        // 62^8 combinations; a duplicate here means the RNG is broken.
        let a = generate(8).unwrap();
        let b = generate(8).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn custom_codes_accept_the_documented_range() {
        assert!(validate_custom("abcd"));
        assert!(validate_custom("a_b-C9"));
        assert!(validate_custom("ABCDEFGHIJKLMNOP")); // 16 chars
    }

    #[test]
    fn custom_codes_reject_bad_lengths_and_chars() {
        assert!(!validate_custom("abc")); // 3 chars
        assert!(!validate_custom("ABCDEFGHIJKLMNOPQ")); // 17 chars
        assert!(!validate_custom("ab cd"));
        assert!(!validate_custom("ab.cd"));
        assert!(!validate_custom("短码abcd"));
        assert!(!validate_custom(""));
    }
}
