//! Public Meeting Codes
//!
//! 9 alphanumerics formatted `XXX-XXX-XXX`. Codes are minted with rejection
//! sampling: the caller inserts and retries on a unique-constraint hit.

use lazy_static::lazy_static;
use rand::Rng;

/// Alphabet for code characters.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

lazy_static! {
    /// Wire-format pattern for public meeting codes.
    pub static ref MEETING_CODE_REGEX: regex::Regex =
        regex::Regex::new(r"^[A-Z0-9]{3}-[A-Z0-9]{3}-[A-Z0-9]{3}$").unwrap();
}

/// Generate a random public meeting code.
#[must_use]
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(11);
    for i in 0..9 {
        if i == 3 || i == 6 {
            code.push('-');
        }
        let idx = rng.gen_range(0..ALPHABET.len());
        code.push(ALPHABET[idx] as char);
    }
    code
}

/// Check a candidate code against the wire format.
#[must_use]
pub fn is_valid_code(code: &str) -> bool {
    MEETING_CODE_REGEX.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_match_format() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(is_valid_code(&code), "bad code: {code}");
            assert_eq!(code.len(), 11);
            assert_eq!(&code[3..4], "-");
            assert_eq!(&code[7..8], "-");
        }
    }

    #[test]
    fn test_format_rejections() {
        assert!(is_valid_code("ABC-123-XYZ"));
        assert!(!is_valid_code("abc-123-xyz"));
        assert!(!is_valid_code("ABC123XYZ"));
        assert!(!is_valid_code("ABCD-123-XYZ"));
        assert!(!is_valid_code("ABC-123-XY"));
        assert!(!is_valid_code("ABC_123_XYZ"));
    }
}
