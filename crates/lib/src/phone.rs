//! Phone number normalization toward E.164 and hashing for log redaction.

use sha2::{Digest, Sha256};

/// Country code assumed for numbers submitted without a leading `+`.
const DEFAULT_COUNTRY_PREFIX: &str = "+1";

/// Normalize a user-entered phone number toward E.164.
///
/// Numbers already starting with `+` are only trimmed. Anything else is treated as a
/// US number: non-digits are dropped and `+1` is prepended. The result is not validated;
/// use [`is_valid_e164`] for that.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('+') {
        return trimmed.to_string();
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{}{}", DEFAULT_COUNTRY_PREFIX, digits)
}

/// True if `phone` matches `^\+[1-9]\d{1,14}$`.
pub fn is_valid_e164(phone: &str) -> bool {
    let Some(rest) = phone.strip_prefix('+') else {
        return false;
    };
    let bytes = rest.as_bytes();
    if bytes.len() < 2 || bytes.len() > 15 {
        return false;
    }
    if !(b'1'..=b'9').contains(&bytes[0]) {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_digit())
}

/// Lowercase hex SHA-256 of the phone number.
pub fn phone_hash(phone: &str) -> String {
    let digest = Sha256::digest(phone.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Short hash prefix used to identify a sender in logs without printing the number.
pub fn redacted(phone: &str) -> String {
    let mut h = phone_hash(phone);
    h.truncate(10);
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prefixes_us_country_code() {
        assert_eq!(normalize_phone("4155550123"), "+14155550123");
        assert_eq!(normalize_phone(" (415) 555-0123 "), "+14155550123");
    }

    #[test]
    fn normalize_keeps_explicit_country_code() {
        assert_eq!(normalize_phone(" +447700900123 "), "+447700900123");
    }

    #[test]
    fn e164_validation() {
        assert!(is_valid_e164("+14155550123"));
        assert!(is_valid_e164("+12"));
        assert!(!is_valid_e164("+1"));
        assert!(!is_valid_e164("+04155550123"));
        assert!(!is_valid_e164("14155550123"));
        assert!(!is_valid_e164("+1415555012345678"));
        assert!(!is_valid_e164("+1415-555"));
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = phone_hash("+14155550123");
        assert_eq!(h.len(), 64);
        assert_eq!(h, phone_hash("+14155550123"));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(redacted("+14155550123").len(), 10);
    }
}
