//! Persistent counters kept next to the ledger

/// Decimal successor of `value`, keeping its zero-padded width.
///
/// `"0099"` becomes `"0100"`, `"999"` grows to `"1000"`. Returns `None` for
/// anything that is not a non-empty digit string.
pub fn increment_decimal(value: &str) -> Option<String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut digits = value.as_bytes().to_vec();
    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        if !carry {
            break;
        }
        if *digit == b'9' {
            *digit = b'0';
        } else {
            *digit += 1;
            carry = false;
        }
    }
    if carry {
        digits.insert(0, b'1');
    }
    String::from_utf8(digits).ok()
}

/// Counter names become file names, so keep them to a safe alphabet
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn state_file_name(token: &str) -> String {
    format!("last_used_{}.state", token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_keeps_width() {
        assert_eq!(increment_decimal("0099").as_deref(), Some("0100"));
        assert_eq!(increment_decimal("70001").as_deref(), Some("70002"));
        assert_eq!(increment_decimal("999").as_deref(), Some("1000"));
        assert_eq!(increment_decimal("0").as_deref(), Some("1"));
    }

    #[test]
    fn test_increment_rejects_non_digits() {
        assert_eq!(increment_decimal(""), None);
        assert_eq!(increment_decimal("12a"), None);
        assert_eq!(increment_decimal("-1"), None);
    }

    #[test]
    fn test_token_alphabet() {
        assert!(is_valid_token("msisdn"));
        assert!(is_valid_token("bts-unit_id"));
        assert!(!is_valid_token("../etc"));
        assert!(!is_valid_token(""));
    }
}
