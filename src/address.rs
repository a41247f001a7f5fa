//! Component A: address validator (spec §4.A).
//!
//! Pure predicate, no trimming — the caller is expected to trim. Accepts a
//! string iff it is exactly 56 characters, starts with `G`, and the
//! remaining 55 characters are drawn from the Base32 Stellar alphabet
//! (`A-Z`, `2-7`).

pub fn is_valid_wallet_address(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != 56 {
        return false;
    }
    if bytes[0] != b'G' {
        return false;
    }
    bytes[1..].iter().all(|&b| is_base32_char(b))
}

fn is_base32_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z') || matches!(b, b'2'..=b'7')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_tail() -> String {
        "A".repeat(55)
    }

    #[test]
    fn accepts_well_formed_address() {
        let addr = format!("G{}", valid_tail());
        assert!(is_valid_wallet_address(&addr));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_wallet_address("G"));
        let too_long = format!("G{}", "A".repeat(60));
        assert!(!is_valid_wallet_address(&too_long));
    }

    #[test]
    fn rejects_wrong_prefix() {
        let addr = format!("M{}", valid_tail());
        assert!(!is_valid_wallet_address(&addr));
    }

    #[test]
    fn rejects_invalid_alphabet() {
        // '0', '1', '8', '9' are not in the Stellar Base32 alphabet.
        let mut tail = valid_tail();
        tail.replace_range(0..1, "0");
        let addr = format!("G{tail}");
        assert!(!is_valid_wallet_address(&addr));

        let addr_lower = format!("Ga{}", "A".repeat(54));
        assert!(!is_valid_wallet_address(&addr_lower));
    }

    #[test]
    fn rejects_untrimmed_whitespace() {
        let addr = format!(" G{}", valid_tail());
        assert!(!is_valid_wallet_address(&addr));
        let addr2 = format!("G{} ", valid_tail());
        assert!(!is_valid_wallet_address(&addr2));
    }

    #[test]
    fn empty_string_is_invalid() {
        assert!(!is_valid_wallet_address(""));
    }
}
