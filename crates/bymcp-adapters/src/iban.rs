//! IBAN validation (ISO 13616 MOD-97) and masking.

use std::sync::LazyLock;

use regex::Regex;

/// Expected total IBAN length per country code.
const IBAN_LENGTHS: [(&str, usize); 74] = [
    ("AL", 28), ("AD", 24), ("AT", 20), ("AZ", 28), ("BH", 22),
    ("BE", 16), ("BA", 20), ("BR", 29), ("BG", 22), ("CR", 22),
    ("HR", 21), ("CY", 28), ("CZ", 24), ("DK", 18), ("DO", 28),
    ("EE", 20), ("EG", 29), ("FO", 18), ("FI", 18), ("FR", 27),
    ("GE", 22), ("DE", 22), ("GI", 23), ("GR", 27), ("GL", 18),
    ("GT", 28), ("HU", 28), ("IS", 26), ("IQ", 23), ("IE", 22),
    ("IL", 23), ("IT", 27), ("JO", 30), ("KZ", 20), ("XK", 20),
    ("KW", 30), ("LV", 21), ("LB", 28), ("LI", 21), ("LT", 20),
    ("LU", 20), ("MT", 31), ("MR", 27), ("MU", 30), ("MD", 24),
    ("MC", 27), ("ME", 22), ("NL", 18), ("MK", 19), ("NO", 15),
    ("PK", 24), ("PS", 29), ("PL", 28), ("PT", 25), ("QA", 29),
    ("RO", 24), ("LC", 32), ("SM", 27), ("SA", 24), ("RS", 22),
    ("SK", 24), ("SI", 19), ("ES", 24), ("SE", 24), ("CH", 21),
    ("TL", 23), ("TN", 24), ("TR", 26), ("UA", 29), ("AE", 23),
    ("GB", 22), ("VA", 22), ("VG", 24), ("YE", 30),
];

static IBAN_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z]{2}\d{2}[A-Z0-9]+$").unwrap_or_else(|e| panic!("invalid IBAN regex: {e}"))
});

static IBAN_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{2}\d{2})[0-9A-Z]{4,}([0-9A-Z]{4})\b")
        .unwrap_or_else(|e| panic!("invalid IBAN regex: {e}"))
});

/// Result of [`validate_iban`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbanCheck {
    pub valid: bool,
    /// Upper-cased, without spaces.
    pub normalized: String,
    pub masked: String,
    /// Why the IBAN is invalid; empty when valid.
    pub error: String,
}

/// Validate an IBAN: country, length, character set and MOD-97 checksum.
pub fn validate_iban(raw: &str) -> IbanCheck {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ' ')
        .collect::<String>()
        .to_uppercase();
    let masked = mask_iban(&normalized);
    let fail = |error: String| IbanCheck {
        valid: false,
        normalized: normalized.clone(),
        masked: masked.clone(),
        error,
    };

    let len = normalized.chars().count();
    if len < 5 {
        return fail("IBAN is too short.".into());
    }
    let country: String = normalized.chars().take(2).collect();
    if !country.chars().all(|c| c.is_ascii_alphabetic()) {
        return fail("invalid country code.".into());
    }
    let Some(expected) = expected_length(&country) else {
        return fail(format!("unknown country code: {country}"));
    };
    if len != expected {
        return fail(format!(
            "wrong IBAN length for {country}: expected {expected}, got {len}."
        ));
    }
    if !IBAN_SHAPE.is_match(&normalized) {
        return fail("IBAN contains invalid characters.".into());
    }
    if mod97(&normalized) != 1 {
        return fail("IBAN checksum (MOD-97) is invalid.".into());
    }

    IbanCheck {
        valid: true,
        normalized: normalized.clone(),
        masked: masked.clone(),
        error: String::new(),
    }
}

fn expected_length(country: &str) -> Option<usize> {
    IBAN_LENGTHS
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, len)| *len)
}

/// MOD-97 over the rearranged IBAN, digit by digit.
///
/// Expects an upper-case alphanumeric string of at least 4 characters.
fn mod97(iban: &str) -> u32 {
    let (head, tail) = iban.split_at(4);
    tail.chars().chain(head.chars()).fold(0u32, |acc, c| match c {
        '0'..='9' => (acc * 10 + (c as u32 - '0' as u32)) % 97,
        'A'..='Z' => (acc * 100 + (c as u32 - 'A' as u32 + 10)) % 97,
        _ => acc,
    })
}

/// Mask all but the first and last four characters.
pub fn mask_iban(iban: &str) -> String {
    let chars: Vec<char> = iban.chars().collect();
    if chars.len() < 8 {
        return iban.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
}

/// Mask every IBAN-looking token inside free text.
pub fn mask_ibans_in_text(text: &str) -> String {
    IBAN_IN_TEXT
        .replace_all(text, |caps: &regex::Captures<'_>| mask_iban(&caps[0]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_german_iban_with_spaces() {
        let check = validate_iban(" de89 3704 0044 0532 0130 00 ");
        assert!(check.valid, "{}", check.error);
        assert_eq!(check.normalized, "DE89370400440532013000");
        assert_eq!(check.masked, "DE89**************3000");
        assert!(check.error.is_empty());
    }

    #[test]
    fn other_countries() {
        assert!(validate_iban("GB82 WEST 1234 5698 7654 32").valid);
        assert!(validate_iban("FR1420041010050500013M02606").valid);
        assert!(validate_iban("NO9386011117947").valid);
    }

    #[test]
    fn failures_in_order() {
        assert_eq!(validate_iban("DE8").error, "IBAN is too short.");
        assert_eq!(validate_iban("1289370400440532013000").error, "invalid country code.");
        assert_eq!(validate_iban("ZZ89370400440532013000").error, "unknown country code: ZZ");
        assert_eq!(
            validate_iban("DE8937040044053201300").error,
            "wrong IBAN length for DE: expected 22, got 21."
        );
        assert_eq!(
            validate_iban("DE8937040044053201300!").error,
            "IBAN contains invalid characters."
        );
        assert_eq!(
            validate_iban("DE88370400440532013000").error,
            "IBAN checksum (MOD-97) is invalid."
        );
    }

    #[test]
    fn short_values_are_not_masked() {
        assert_eq!(mask_iban("DE89"), "DE89");
        assert_eq!(mask_iban("DE891234"), "DE891234");
        assert_eq!(mask_iban("DE8912345"), "DE89*2345");
    }

    #[test]
    fn masks_ibans_inside_text() {
        let line = "transfer to DE89370400440532013000 for Max, debit GB82WEST12345698765432.";
        assert_eq!(
            mask_ibans_in_text(line),
            "transfer to DE89**************3000 for Max, debit GB82**************5432."
        );
        assert_eq!(mask_ibans_in_text("period 2026-02"), "period 2026-02");
    }
}
