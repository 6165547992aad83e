//! Euro amounts as integer cents.

/// Parse a German-formatted amount (`1.234,56`) into cents.
///
/// Thousands separators are optional; exactly two decimals are required.
pub fn parse_german_amount(text: &str) -> Option<i64> {
    let text = text.trim();
    let (whole, frac) = text.split_once(',')?;
    if frac.len() != 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = whole.chars().filter(|c| *c != '.').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let euros: i64 = digits.parse().ok()?;
    let cents: i64 = frac.parse().ok()?;
    euros.checked_mul(100)?.checked_add(cents)
}

/// Format cents as a plain decimal string (`1234.56`).
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// The textual forms an amount commonly takes in mail subjects and bodies.
///
/// Covers the exact amount and the amount rounded to whole euros.
pub fn amount_variants(amount_cents: i64) -> Vec<String> {
    let exact = amount_cents.unsigned_abs();
    let rounded = (exact + 50) / 100 * 100;

    let mut variants = Vec::new();
    for cents in [exact, rounded] {
        let euros = cents / 100;
        let frac = cents % 100;
        let candidates = [
            format!("{euros}.{frac:02}"),
            format!("{euros},{frac:02}"),
            euros.to_string(),
        ];
        for candidate in candidates {
            push_unique(&mut variants, candidate);
        }
        if euros >= 1000 {
            push_unique(&mut variants, format!("{},{frac:02}", group_thousands(euros)));
        }
    }
    variants
}

fn push_unique(variants: &mut Vec<String>, value: String) {
    if !variants.contains(&value) {
        variants.push(value);
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}
