/// Country calling codes the normalizer recognizes when deciding whether a
/// bare number is already international.
const KNOWN_COUNTRY_PREFIXES: &[&str] = &[
    "1", "7", "20", "27", "30", "31", "33", "34", "39", "40", "44", "46", "48", "49", "52", "55",
    "61", "62", "63", "65", "66", "81", "82", "84", "86", "90", "91", "92", "971", "972",
];

const MIN_DIGITS_FOR_PREFIX: usize = 10;

/// Best-effort E.164 normalization.
///
/// Already-prefixed numbers pass through unchanged (separators stripped), a
/// `00` international prefix becomes `+`, and bare numbers long enough to
/// plausibly carry a known country code get a leading `+`. Anything shorter
/// than ten digits is returned as-is.
pub fn normalize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.starts_with('+') {
        return cleaned;
    }

    if let Some(rest) = cleaned.strip_prefix("00") {
        return format!("+{rest}");
    }

    if cleaned.len() > MIN_DIGITS_FOR_PREFIX && has_known_country_prefix(&cleaned) {
        return format!("+{cleaned}");
    }

    if cleaned.len() >= MIN_DIGITS_FOR_PREFIX {
        return format!("+{cleaned}");
    }

    cleaned
}

fn has_known_country_prefix(digits: &str) -> bool {
    KNOWN_COUNTRY_PREFIXES
        .iter()
        .any(|prefix| digits.starts_with(prefix))
}
