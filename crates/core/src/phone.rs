//! Phone canonicalisation shared by every reader and writer of phone columns.
//!
//! The same physical number must reduce to the same 10-digit key whatever the
//! source formatting: spreadsheet formula escapes (`=+1…`), a `+1` prefix,
//! punctuation or spacing.

const TOLL_FREE_PREFIXES: [&str; 7] = ["800", "833", "844", "855", "866", "877", "888"];

/// Drop a formula escape left behind by spreadsheet exports.
fn strip_formula_prefix(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("=+")
        .or_else(|| trimmed.strip_prefix('='))
        .unwrap_or(trimmed)
}

fn digits_of(raw: &str) -> String {
    strip_formula_prefix(raw)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

/// Canonical 10-digit key, or `""` when the input cannot be reduced to one.
pub fn to_ten_digit_key(raw: &str) -> String {
    let mut d = digits_of(raw);
    if d.len() == 11 && d.starts_with('1') {
        d.remove(0);
    }
    if d.len() > 10 {
        d = d[d.len() - 10..].to_string();
    }
    if d.len() == 10 { d } else { String::new() }
}

/// Run of five or more identical consecutive digits.
fn has_repeated_run(digits: &str) -> bool {
    let bytes = digits.as_bytes();
    let mut run = 1;
    for w in bytes.windows(2) {
        if w[0] == w[1] {
            run += 1;
            if run >= 5 {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}

/// Whether a number is worth calling: valid NANP shape, not toll-free,
/// no long repeated-digit run.
pub fn is_dialable(raw: &str) -> bool {
    let key = to_ten_digit_key(raw);
    if key.is_empty() {
        return false;
    }
    if has_repeated_run(&key) {
        return false;
    }
    let bytes = key.as_bytes();
    // Area code and exchange may not start with 0 or 1.
    if matches!(bytes[0], b'0' | b'1') || matches!(bytes[3], b'0' | b'1') {
        return false;
    }
    !TOLL_FREE_PREFIXES.contains(&&key[..3])
}

/// E.164 form for dialing, or `""` when not dialable.
///
/// 10-digit US numbers get `+1`; 11–15 digit numbers that are not a US
/// number with a leading country code are passed through as `+<digits>`.
pub fn to_e164(raw: &str) -> String {
    let d = digits_of(raw);
    if d.len() == 10 || (d.len() == 11 && d.starts_with('1')) {
        if !is_dialable(&d) {
            return String::new();
        }
        return format!("+1{}", to_ten_digit_key(&d));
    }
    if (11..=15).contains(&d.len()) && !has_repeated_run(&d) {
        return format!("+{d}");
    }
    String::new()
}
