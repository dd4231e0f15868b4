//! Result normalization.
//!
//! Two engines may legitimately format the same logical value differently:
//! trailing zeros, infinity spellings, fractional-second precision, `NULL`
//! sentinels. Normalization makes logically-equal values byte-identical
//! without erasing real differences.
//!
//! [`normalize_line`] is pure and idempotent:
//! `normalize_line(normalize_line(x)) == normalize_line(x)` for every input.

/// Decimal places numeric tokens are rounded to.
const NUMERIC_PRECISION: i32 = 3;

/// Fractional-second digits timestamp tokens are forced to.
const TIMESTAMP_FRACTION_DIGITS: usize = 3;

/// Canonicalize one tab-separated output line.
///
/// Each column is normalized independently, then the columns are rejoined
/// with tabs so the column count is preserved.
pub fn normalize_line(line: &str) -> String {
    line.split('\t')
        .map(normalize_token)
        .collect::<Vec<_>>()
        .join("\t")
}

/// Canonicalize a single column value.
pub fn normalize_token(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }

    // Special floating point spellings come before the numeric parse: Rust
    // parses "inf" and "nan" as f64 values, and we want one spelling for all
    // of "inf", "Infinity", "+INF", ...
    let lower = token.to_ascii_lowercase();
    match lower.as_str() {
        "inf" | "infinity" | "+inf" | "+infinity" => return "inf".to_string(),
        "-inf" | "-infinity" => return "-inf".to_string(),
        "nan" | "+nan" | "-nan" => return "nan".to_string(),
        _ => {}
    }

    if let Ok(value) = token.parse::<f64>() {
        return normalize_number(value);
    }

    match lower.as_str() {
        "true" => return "true".to_string(),
        "false" => return "false".to_string(),
        _ => {}
    }

    // NULL sentinels differ between engine CLIs ("NULL" vs "None").
    if lower == "null" || token == "None" {
        return "NULL".to_string();
    }

    if looks_like_timestamp(token) {
        return normalize_timestamp(token);
    }

    token.to_string()
}

fn normalize_number(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let scale = 10f64.powi(NUMERIC_PRECISION);
    let rounded = (value * scale).round() / scale;
    // Magnitudes that overflow the double range collapse to inf after
    // scaling.
    if rounded.is_infinite() {
        return if rounded > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if rounded == 0.0 {
        // fold -0.0 into 0
        return "0".to_string();
    }
    // f64 Display prints the shortest round-tripping form: integral values
    // render without a decimal point, others without trailing zeros.
    format!("{rounded}")
}

/// Timestamp-like tokens contain a `:` and exactly one `.` separating the
/// fractional seconds.
fn looks_like_timestamp(token: &str) -> bool {
    token.contains(':') && token.matches('.').count() == 1
}

/// Truncate or right-pad the fractional-seconds component to millisecond
/// precision, absorbing engine-specific fractional-second defaults.
fn normalize_timestamp(token: &str) -> String {
    let (head, fraction) = match token.split_once('.') {
        Some(parts) => parts,
        None => return token.to_string(),
    };
    let mut fraction: String = fraction.chars().take(TIMESTAMP_FRACTION_DIGITS).collect();
    while fraction.len() < TIMESTAMP_FRACTION_DIGITS {
        fraction.push('0');
    }
    format!("{head}.{fraction}")
}
