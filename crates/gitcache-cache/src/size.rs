use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("invalid size `{0}` (expected e.g. `500MB`, `2GB`)")]
    Invalid(String),
}

const UNITS: &[(&str, u64)] = &[
    // Longest suffixes first so `KB` is not read as `B`.
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("B", 1),
];

/// Parse a human size like `500MB` into bytes. Units use powers of 1024 and
/// are case-insensitive; a bare number means bytes.
pub fn parse_size(value: &str) -> Result<u64, SizeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Invalid(value.to_string()));
    }

    let upper = trimmed.to_uppercase();
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|number| (number.trim(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1));

    let number: f64 = number
        .parse()
        .map_err(|_| SizeError::Invalid(value.to_string()))?;
    if number < 0.0 || !number.is_finite() {
        return Err(SizeError::Invalid(value.to_string()));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((number * multiplier as f64) as u64)
}

/// Render a byte count with the largest unit that keeps it readable.
pub fn format_size(bytes: u64) -> String {
    for (suffix, multiplier) in UNITS {
        if *multiplier > 1 && bytes >= *multiplier {
            #[allow(clippy::cast_precision_loss)]
            return format!("{:.1}{suffix}", bytes as f64 / *multiplier as f64);
        }
    }
    format!("{bytes}B")
}
