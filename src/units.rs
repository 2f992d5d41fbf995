//! Human-friendly byte sizes and durations for configuration and logs.

use std::time::Duration;

const UNITS: [(&str, u64); 7] = [
    ("EB", 1 << 60),
    ("PB", 1 << 50),
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("B", 1),
];

/// Largest size accepted anywhere in the configuration.
pub const MAX_BYTE_SIZE: u64 = 1 << 60;

/// Parse sizes such as `512`, `64KB`, `1.5MB` or `1GB` (1024-based).
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let split = upper
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(split);
    let unit = unit.trim();
    let multiplier = if unit.is_empty() {
        1
    } else {
        UNITS
            .iter()
            .find(|(name, _)| *name == unit || name.trim_end_matches('B') == unit)
            .map(|(_, m)| *m)
            .ok_or_else(|| format!("unknown size unit in `{trimmed}`"))?
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size `{trimmed}`"))?;
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > MAX_BYTE_SIZE as f64 {
        return Err(format!("size `{trimmed}` is out of range (max 1EB)"));
    }
    Ok(bytes as u64)
}

/// Render a byte count with the largest fitting unit, e.g. `1.50MB`.
pub fn format_bytes(bytes: u64) -> String {
    for (name, size) in UNITS {
        if bytes >= size && size > 1 {
            return format!("{:.2}{}", bytes as f64 / size as f64, name);
        }
    }
    format!("{bytes}B")
}

/// Parse durations such as `90s`, `30m`, `24h`, `7d`, `1h30m` or `0`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration `{trimmed}`: {err}"))
}

/// Render a duration compactly, e.g. `1h 30m` or `0s`.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}
