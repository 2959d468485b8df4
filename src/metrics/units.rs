//! Human size strings as printed by docker, and back.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
pub const MIB: f64 = 1024.0 * 1024.0;

fn multiplier(unit: &str) -> f64 {
    match unit.to_ascii_uppercase().as_str() {
        "KB" | "KIB" => 1024.0,
        "MB" | "MIB" => MIB,
        "GB" | "GIB" => MIB * 1024.0,
        "TB" | "TIB" => MIB * MIB,
        _ => 1.0,
    }
}

/// Parse `12.5MiB`, `1.2 kB`, `648B` into bytes (1024-based, rounded).
///
/// `N/A`, `-`, empty and otherwise unparseable input is 0. A bare number is bytes.
pub fn parse_size(input: &str) -> u64 {
    let s = input.trim();
    let Some(start) = s.find(|c: char| c.is_ascii_digit() || c == '.') else {
        return 0;
    };
    let rest = &s[start..];
    let num_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let Ok(value) = rest[..num_end].parse::<f64>() else {
        return 0;
    };
    let after = rest[num_end..].trim_start();
    let unit_end = after
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(after.len());
    let bytes = (value * multiplier(&after[..unit_end])).round();
    if bytes.is_finite() && bytes > 0.0 {
        bytes as u64
    } else {
        0
    }
}

/// `0 B`, `512 B`, `1.5 KB`, `12 MB`: one decimal below 10, none from 10 up.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    if value >= 10.0 {
        format!("{value:.0} {}", UNITS[idx])
    } else {
        format!("{value:.1} {}", UNITS[idx])
    }
}

/// `12.34%` → 12.34; `--` and junk → 0.
pub fn parse_percent(input: &str) -> f64 {
    input
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MIB
}
