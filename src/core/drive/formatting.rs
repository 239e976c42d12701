//! Human-readable byte counts and durations.
//!
//! Pure helpers shared by progress messages and the Discord formatter.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Formats a byte count with binary prefixes, e.g. `1.5 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size > 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{} {}", round2(size), UNITS[unit])
}

/// Same as [`human_bytes`] for fractional values such as speeds.
pub fn human_rate(bytes_per_second: f64) -> String {
    let mut size = bytes_per_second.max(0.0);
    let mut unit = 0;
    while size > 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{} {}/s", round2(size), UNITS[unit])
}

/// Formats whole seconds as `1d, 2h, 3m, 4s`, skipping empty leading parts.
pub fn human_duration(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(", ")
}

/// Parses sizes such as `12M`, `1.5 GB` or `800K` (binary multiples).
///
/// Used for the size label on Drive's confirmation page.
pub fn parse_human_bytes(raw: &str) -> Option<u64> {
    let cleaned = raw.trim().trim_matches(|c| c == '(' || c == ')').to_ascii_uppercase();
    let split_at = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split_at);
    let value: f64 = number.parse().ok()?;

    let multiplier: u64 = match unit.trim().trim_end_matches("IB").trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return None,
    };
    Some((value * multiplier as f64).round() as u64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
