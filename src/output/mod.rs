mod compare;
mod reports;
mod setups;
mod style;
mod summary;

pub use compare::print_comparison;
pub use reports::print_reports;
pub use setups::{SetupRow, print_setups};
pub use style::Style;
pub use summary::print_summary;

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Binary-prefixed size with at most two decimals: `0 B`, `1.5 KB`, `3 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < BYTE_UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text} {}", BYTE_UNITS[unit])
}

pub fn format_duration_ms(ms: f64) -> String {
    if ms < 1000.0 {
        return format!("{ms:.0}ms");
    }

    if ms < 60_000.0 {
        return format!("{:.1}s", ms / 1000.0);
    }

    let minutes = (ms / 60_000.0).floor();
    let seconds = (ms - minutes * 60_000.0) / 1000.0;
    format!("{minutes:.0}m {seconds:.1}s")
}
