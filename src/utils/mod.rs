//! Utility functions for backup runs

/// Human readable sizes and durations
pub mod format {
    use std::time::Duration;

    const BYTE_UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

    /// Size reported by `du -s`, in decimal steps of 1000
    pub fn format_kilobytes(kilobytes: u64) -> String {
        if kilobytes > 1_000_000 {
            format!("{} GB", round_tenths(kilobytes as f64 / 1_000_000.0))
        } else if kilobytes > 1000 {
            format!("{} MB", round_tenths(kilobytes as f64 / 1000.0))
        } else {
            format!("{} KB", kilobytes)
        }
    }

    /// File size in binary steps of 1024, two decimals with trailing zeros trimmed
    pub fn format_bytes(bytes: u64) -> String {
        if bytes == 0 {
            return "0 Bytes".to_string();
        }

        let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
        let exponent = exponent.min(BYTE_UNITS.len() - 1);
        let value = bytes as f64 / 1024f64.powi(exponent as i32);

        let rounded = format!("{:.2}", value);
        let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
        format!("{} {}", trimmed, BYTE_UNITS[exponent])
    }

    /// Elapsed time in seconds with one decimal
    pub fn format_elapsed(elapsed: Duration) -> String {
        format!("{}s", round_tenths(elapsed.as_secs_f64()))
    }

    fn round_tenths(value: f64) -> f64 {
        (value * 10.0).round() / 10.0
    }

}
