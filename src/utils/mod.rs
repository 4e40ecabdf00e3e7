//! Utility functions and helpers.

pub mod fs;
pub mod log;
pub mod redact;
pub mod url;

use std::time::Duration;

/// Convert fractional seconds from config into a `Duration`, clamping negatives to zero.
pub fn secs_f64(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// Keep only ASCII digits and parse them, e.g. `"1 204 просмотра"` → 1204.
pub fn parse_digits(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Sleep unless the duration is zero.
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
