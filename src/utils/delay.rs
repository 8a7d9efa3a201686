//! Inter-request delay helpers.

use std::time::Duration;

use rand::Rng;

/// Clean pages in a row before the delay is relaxed.
const RELAX_STREAK: u32 = 5;

/// Sleep for `base` adjusted by up to ±10% random jitter.
pub async fn sleep_with_jitter(base: Duration) {
    let jitter: f64 = rand::rng().random_range(-0.1..=0.1);
    tokio::time::sleep(base.mul_f64((1.0 + jitter).max(0.0))).await;
}

/// Compute the adaptive inter-request delay.
///
/// Every consecutive failure stretches the base delay by 50%; a streak of
/// clean pages relaxes it by 20%. The result never drops below `min`.
pub fn adaptive_delay(
    base: Duration,
    min: Duration,
    consecutive_failures: u32,
    clean_streak: u32,
) -> Duration {
    let delay = if consecutive_failures > 0 {
        base.mul_f64(1.0 + consecutive_failures as f64 * 0.5)
    } else if clean_streak >= RELAX_STREAK {
        base.mul_f64(0.8)
    } else {
        base
    };
    delay.max(min)
}
