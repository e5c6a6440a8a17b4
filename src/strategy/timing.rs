//! Loop Timing
//!
//! Strategy loops never fire on a fixed beat; every delay is the base
//! interval plus or minus a uniform jitter. Failed cycles come back
//! after a stretched, still-jittered backoff.

use rand::Rng;
use tokio::time::Duration;

/// Multiplier applied to the base interval after a failed cycle.
pub const ERROR_BACKOFF_FACTOR: u32 = 5;

/// `base × (1 ± jitter_pct/100)`, uniformly distributed.
pub fn jittered(base: Duration, jitter_pct: u8) -> Duration {
    if jitter_pct == 0 {
        return base;
    }
    let base_ms = base.as_millis() as u64;
    let spread = base_ms * u64::from(jitter_pct) / 100;
    let low = base_ms.saturating_sub(spread);
    let high = base_ms + spread;
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

/// Delay after an errored cycle: longer than the regular interval but
/// still jittered so crashed strategies do not resynchronize.
pub fn error_backoff(base: Duration, jitter_pct: u8) -> Duration {
    jittered(base * ERROR_BACKOFF_FACTOR, jitter_pct)
}
