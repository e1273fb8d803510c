//! Progress accounting and event rate limiting

use std::time::Duration;
use tokio::time::Instant;

/// At most four progress events per second per job
pub const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(250);

/// Whole-percent progress, 0 while the total is unknown.
pub fn percent(current_bytes: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 0;
    }
    let pct = (current_bytes.min(total_bytes) as u128 * 100) / total_bytes as u128;
    pct as u8
}

/// Decides which progress samples of a single transfer are forwarded.
///
/// The first sample always passes, later ones only after `interval` has elapsed.
/// The final sample is forwarded by the caller regardless of the throttle.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(PROGRESS_EMIT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(50, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(10, 3), 100);
        assert_eq!(percent(u64::MAX / 2, u64::MAX), 49);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_limits_rate() {
        let mut throttle = ProgressThrottle::default();
        let start = Instant::now();

        assert!(throttle.should_emit(start));
        assert!(!throttle.should_emit(start + Duration::from_millis(100)));
        assert!(!throttle.should_emit(start + Duration::from_millis(249)));
        assert!(throttle.should_emit(start + Duration::from_millis(250)));
        assert!(!throttle.should_emit(start + Duration::from_millis(400)));

        let emitted = (0..1000)
            .filter(|ms| throttle.should_emit(start + Duration::from_millis(250 + ms)))
            .count();
        assert!(emitted <= 4);
    }
}
