use log::trace;
use tokio::time::{sleep, Duration, Instant};

/// Paces writes so that the average output rate matches a target bitrate.
///
/// This is an average-rate limiter with a fixed head start: the burst
/// allowance is subtracted from every computed delay, so the first
/// `burst_ms` milliseconds worth of data go out unthrottled and the credit
/// is never refilled.
#[derive(Debug, Clone)]
pub struct RateThrottle {
    byte_rate: u64,
    burst_ms: i64,
    written: u64,
    started_at: Option<Instant>,
}

impl RateThrottle {
    /// Create a throttle for `kbps` with `burst_ms` milliseconds of grace.
    ///
    /// The byte rate is `(kbps / 8) * 1024` with integer division first, so
    /// 100 kbps paces at 12288 bytes per second rather than 12800.
    pub fn new(kbps: u32, burst_ms: u64) -> Self {
        Self {
            byte_rate: u64::from(kbps / 8) * 1024,
            burst_ms: burst_ms.min(i64::MAX as u64) as i64,
            written: 0,
            started_at: None,
        }
    }

    /// Bytes per second this throttle paces to.
    pub fn byte_rate(&self) -> u64 {
        self.byte_rate
    }

    /// Total bytes accounted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Account for `count` more bytes at time `now` and return the signed
    /// delay in milliseconds the caller should wait.
    ///
    /// The target elapsed time is counted in whole seconds of data
    /// (`written / byte_rate`, truncated) before scaling to milliseconds.
    pub fn delay_at(&mut self, count: usize, now: Instant) -> i64 {
        self.written = self.written.saturating_add(count as u64);
        let start = *self.started_at.get_or_insert(now);

        // Below 8 kbps the byte rate rounds to zero; nothing sensible to pace to.
        if self.byte_rate == 0 {
            return 0;
        }

        let target_ms = (self.written / self.byte_rate) as i64 * 1000;
        let actual_ms = now.saturating_duration_since(start).as_millis() as i64;

        target_ms - actual_ms - self.burst_ms
    }

    /// Account for `count` bytes and sleep until they are due.
    ///
    /// Returns the time actually slept, zero when the stream is behind schedule.
    pub async fn throttle(&mut self, count: usize) -> Duration {
        let delay = self.delay_at(count, Instant::now());
        if delay <= 0 {
            return Duration::ZERO;
        }

        let delay = Duration::from_millis(delay as u64);
        trace!(
            "Throttling {} bytes (total {}) for {:?}",
            count,
            self.written,
            delay
        );
        sleep(delay).await;
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_rate_uses_integer_division() {
        assert_eq!(RateThrottle::new(128, 0).byte_rate(), 16384);
        assert_eq!(RateThrottle::new(100, 0).byte_rate(), 12288);
        assert_eq!(RateThrottle::new(7, 0).byte_rate(), 0);
    }

    #[test]
    fn test_delay_accumulates_whole_seconds() {
        let mut throttle = RateThrottle::new(128, 0);
        let t0 = Instant::now();

        assert_eq!(throttle.delay_at(16384, t0), 1000);
        assert_eq!(throttle.delay_at(16384, t0 + Duration::from_millis(1000)), 1000);
        assert_eq!(throttle.written(), 32768);
    }

    #[test]
    fn test_partial_second_is_not_delayed() {
        let mut throttle = RateThrottle::new(128, 0);
        let t0 = Instant::now();

        assert_eq!(throttle.delay_at(16383, t0), 0);
        assert!(throttle.delay_at(0, t0 + Duration::from_millis(10)) < 0);
    }

    #[test]
    fn test_burst_is_subtracted_from_every_delay() {
        let mut throttle = RateThrottle::new(128, 1500);
        let t0 = Instant::now();

        assert_eq!(throttle.delay_at(16384, t0), -500);
        assert_eq!(throttle.delay_at(16384, t0), 500);
    }

    #[test]
    fn test_zero_byte_rate_never_delays() {
        let mut throttle = RateThrottle::new(4, 0);
        assert_eq!(throttle.delay_at(1_000_000, Instant::now()), 0);
    }

    #[tokio::test]
    async fn test_throttle_sleeps_for_data_ahead_of_schedule() {
        let mut throttle = RateThrottle::new(8, 0);
        let start = std::time::Instant::now();

        let slept = throttle.throttle(1024).await;

        assert_eq!(slept, Duration::from_millis(1000));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_throttle_returns_immediately_within_burst() {
        let mut throttle = RateThrottle::new(8, 5000);
        let slept = throttle.throttle(2048).await;
        assert_eq!(slept, Duration::ZERO);
    }
}
