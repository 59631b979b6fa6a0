use std::time::Duration;

use tracing::info;

/// Default multiplier, in seconds
pub const DEFAULT_MULTIPLIER: u64 = 4;

/// Quadratic delay between retries of a rate-limited request
///
/// Attempt `n` waits `multiplier * n²` seconds, so the first retry is immediate.
#[derive(Debug, Clone)]
pub struct BackoffDelay {
    multiplier: u64,
    count: u64,
}

impl BackoffDelay {
    pub fn new(multiplier: u64) -> Self {
        Self {
            multiplier,
            count: 0,
        }
    }

    /// Delay the next call to [`BackoffDelay::sleep`] will wait for
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.multiplier * self.count * self.count)
    }

    /// Number of completed sleeps since the last reset
    pub fn attempts(&self) -> u64 {
        self.count
    }

    pub async fn sleep(&mut self) {
        let delay = self.delay();
        info!("Sleeping {} seconds", delay.as_secs());
        tokio::time::sleep(delay).await;
        self.count += 1;
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Default for BackoffDelay {
    fn default() -> Self {
        Self::new(DEFAULT_MULTIPLIER)
    }
}
