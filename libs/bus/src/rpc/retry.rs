use tokio::time::{sleep, Duration};

/// Capped exponential backoff for the bus RPC transport (spec.md §7: a
/// transient RPC/bus failure is retried with capped exponential backoff, at
/// least 3 attempts, before being surfaced).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 50, max_delay_ms: 2_000, exponential_base: 2.0 }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let delay = self.base_delay_ms as f64 * self.exponential_base.powi(attempt as i32 - 1);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    pub async fn wait(&self, attempt: u32) {
        sleep(self.delay_for_attempt(attempt)).await;
    }
}
