use tokio::time::{sleep, Duration};

/// Capped exponential backoff for the DBOS RPC transport (spec.md §7:
/// transient RPC failure is retried with capped exponential backoff, at
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig { max_retries: 3, base_delay_ms: 100, max_delay_ms: 300, exponential_base: 2.0 };
        assert_eq!(config.delay_for_attempt(0).as_millis(), 0);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 100);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 200);
        assert_eq!(config.delay_for_attempt(3).as_millis(), 300, "capped at max_delay_ms");
    }
}
