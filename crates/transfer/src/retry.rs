use std::time::Duration;

/// Backoff schedule for transient transfer failures.
///
/// Retry `n` (1-based) waits `delays[n - 1]`; once the list runs out the last
/// delay repeats. With `max_attempts == None` retries never stop on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::ZERO,
                Duration::from_secs(3),
                Duration::from_secs(10),
            ],
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether retry `attempt` exceeds the configured cap.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}
