use std::time::Duration;

/// Capped exponential backoff shared by model loading and stream reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms: base_ms.max(1),
            max_ms: max_ms.max(base_ms.max(1)),
        }
    }

    /// Delay before retry number `attempt` (0-based). Never exceeds `max_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_ms as f64;
        let max = self.max_ms as f64;
        let exp = attempt.min(30) as i32;
        let without_jitter = (base * 2f64.powi(exp)).min(max);
        let jitter_factor = 0.9 + (attempt as f64 % 3.0) * 0.05;
        Duration::from_millis((without_jitter * jitter_factor).min(max) as u64)
    }
}
