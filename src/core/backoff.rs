use std::time::Duration;

use rand::Rng;

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First retry delay
    pub initial_delay: Duration,
    /// Ceiling for the doubled delay and for long-term retries
    pub max_delay: Duration,
    /// Attempts per incident before falling back to long-term retries
    pub attempts_per_incident: u32,
    /// Fractional jitter applied to every delay (0.0 disables)
    pub jitter_factor: f32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            attempts_per_incident: 3,
            jitter_factor: 0.1,
        }
    }
}

/// Computes exponential reconnect delays: 2s, 4s, 8s, ... capped at
/// `max_delay`. Past `attempts_per_incident` the schedule stays pinned at
/// the cap for long-term retries.
#[derive(Debug, Clone)]
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Delay before retry `attempt` (0-based).
    pub fn delay_for_attempt(config: &BackoffConfig, attempt: u32) -> Duration {
        let base = if attempt >= config.attempts_per_incident {
            config.max_delay
        } else {
            let doubled = config
                .initial_delay
                .as_millis()
                .saturating_mul(1u128 << attempt.min(30));
            Duration::from_millis(doubled.min(config.max_delay.as_millis()) as u64)
        };

        Self::apply_jitter(base, config.jitter_factor)
    }

    fn apply_jitter(delay: Duration, jitter_factor: f32) -> Duration {
        let jitter = jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let mut rng = rand::rng();
        let scale: f32 = rng.random_range(-jitter..=jitter);
        let delay_ms = delay.as_millis() as f32;
        let adjusted = (delay_ms + delay_ms * scale).max(0.0);
        Duration::from_millis(adjusted as u64)
    }
}
