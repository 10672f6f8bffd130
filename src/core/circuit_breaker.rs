use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use tracing::info;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Errors per minute a backend may sustain before throttling kicks in.
    /// The circuit opens once more than `2 * max_errors_per_minute` errors
    /// are recorded inside the sliding window.
    pub max_errors_per_minute: u32,
    /// Duration to hold the circuit open before probing again
    pub open_duration: Duration,
    /// Width of the error-counting window
    pub window_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_errors_per_minute: 5,
            open_duration: Duration::from_secs(30),
            window_duration: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    fn trip_threshold(&self) -> u32 {
        self.max_errors_per_minute.saturating_mul(2)
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests are allowed
    Closed,
    /// Circuit is open - requests are rejected
    Open,
    /// Testing if the backend has recovered - limited requests allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Per-backend circuit breaker with a sliding error window.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitState>>,
    window_errors: Arc<AtomicU32>,
    window_start: Arc<RwLock<Instant>>,
    total_failures: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    last_state_change: Arc<RwLock<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            window_errors: Arc::new(AtomicU32::new(0)),
            window_start: Arc::new(RwLock::new(Instant::now())),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            last_state_change: Arc::new(RwLock::new(Instant::now())),
            config,
        }
    }

    /// Check if a request (or reconnect attempt) may proceed.
    pub fn can_execute(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    /// Current state; an expired open period flips to half-open.
    pub fn state(&self) -> CircuitState {
        let current = *self.state.read();
        if current == CircuitState::Open {
            let last_change = *self.last_state_change.read();
            if last_change.elapsed() >= self.config.open_duration {
                self.transition_to(CircuitState::HalfOpen);
                return CircuitState::HalfOpen;
            }
        }
        current
    }

    pub fn record_outcome(&self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    /// Record a successful request. Success resets the window and closes the
    /// circuit from half-open.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.window_errors.store(0, Ordering::Release);
        *self.window_start.write() = Instant::now();

        if *self.state.read() != CircuitState::Closed {
            self.transition_to(CircuitState::Closed);
        }
    }

    /// Record a failed request against the sliding window.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        {
            let mut start = self.window_start.write();
            if start.elapsed() >= self.config.window_duration {
                *start = Instant::now();
                self.window_errors.store(0, Ordering::Release);
            }
        }
        let errors = self.window_errors.fetch_add(1, Ordering::AcqRel) + 1;

        let current = *self.state.read();
        match current {
            CircuitState::Closed => {
                if errors > self.config.trip_threshold() {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write();
        let old_state = *state;

        if old_state != new_state {
            *state = new_state;
            *self.last_state_change.write() = Instant::now();

            if new_state == CircuitState::Closed {
                self.window_errors.store(0, Ordering::Release);
            }

            info!(
                "Circuit breaker state transition: {} -> {}",
                old_state, new_state
            );
        }
    }

    /// Errors recorded in the current window.
    pub fn window_error_count(&self) -> u32 {
        self.window_errors.load(Ordering::Acquire)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Remaining throttle time while the circuit is open.
    pub fn open_remaining(&self) -> Option<Duration> {
        if *self.state.read() == CircuitState::Open {
            self.config
                .open_duration
                .checked_sub(self.last_state_change.read().elapsed())
        } else {
            None
        }
    }

    pub fn reset(&self) {
        self.transition_to(CircuitState::Closed);
        self.window_errors.store(0, Ordering::Release);
        *self.window_start.write() = Instant::now();
    }
}

impl Clone for CircuitBreaker {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            window_errors: Arc::clone(&self.window_errors),
            window_start: Arc::clone(&self.window_start),
            total_failures: Arc::clone(&self.total_failures),
            total_successes: Arc::clone(&self.total_successes),
            last_state_change: Arc::clone(&self.last_state_change),
            config: self.config.clone(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
