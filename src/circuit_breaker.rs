use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Availability gate for the embedding backend.
///
/// While the circuit is open the provider skips the HTTP call entirely and
/// serves deterministic mock vectors, so a sustained outage costs nothing
/// per request. After `retry_after` the circuit half-opens and lets probe
/// requests through until `success_threshold` consecutive successes close
/// it again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through to the backend.
    Closed,
    /// Backend is skipped; mock mode.
    Open,
    /// Probe requests allowed to test recovery.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window before the circuit opens.
    pub failure_threshold: u32,
    /// Successes in half-open before the circuit closes.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing again.
    pub retry_after: Duration,
    /// Failure-counting window.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            retry_after: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    window_start: Instant,
    last_state_change: Instant,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                window_start: Instant::now(),
                last_state_change: Instant::now(),
            })),
        }
    }

    /// Whether a backend call should be attempted right now.
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.last_state_change.elapsed() >= self.config.retry_after {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_state_change = Instant::now();
                    info!("Embedding circuit half-open, probing backend");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                if inner.window_start.elapsed() >= self.config.window {
                    inner.window_start = Instant::now();
                    inner.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.last_state_change = Instant::now();
                    info!("Embedding circuit closed, backend recovered");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                if inner.window_start.elapsed() >= self.config.window {
                    inner.window_start = Instant::now();
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_state_change = Instant::now();
                    warn!(
                        "Embedding circuit opened after {} failures, serving mock vectors",
                        inner.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.failure_count = 0;
                inner.last_state_change = Instant::now();
                warn!("Embedding circuit reopened, backend still failing");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}
