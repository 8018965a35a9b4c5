//! Circuit breaker guarding the upstream stream connection
//!
//! Wraps calls to an unreliable resource and stops issuing them once
//! failures exceed a threshold within a rolling window, giving the
//! resource time to recover. One instance per protected connection,
//! owned by the connection manager; never shared across resources.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};

/// Breaker state machine
///
/// `Closed` passes calls through, `Open` refuses them, `HalfOpen` allows
/// limited trial calls after the reset timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker tuning knobs
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window_ms` that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays Open before allowing trial calls
    pub reset_timeout_ms: u64,
    /// Consecutive HalfOpen successes required to close
    pub success_threshold: u32,
    /// Rolling window over which failures are counted
    pub failure_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
            failure_window_ms: 60_000,
        }
    }
}

/// Snapshot of breaker counters, handed to state-change observers
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: BreakerState,
    /// Failures currently inside the rolling window
    pub failure_count: u32,
    /// Successes recorded since entering HalfOpen
    pub success_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Times the breaker has transitioned into Open
    pub times_opened: u64,
    pub last_state_change_ms: i64,
}

/// Observer invoked synchronously on every state transition
pub type StateObserver = Box<dyn Fn(BreakerState, BreakerState, &BreakerStats) + Send + Sync>;

/// Three-state failure isolator
///
/// All methods are synchronous and non-suspending; the owner wraps the
/// breaker in a `Mutex` and keeps critical sections brief. The breaker
/// itself never errors: callers must check `can_execute()` before
/// attempting the protected operation.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    failure_timestamps: VecDeque<i64>,
    success_count: u32,
    total_failures: u64,
    total_successes: u64,
    times_opened: u64,
    last_state_change_ms: i64,
    observers: Vec<StateObserver>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_now_fn(config, Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Create a breaker with a custom clock (deterministic tests)
    pub fn with_now_fn(
        config: CircuitBreakerConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        let now = now_fn();
        Self {
            config,
            state: BreakerState::Closed,
            failure_timestamps: VecDeque::new(),
            success_count: 0,
            total_failures: 0,
            total_successes: 0,
            times_opened: 0,
            last_state_change_ms: now,
            observers: Vec::new(),
            now_fn,
        }
    }

    /// Register a state-change observer, called synchronously with
    /// `(old_state, new_state, stats)`. Observers must not block.
    pub fn on_state_change(&mut self, observer: StateObserver) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state,
            failure_count: self.failure_timestamps.len() as u32,
            success_count: self.success_count,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            times_opened: self.times_opened,
            last_state_change_ms: self.last_state_change_ms,
        }
    }

    /// Whether the protected operation may be attempted right now
    ///
    /// In `Open`, an elapsed reset timeout transitions to `HalfOpen` as a
    /// side effect and the call is allowed through as a trial.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => self.try_half_open(),
        }
    }

    /// Transition `Open -> HalfOpen` once the reset timeout has elapsed
    ///
    /// Driven both by `can_execute()` and by the periodic
    /// [`breaker_reset_task`]; a no-op in any other state, so nothing
    /// needs cancelling when the breaker leaves Open by another path.
    pub fn try_half_open(&mut self) -> bool {
        if self.state != BreakerState::Open {
            return false;
        }
        let now = (self.now_fn)();
        if now - self.last_state_change_ms >= self.config.reset_timeout_ms as i64 {
            self.transition(BreakerState::HalfOpen);
            true
        } else {
            false
        }
    }

    /// Record a successful protected call
    pub fn record_success(&mut self) {
        self.total_successes += 1;
        match self.state {
            BreakerState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition(BreakerState::Closed);
                }
            }
            BreakerState::Closed => {
                // Normal operation reinforces health: forget old failures
                self.failure_timestamps.clear();
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed protected call
    pub fn record_failure(&mut self, reason: &str) {
        self.total_failures += 1;
        match self.state {
            BreakerState::HalfOpen => {
                // Fast-fail on flaky recovery
                log::warn!("⚡ Breaker trial call failed ({}), reopening", reason);
                self.transition(BreakerState::Open);
            }
            BreakerState::Closed => {
                let now = (self.now_fn)();
                self.failure_timestamps.push_back(now);
                self.prune_window(now);
                if self.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    log::warn!(
                        "⚡ Breaker tripped: {} failures within {}ms (last: {})",
                        self.failure_timestamps.len(),
                        self.config.failure_window_ms,
                        reason
                    );
                    self.transition(BreakerState::Open);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn prune_window(&mut self, now: i64) {
        let cutoff = now - self.config.failure_window_ms as i64;
        while matches!(self.failure_timestamps.front(), Some(&ts) if ts < cutoff) {
            self.failure_timestamps.pop_front();
        }
    }

    fn transition(&mut self, new_state: BreakerState) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        self.last_state_change_ms = (self.now_fn)();
        // Both counters reset on every transition
        self.failure_timestamps.clear();
        self.success_count = 0;
        if new_state == BreakerState::Open {
            self.times_opened += 1;
        }
        log::info!(
            "🔌 Circuit breaker: {} -> {}",
            old_state.as_str(),
            new_state.as_str()
        );
        let stats = self.stats();
        for observer in &self.observers {
            observer(old_state, new_state, &stats);
        }
    }
}

/// Periodic task driving the `Open -> HalfOpen` transition
///
/// Runs until aborted. The connection manager also performs the same
/// transition lazily inside `can_execute()`; this task just guarantees
/// the transition happens even when nobody is calling.
pub async fn breaker_reset_task(breaker: Arc<Mutex<CircuitBreaker>>, check_interval_ms: u64) {
    let mut timer = interval(Duration::from_millis(check_interval_ms.max(100)));
    loop {
        timer.tick().await;
        let mut guard = match breaker.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.state() == BreakerState::Open && guard.try_half_open() {
            log::info!("🔌 Breaker reset timer elapsed, allowing trial calls");
        }
    }
}
