//! Stream connection lifecycle manager
//!
//! Owns the single live subscription: breaker-gated connects, the
//! inbound consumption loop feeding the backpressure queue, jittered
//! exponential-backoff reconnects, and cooperative shutdown with a
//! bounded queue drain.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::bus::{EventBus, PipelineEvent};
use crate::events::current_timestamp_ms;
use crate::queue::BackpressureQueue;
use crate::stream::subscription::SubscriptionFilters;
use crate::stream::transport::{StreamSession, StreamTransport, StreamUpdate, TransportError};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};

/// Connection and reconnect tuning knobs
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Expected upstream keep-alive cadence; staleness warns at 3x this
    pub ping_interval_ms: u64,
    /// Bound on the shutdown queue drain
    pub drain_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            ping_interval_ms: 30_000,
            drain_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

#[derive(Debug)]
pub enum ConnectError {
    /// The circuit breaker is refusing calls; no network I/O attempted
    BreakerOpen,
    Transport(TransportError),
    ShuttingDown,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::BreakerOpen => write!(f, "Circuit breaker is open"),
            ConnectError::Transport(e) => write!(f, "Transport error: {}", e),
            ConnectError::ShuttingDown => write!(f, "Shutdown requested"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Maintains exactly one live subscription to the upstream source
pub struct StreamConnectionManager {
    config: ConnectionConfig,
    transport: Arc<dyn StreamTransport>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    queue: Arc<BackpressureQueue>,
    bus: Arc<EventBus>,
    state: Mutex<ConnectionState>,
    filters: Mutex<Option<SubscriptionFilters>>,
    shutdown: AtomicBool,
    reconnect_attempts: AtomicU32,
    last_inbound_ms: AtomicI64,
    consume_handle: Mutex<Option<JoinHandle<()>>>,
    liveness_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn StreamTransport>,
        breaker: Arc<Mutex<CircuitBreaker>>,
        queue: Arc<BackpressureQueue>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            transport,
            breaker,
            queue,
            bus,
            state: Mutex::new(ConnectionState::Disconnected),
            filters: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            last_inbound_ms: AtomicI64::new(0),
            consume_handle: Mutex::new(None),
            liveness_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Establish the subscription and start consuming it
    ///
    /// Fails fast with `BreakerOpen` before any network I/O when the
    /// breaker refuses calls; the caller's retry logic owns that
    /// condition. A transport failure here runs the normal fault path
    /// (breaker accounting, lifecycle events, scheduled reconnect) and
    /// is also returned.
    pub async fn connect(
        self: &Arc<Self>,
        filters: SubscriptionFilters,
    ) -> Result<(), ConnectError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ConnectError::ShuttingDown);
        }
        {
            let mut breaker = lock(&self.breaker);
            if !breaker.can_execute() {
                log::warn!("🚫 Connect refused: circuit breaker is open");
                return Err(ConnectError::BreakerOpen);
            }
        }

        *lock(&self.filters) = Some(filters.clone());
        self.set_state(ConnectionState::Connecting);
        log::info!("🔌 Opening stream subscription...");

        match self.transport.open(&filters).await {
            Ok(session) => {
                lock(&self.breaker).record_success();
                let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
                self.last_inbound_ms
                    .store(current_timestamp_ms(), Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                log::info!("✅ Connected to stream (reconnect attempts: {})", attempts);
                self.bus.emit(&PipelineEvent::StreamConnected {
                    reconnect_attempts: attempts,
                });
                self.reconnect_attempts.store(0, Ordering::SeqCst);

                let manager = self.clone();
                let handle = tokio::spawn(async move {
                    manager.consume_loop(session).await;
                });
                if let Some(previous) = lock(&self.consume_handle).replace(handle) {
                    previous.abort();
                }
                self.ensure_liveness_task();
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.on_stream_fault(reason);
                Err(ConnectError::Transport(e))
            }
        }
    }

    /// Inbound consumption loop; decode, stamp liveness, enqueue
    async fn consume_loop(self: Arc<Self>, mut session: StreamSession) {
        loop {
            // Cooperative cancellation point, checked every iteration
            if self.shutdown.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            match session.updates.recv().await {
                Some(Ok(update)) => {
                    self.last_inbound_ms
                        .store(current_timestamp_ms(), Ordering::SeqCst);
                    match update {
                        StreamUpdate::Event { event, slot } => {
                            log::debug!(
                                "📥 {} update (slot: {:?})",
                                event.kind().as_str(),
                                slot
                            );
                            // Shedding is accounted inside the queue
                            self.queue.enqueue(event, None, slot);
                        }
                        StreamUpdate::KeepAlive { .. } => {}
                    }
                }
                Some(Err(e)) => {
                    self.on_stream_fault(e.to_string());
                    return;
                }
                None => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        self.set_state(ConnectionState::Disconnected);
                    } else {
                        self.on_stream_fault(TransportError::Closed.to_string());
                    }
                    return;
                }
            }
        }
    }

    /// Fault path: breaker accounting, lifecycle events, reconnect
    fn on_stream_fault(self: &Arc<Self>, reason: String) {
        lock(&self.breaker).record_failure(&reason);
        self.set_state(ConnectionState::Error);

        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        let breaker_open = lock(&self.breaker).state() == BreakerState::Open;
        let will_reconnect = !self.shutdown.load(Ordering::SeqCst)
            && attempts < self.config.max_reconnect_attempts
            && !breaker_open;

        log::error!("❌ Stream fault: {} (will_reconnect: {})", reason, will_reconnect);
        self.bus
            .emit(&PipelineEvent::StreamDisconnected { will_reconnect });
        self.bus.emit(&PipelineEvent::StreamError { message: reason });

        if will_reconnect {
            self.schedule_reconnect();
        } else if breaker_open {
            log::warn!("🚫 Breaker open, stream stays down until it recovers");
        } else if attempts >= self.config.max_reconnect_attempts {
            log::error!(
                "❌ Reconnect attempts exhausted ({} of {})",
                attempts,
                self.config.max_reconnect_attempts
            );
        }
    }

    /// Schedule one reconnect attempt with capped exponential backoff
    ///
    /// Delay = min(base * 2^(attempts-1), max) plus up to 30% jitter,
    /// recomputed each attempt. The attempt counter increments before
    /// the attempt is scheduled.
    fn schedule_reconnect(self: &Arc<Self>) {
        let attempts = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let exp = self
            .config
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << (attempts - 1).min(16));
        let delay = exp.min(self.config.reconnect_max_delay_ms);
        let jitter = (delay as f64 * rand::thread_rng().gen_range(0.0..0.3)) as u64;
        let total = Duration::from_millis(delay + jitter);

        log::warn!(
            "⏳ Reconnect attempt {} of {} in {}ms",
            attempts,
            self.config.max_reconnect_attempts,
            total.as_millis()
        );

        let manager = self.clone();
        tokio::spawn(async move {
            sleep(total).await;
            if manager.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let filters = lock(&manager.filters).clone();
            let Some(filters) = filters else {
                log::error!("❌ Reconnect scheduled without subscription filters");
                return;
            };
            match manager.connect(filters).await {
                Ok(()) => {}
                Err(ConnectError::BreakerOpen) => {
                    // Degraded service: no further attempts until the
                    // breaker recovers (spec'd reconnect condition)
                    log::warn!("🚫 Reconnect abandoned, breaker open");
                }
                Err(e) => {
                    // Transport failure already ran the fault path and
                    // scheduled the next attempt if allowed
                    log::debug!("Reconnect attempt failed: {}", e);
                }
            }
        });
    }

    fn ensure_liveness_task(self: &Arc<Self>) {
        let mut guard = lock(&self.liveness_handle);
        if guard.is_some() {
            return;
        }
        let manager = self.clone();
        *guard = Some(tokio::spawn(async move {
            manager.liveness_loop().await;
        }));
    }

    /// Staleness watchdog: warns when no inbound message has arrived for
    /// 3x the expected keep-alive interval. Never forces a reconnect;
    /// upstream keep-alives cover true liveness.
    async fn liveness_loop(self: Arc<Self>) {
        let ping_ms = self.config.ping_interval_ms.max(1_000);
        let mut timer = interval(Duration::from_millis(ping_ms));
        loop {
            timer.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if self.state() != ConnectionState::Connected {
                continue;
            }
            let idle_ms = current_timestamp_ms() - self.last_inbound_ms.load(Ordering::SeqCst);
            if idle_ms > (3 * ping_ms) as i64 {
                log::warn!(
                    "⚠️  Stream stale: no inbound message for {}ms (expected every {}ms)",
                    idle_ms,
                    ping_ms
                );
            }
        }
    }

    /// Idempotent shutdown: cancel tasks, drain the queue, release state
    ///
    /// Safe to call from any state. Pending reconnect sleeps observe the
    /// shutdown flag when they wake and do nothing.
    pub async fn disconnect(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("🔄 Disconnecting stream...");

        if let Some(handle) = lock(&self.consume_handle).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.liveness_handle).take() {
            handle.abort();
        }

        self.queue
            .drain(Duration::from_millis(self.config.drain_timeout_ms))
            .await;

        self.set_state(ConnectionState::Disconnected);
        self.bus.emit(&PipelineEvent::StreamDisconnected {
            will_reconnect: false,
        });
        log::info!("✅ Stream disconnected");
    }

    fn set_state(&self, new_state: ConnectionState) {
        let mut state = lock(&self.state);
        if *state != new_state {
            log::debug!("Stream state: {} -> {}", state.as_str(), new_state.as_str());
            *state = new_state;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
