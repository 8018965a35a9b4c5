//! curveflow: bonding-curve launch ingestion pipeline
//!
//! Consumes a live stream of launchpad program activity (token
//! creations, bonding-curve trades, curve account updates, migrations)
//! and maintains bounded in-memory token state behind a typed event
//! bus.
//!
//! Data path:
//!
//! ```text
//! transport -> connection manager -> backpressure queue -> dispatch
//!     -> token registry -> event bus -> subscribers
//! ```
//!
//! Resilience: a circuit breaker gates (re)connects, the queue sheds
//! low-priority load under pressure while never dropping migrations,
//! and the registry is capacity-bounded with TTL expiry.
//!
//! The wire protocol lives outside this crate; anything implementing
//! [`stream::StreamTransport`] can feed the pipeline.

pub mod breaker;
pub mod bus;
pub mod config;
pub mod events;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod stream;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use bus::{EventBus, PipelineEvent, Topic};
pub use config::IngestConfig;
pub use events::{
    CurveProgressEvent, CurveSnapshot, DomainEvent, EventKind, MigrationEvent, Priority,
    QueuedEvent, TokenCreatedEvent, TradeEvent, TradeSide,
};
pub use queue::{BackpressureQueue, BackpressureQueueConfig, QueueStats};
pub use registry::{TokenPatch, TokenRegistry, TokenRegistryConfig, TrackedToken};
pub use runtime::{IngestPipeline, PipelineError};
pub use stream::{
    ConnectionConfig, ConnectionState, StreamConnectionManager, StreamTransport, StreamUpdate,
};
