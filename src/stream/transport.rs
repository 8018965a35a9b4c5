//! Transport seam between the protocol client and the ingestion core
//!
//! The actual gRPC/websocket client lives outside this crate; it
//! implements [`StreamTransport`] and delivers pre-decoded updates over
//! a channel. The core never touches wire-level account encodings.

use crate::events::DomainEvent;
use crate::stream::subscription::SubscriptionFilters;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One inbound update from the live subscription
///
/// `slot` is a monotonically increasing hint used for observability
/// only, never for ordering correctness.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Event {
        event: DomainEvent,
        slot: Option<u64>,
    },
    /// Upstream keep-alive; refreshes the liveness stamp, carries no data
    KeepAlive { slot: Option<u64> },
}

#[derive(Debug)]
pub enum TransportError {
    /// Failed to establish the subscription
    Connect(String),
    /// The live stream faulted mid-flight
    Stream(String),
    /// Upstream closed the stream without a shutdown request
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "Connection error: {}", msg),
            TransportError::Stream(msg) => write!(f, "Stream error: {}", msg),
            TransportError::Closed => write!(f, "Stream closed by upstream"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A live subscription handle
///
/// Dropping the session releases the transport side; the producer task
/// observes the closed channel and winds down.
pub struct StreamSession {
    pub updates: mpsc::Receiver<Result<StreamUpdate, TransportError>>,
}

/// Fallible stream source the connection manager drives
///
/// Exactly one session is open at a time; the manager owns reconnect
/// policy, the transport only knows how to open a subscription.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, filters: &SubscriptionFilters) -> Result<StreamSession, TransportError>;
}
