//! Domain event model for the ingestion pipeline
//!
//! Raw stream updates are decoded by the transport into these typed
//! payloads before they cross into the core. Everything downstream
//! (queue, registry, bus) works exclusively in terms of this module.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Admission priority for queued events
///
/// Derived `Ord`: `Low < Normal < High < Critical`. Critical events are
/// never shed by the backpressure queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Kind discriminant for domain events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TokenCreated,
    CurveProgress,
    Trade,
    Migration,
}

impl EventKind {
    /// Default admission priority for this kind
    ///
    /// Migration is Critical: losing one breaks exit logic for open
    /// positions. Token creation is High (entry opportunities are
    /// time-sensitive). Trades are Normal. Curve progress is Low: the
    /// updates are frequent and the latest snapshot supersedes earlier
    /// ones, so shedding them under load is safe.
    pub fn default_priority(self) -> Priority {
        match self {
            EventKind::Migration => Priority::Critical,
            EventKind::TokenCreated => Priority::High,
            EventKind::Trade => Priority::Normal,
            EventKind::CurveProgress => Priority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TokenCreated => "token_created",
            EventKind::CurveProgress => "curve_progress",
            EventKind::Trade => "trade",
            EventKind::Migration => "migration",
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Point-in-time bonding curve state
///
/// `progress_pct` is 0-100, distance to the completion threshold after
/// which the token migrates to its post-curve venue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveSnapshot {
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub progress_pct: f64,
    pub complete: bool,
}

/// A new token launched on the tracked program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCreatedEvent {
    pub mint: String,
    pub bonding_curve: String,
    pub creator: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub timestamp: i64,
}

/// Bonding curve account update
///
/// Account updates are keyed by the curve address, not the mint; the
/// registry's secondary index resolves curve -> mint on dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveProgressEvent {
    pub bonding_curve: String,
    pub snapshot: CurveSnapshot,
    pub timestamp: i64,
}

/// A buy or sell against a token's bonding curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub mint: String,
    pub side: TradeSide,
    pub sol_amount: f64,
    pub token_amount: f64,
    pub trader: String,
    pub timestamp: i64,
}

/// Curve completion: the token moves to its post-curve trading venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub mint: String,
    pub pool: Option<String>,
    pub timestamp: i64,
}

/// Decoded, pipeline-internal representation of a raw stream update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    TokenCreated(TokenCreatedEvent),
    CurveProgress(CurveProgressEvent),
    Trade(TradeEvent),
    Migration(MigrationEvent),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::TokenCreated(_) => EventKind::TokenCreated,
            DomainEvent::CurveProgress(_) => EventKind::CurveProgress,
            DomainEvent::Trade(_) => EventKind::Trade,
            DomainEvent::Migration(_) => EventKind::Migration,
        }
    }
}

/// An event held by the backpressure queue
///
/// Immutable once constructed; owned by the queue until dispatched, then
/// handed to the registered processor. `slot` is an observability hint
/// only, never used for ordering.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub kind: EventKind,
    pub event: DomainEvent,
    pub priority: Priority,
    pub enqueued_at: i64,
    pub slot: Option<u64>,
}

/// Helper to get current Unix timestamp in milliseconds
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(EventKind::Migration.default_priority(), Priority::Critical);
        assert_eq!(EventKind::TokenCreated.default_priority(), Priority::High);
        assert_eq!(EventKind::Trade.default_priority(), Priority::Normal);
        assert_eq!(EventKind::CurveProgress.default_priority(), Priority::Low);
    }

    #[test]
    fn test_event_kind_roundtrip() {
        let event = DomainEvent::Migration(MigrationEvent {
            mint: "MintAbc".to_string(),
            pool: None,
            timestamp: 1_700_000_000_000,
        });
        assert_eq!(event.kind(), EventKind::Migration);
        assert_eq!(event.kind().as_str(), "migration");
    }
}
