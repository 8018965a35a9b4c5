//! Typed publish/subscribe surface for pipeline consumers
//!
//! Downstream analyzers register handlers per topic; dispatch is
//! synchronous and handler errors are logged by the bus, never
//! propagated back into the pipeline.

use crate::events::{CurveProgressEvent, MigrationEvent, TokenCreatedEvent, TradeEvent};
use std::collections::HashMap;
use std::sync::RwLock;

/// Everything the pipeline publishes: domain events plus connection
/// lifecycle notifications.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    TokenLaunched(TokenCreatedEvent),
    BondingProgress(CurveProgressEvent),
    TokenTrade(TradeEvent),
    TokenMigration(MigrationEvent),
    StreamConnected { reconnect_attempts: u32 },
    StreamDisconnected { will_reconnect: bool },
    StreamError { message: String },
}

/// Topic discriminant for subscription routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TokenLaunched,
    BondingProgress,
    TokenTrade,
    TokenMigration,
    StreamConnected,
    StreamDisconnected,
    StreamError,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::TokenLaunched => "token:launched",
            Topic::BondingProgress => "bonding:progress",
            Topic::TokenTrade => "token:trade",
            Topic::TokenMigration => "token:migration",
            Topic::StreamConnected => "stream:connected",
            Topic::StreamDisconnected => "stream:disconnected",
            Topic::StreamError => "stream:error",
        }
    }
}

impl PipelineEvent {
    pub fn topic(&self) -> Topic {
        match self {
            PipelineEvent::TokenLaunched(_) => Topic::TokenLaunched,
            PipelineEvent::BondingProgress(_) => Topic::BondingProgress,
            PipelineEvent::TokenTrade(_) => Topic::TokenTrade,
            PipelineEvent::TokenMigration(_) => Topic::TokenMigration,
            PipelineEvent::StreamConnected { .. } => Topic::StreamConnected,
            PipelineEvent::StreamDisconnected { .. } => Topic::StreamDisconnected,
            PipelineEvent::StreamError { .. } => Topic::StreamError,
        }
    }
}

/// Handler registered for one topic
pub type EventHandler =
    Box<dyn Fn(&PipelineEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Callback-registry event bus
///
/// Many independent listeners per topic; a failing handler is logged and
/// the fan-out continues. Dispatch happens on the caller's task with no
/// suspension.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<Topic, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one topic
    pub fn subscribe(&self, topic: Topic, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic)
            .or_default()
            .push(handler);
    }

    /// Publish an event to every handler of its topic
    pub fn emit(&self, event: &PipelineEvent) {
        let topic = event.topic();
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let Some(list) = handlers.get(&topic) else {
            return;
        };
        for handler in list {
            if let Err(e) = handler(event) {
                log::warn!("⚠️  Handler error on {}: {}", topic.as_str(), e);
            }
        }
    }

    pub fn handler_count(&self, topic: Topic) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
