//! Pipeline assembly and lifecycle
//!
//! Builds the components from one [`IngestConfig`], wires the dispatch
//! processor (registry mutation + bus publication), and owns the
//! background tasks: queue dispatch, registry sweep, breaker reset
//! probe, and periodic health logging.

use crate::breaker::{breaker_reset_task, BreakerState, CircuitBreaker};
use crate::bus::{EventBus, PipelineEvent};
use crate::config::{ConfigError, IngestConfig};
use crate::events::DomainEvent;
use crate::queue::{dispatch_task, BackpressureQueue, EventProcessor};
use crate::registry::{sweep_task, TokenPatch, TokenRegistry};
use crate::stream::manager::{ConnectError, ConnectionState, StreamConnectionManager};
use crate::stream::subscription::{build_program_filters, SubscriptionError};
use crate::stream::transport::StreamTransport;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// How often the breaker reset probe checks for Open -> HalfOpen
const BREAKER_PROBE_INTERVAL_MS: u64 = 1_000;

/// Health log cadence
const STATS_INTERVAL_MS: u64 = 30_000;

#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Subscription(SubscriptionError),
    Connect(ConnectError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "Config error: {}", e),
            PipelineError::Subscription(e) => write!(f, "Subscription error: {}", e),
            PipelineError::Connect(e) => write!(f, "Connect error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<SubscriptionError> for PipelineError {
    fn from(e: SubscriptionError) -> Self {
        PipelineError::Subscription(e)
    }
}

/// Dispatch processor: mutate the registry, then publish on the bus
///
/// Registry writes happen here and only here, on the single dispatch
/// task, so consumers observe tokens in dispatch order.
pub fn event_processor(registry: Arc<TokenRegistry>, bus: Arc<EventBus>) -> EventProcessor {
    Arc::new(move |queued| {
        match queued.event {
            DomainEvent::TokenCreated(e) => {
                registry.upsert(
                    &e.mint,
                    &e.bonding_curve,
                    TokenPatch {
                        creator: Some(e.creator.clone()),
                        name: e.name.clone(),
                        symbol: e.symbol.clone(),
                        uri: e.uri.clone(),
                        ..Default::default()
                    },
                );
                bus.emit(&PipelineEvent::TokenLaunched(e));
            }
            DomainEvent::CurveProgress(e) => {
                registry.apply_progress(&e.bonding_curve, e.snapshot);
                bus.emit(&PipelineEvent::BondingProgress(e));
            }
            DomainEvent::Trade(e) => {
                registry.record_trade(&e.mint, e.side, e.sol_amount);
                bus.emit(&PipelineEvent::TokenTrade(e));
            }
            DomainEvent::Migration(e) => {
                registry.mark_migrated(&e.mint, e.pool.as_deref());
                bus.emit(&PipelineEvent::TokenMigration(e));
            }
        }
        Ok(())
    })
}

/// The assembled ingestion pipeline
///
/// Construction wires everything; `start` spawns the background tasks
/// and opens the stream; `shutdown` tears it all down in order.
pub struct IngestPipeline {
    config: IngestConfig,
    queue: Arc<BackpressureQueue>,
    registry: Arc<TokenRegistry>,
    bus: Arc<EventBus>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    manager: Arc<StreamConnectionManager>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let queue = Arc::new(BackpressureQueue::new(config.queue_config()));
        let registry = Arc::new(TokenRegistry::new(config.registry_config()));
        let bus = Arc::new(EventBus::new());
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(config.breaker_config())));

        queue.set_processor(event_processor(registry.clone(), bus.clone()));

        let manager = Arc::new(StreamConnectionManager::new(
            config.connection_config(),
            transport,
            breaker.clone(),
            queue.clone(),
            bus.clone(),
        ));

        Ok(Self {
            config,
            queue,
            registry,
            bus,
            breaker,
            manager,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn background tasks and open the stream subscription
    ///
    /// A transport failure on the initial connect is not fatal: the
    /// fault path has already scheduled a reconnect. A breaker-open
    /// refusal is returned, since nothing will retry on the caller's
    /// behalf before the breaker recovers.
    pub async fn start(&self) -> Result<(), PipelineError> {
        log::info!(
            "🚀 Starting ingestion pipeline (program: {})",
            self.config.program_id
        );

        let filters = build_program_filters(
            &self.config.program_id,
            &self.config.watch_accounts,
            self.config.commitment,
        )?;

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(tokio::spawn(dispatch_task(self.queue.clone())));
            tasks.push(tokio::spawn(sweep_task(self.registry.clone())));
            tasks.push(tokio::spawn(breaker_reset_task(
                self.breaker.clone(),
                BREAKER_PROBE_INTERVAL_MS,
            )));
            tasks.push(tokio::spawn(stats_task(
                self.queue.clone(),
                self.registry.clone(),
            )));
        }

        match self.manager.connect(filters).await {
            Ok(()) => Ok(()),
            Err(ConnectError::Transport(e)) => {
                log::warn!("⚠️  Initial connect failed ({}), reconnect scheduled", e);
                Ok(())
            }
            Err(e) => Err(PipelineError::Connect(e)),
        }
    }

    /// Stop the stream, drain the queue, cancel background tasks
    pub async fn shutdown(&self) {
        log::info!("🔄 Shutting down ingestion pipeline...");
        self.manager.disconnect().await;
        let tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task.abort();
        }
        log::info!("✅ Pipeline shut down");
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<BackpressureQueue> {
        &self.queue
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state()
    }
}

/// Periodic health line: queue stats plus registry counts
async fn stats_task(queue: Arc<BackpressureQueue>, registry: Arc<TokenRegistry>) {
    let mut timer = interval(Duration::from_millis(STATS_INTERVAL_MS));
    loop {
        timer.tick().await;
        let stats = queue.stats();
        let counts = registry.counts();
        log::info!(
            "📊 queue depth: {} | processed: {} | dropped: {} | overflow: {} | tokens: {} ({} active, {} migrated)",
            stats.depth,
            stats.processed,
            stats.dropped,
            stats.overflowed,
            counts.total,
            counts.active,
            counts.migrated
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        current_timestamp_ms, CurveSnapshot, CurveProgressEvent, EventKind, MigrationEvent,
        Priority, QueuedEvent, TokenCreatedEvent, TradeEvent, TradeSide,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queued(event: DomainEvent) -> QueuedEvent {
        let kind = event.kind();
        QueuedEvent {
            kind,
            priority: kind.default_priority(),
            event,
            enqueued_at: current_timestamp_ms(),
            slot: None,
        }
    }

    #[test]
    fn test_processor_updates_registry_and_publishes() {
        let registry = Arc::new(TokenRegistry::new(Default::default()));
        let bus = Arc::new(EventBus::new());
        let published = Arc::new(AtomicUsize::new(0));
        for topic in [
            crate::bus::Topic::TokenLaunched,
            crate::bus::Topic::TokenTrade,
            crate::bus::Topic::BondingProgress,
            crate::bus::Topic::TokenMigration,
        ] {
            let published = published.clone();
            bus.subscribe(
                topic,
                Box::new(move |_| {
                    published.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        let processor = event_processor(registry.clone(), bus);

        processor(queued(DomainEvent::TokenCreated(TokenCreatedEvent {
            mint: "MintA".to_string(),
            bonding_curve: "CurveA".to_string(),
            creator: "CreatorA".to_string(),
            name: Some("Token A".to_string()),
            symbol: Some("TKA".to_string()),
            uri: None,
            timestamp: 1,
        })))
        .unwrap();
        processor(queued(DomainEvent::Trade(TradeEvent {
            mint: "MintA".to_string(),
            side: TradeSide::Buy,
            sol_amount: 2.0,
            token_amount: 1_000.0,
            trader: "TraderA".to_string(),
            timestamp: 2,
        })))
        .unwrap();
        processor(queued(DomainEvent::CurveProgress(CurveProgressEvent {
            bonding_curve: "CurveA".to_string(),
            snapshot: CurveSnapshot {
                progress_pct: 55.0,
                ..Default::default()
            },
            timestamp: 3,
        })))
        .unwrap();
        processor(queued(DomainEvent::Migration(MigrationEvent {
            mint: "MintA".to_string(),
            pool: Some("PoolA".to_string()),
            timestamp: 4,
        })))
        .unwrap();

        let token = registry.get("MintA").unwrap();
        assert_eq!(token.creator, "CreatorA");
        assert_eq!(token.buy_count, 1);
        assert_eq!(token.curve.unwrap().progress_pct, 55.0);
        assert!(token.migrated);
        assert_eq!(token.pool.as_deref(), Some("PoolA"));
        assert_eq!(published.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_processor_unknown_mint_trade_is_ok() {
        let registry = Arc::new(TokenRegistry::new(Default::default()));
        let bus = Arc::new(EventBus::new());
        let processor = event_processor(registry.clone(), bus);

        let result = processor(queued(DomainEvent::Trade(TradeEvent {
            mint: "Ghost".to_string(),
            side: TradeSide::Sell,
            sol_amount: 1.0,
            token_amount: 10.0,
            trader: "TraderA".to_string(),
            timestamp: 1,
        })));

        assert!(result.is_ok());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_new_rejects_invalid_config() {
        struct NeverTransport;
        #[async_trait::async_trait]
        impl StreamTransport for NeverTransport {
            async fn open(
                &self,
                _filters: &crate::stream::subscription::SubscriptionFilters,
            ) -> Result<crate::stream::transport::StreamSession, crate::stream::transport::TransportError>
            {
                Err(crate::stream::transport::TransportError::Connect(
                    "unused".to_string(),
                ))
            }
        }

        let config = IngestConfig {
            batch_size: 0,
            ..Default::default()
        };
        let result = IngestPipeline::new(config, Arc::new(NeverTransport));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_priority_wiring_through_queued_helper() {
        let event = DomainEvent::Migration(MigrationEvent {
            mint: "MintA".to_string(),
            pool: None,
            timestamp: 0,
        });
        assert_eq!(queued(event).priority, Priority::Critical);
        assert_eq!(queued(DomainEvent::Trade(TradeEvent {
            mint: "MintA".to_string(),
            side: TradeSide::Buy,
            sol_amount: 0.0,
            token_amount: 0.0,
            trader: String::new(),
            timestamp: 0,
        })).priority, Priority::Normal);
        assert_eq!(EventKind::CurveProgress.default_priority(), Priority::Low);
    }
}
