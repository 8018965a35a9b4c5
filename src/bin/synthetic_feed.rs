//! Synthetic feed harness
//!
//! Runs the full pipeline against an in-process transport that fabricates
//! launchpad activity: token launches, trade bursts, curve progress, and
//! eventual migrations, with an occasional injected stream fault to
//! exercise the reconnect path. No network access required.
//!
//! Usage: `RUST_LOG=info cargo run --bin synthetic_feed`

use async_trait::async_trait;
use curveflow::events::{
    current_timestamp_ms, CurveProgressEvent, CurveSnapshot, DomainEvent, MigrationEvent,
    TokenCreatedEvent, TradeEvent, TradeSide,
};
use curveflow::stream::subscription::SubscriptionFilters;
use curveflow::stream::transport::{StreamSession, StreamTransport, StreamUpdate, TransportError};
use curveflow::{IngestConfig, IngestPipeline, PipelineEvent, Topic};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

/// How many updates each session produces before faulting
const UPDATES_PER_SESSION: u64 = 2_000;

struct SyntheticTransport {
    slot: Arc<AtomicU64>,
}

#[async_trait]
impl StreamTransport for SyntheticTransport {
    async fn open(&self, filters: &SubscriptionFilters) -> Result<StreamSession, TransportError> {
        log::info!(
            "🔌 Synthetic session opened ({} txn filters, {} account filters)",
            filters.transactions.len(),
            filters.accounts.len()
        );
        let (tx, rx) = mpsc::channel(256);
        let slot = self.slot.clone();
        tokio::spawn(async move {
            produce(tx, slot).await;
        });
        Ok(StreamSession { updates: rx })
    }
}

/// Fabricate a stream of launch activity until the channel closes
async fn produce(
    tx: mpsc::Sender<Result<StreamUpdate, TransportError>>,
    slot: Arc<AtomicU64>,
) {
    let mut live_tokens: Vec<(String, String, f64)> = Vec::new();
    let mut next_token = 0u64;

    for n in 0..UPDATES_PER_SESSION {
        let current_slot = slot.fetch_add(1, Ordering::SeqCst);
        let roll: f64 = rand::thread_rng().gen();

        let update = if live_tokens.is_empty() || roll < 0.05 {
            // New launch
            next_token += 1;
            let mint = format!("Mint{:06}", next_token);
            let curve = format!("Curve{:06}", next_token);
            live_tokens.push((mint.clone(), curve.clone(), 0.0));
            StreamUpdate::Event {
                event: DomainEvent::TokenCreated(TokenCreatedEvent {
                    mint,
                    bonding_curve: curve,
                    creator: format!("Creator{:03}", next_token % 100),
                    name: Some(format!("Synthetic Token {}", next_token)),
                    symbol: Some(format!("SYN{}", next_token)),
                    uri: None,
                    timestamp: current_timestamp_ms(),
                }),
                slot: Some(current_slot),
            }
        } else if roll < 0.75 {
            // Trade against a random live token
            let idx = rand::thread_rng().gen_range(0..live_tokens.len());
            let (mint, _, progress) = &mut live_tokens[idx];
            *progress = (*progress + rand::thread_rng().gen_range(0.0..2.0)).min(100.0);
            let buy = rand::thread_rng().gen_bool(0.6);
            StreamUpdate::Event {
                event: DomainEvent::Trade(TradeEvent {
                    mint: mint.clone(),
                    side: if buy { TradeSide::Buy } else { TradeSide::Sell },
                    sol_amount: rand::thread_rng().gen_range(0.01..5.0),
                    token_amount: rand::thread_rng().gen_range(1_000.0..1_000_000.0),
                    trader: format!("Trader{:04}", rand::thread_rng().gen_range(0..5_000)),
                    timestamp: current_timestamp_ms(),
                }),
                slot: Some(current_slot),
            }
        } else if roll < 0.95 {
            // Curve account update
            let idx = rand::thread_rng().gen_range(0..live_tokens.len());
            let (_, curve, progress) = &live_tokens[idx];
            StreamUpdate::Event {
                event: DomainEvent::CurveProgress(CurveProgressEvent {
                    bonding_curve: curve.clone(),
                    snapshot: CurveSnapshot {
                        virtual_sol_reserves: ((30.0 + progress) * 1e9) as u64,
                        virtual_token_reserves: (1_073_000_000.0 * (1.0 - progress / 100.0)) as u64,
                        progress_pct: *progress,
                        complete: *progress >= 100.0,
                        ..Default::default()
                    },
                    timestamp: current_timestamp_ms(),
                }),
                slot: Some(current_slot),
            }
        } else if roll < 0.96 {
            // Migration of the most complete token
            let idx = live_tokens
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.2.total_cmp(&b.2))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let (mint, _, _) = live_tokens.remove(idx);
            StreamUpdate::Event {
                event: DomainEvent::Migration(MigrationEvent {
                    mint,
                    pool: Some(format!("Pool{:04}", rand::thread_rng().gen_range(0..10_000))),
                    timestamp: current_timestamp_ms(),
                }),
                slot: Some(current_slot),
            }
        } else {
            StreamUpdate::KeepAlive {
                slot: Some(current_slot),
            }
        };

        if tx.send(Ok(update)).await.is_err() {
            return;
        }
        if n % 50 == 0 {
            sleep(Duration::from_millis(20)).await;
        }
    }

    // End the session with a fault to exercise the reconnect path
    let _ = tx
        .send(Err(TransportError::Stream(
            "synthetic session expired".to_string(),
        )))
        .await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = IngestConfig::from_env();
    log::info!("🚀 Starting synthetic feed...");
    log::info!("📊 Configuration:");
    log::info!("   Program: {}", config.program_id);
    log::info!(
        "   Queue: max {} / high {} / low {}",
        config.max_queue_size,
        config.high_water_mark,
        config.low_water_mark
    );
    log::info!("   Registry: max {} tokens", config.max_tokens);

    let transport = Arc::new(SyntheticTransport {
        slot: Arc::new(AtomicU64::new(1)),
    });
    let pipeline = IngestPipeline::new(config, transport)?;

    pipeline.bus().subscribe(
        Topic::TokenLaunched,
        Box::new(|event| {
            if let PipelineEvent::TokenLaunched(e) = event {
                log::info!("🚀 Launch: {} ({:?})", e.mint, e.symbol);
            }
            Ok(())
        }),
    );
    pipeline.bus().subscribe(
        Topic::TokenMigration,
        Box::new(|event| {
            if let PipelineEvent::TokenMigration(e) = event {
                log::info!("🎓 Migration: {} -> {:?}", e.mint, e.pool);
            }
            Ok(())
        }),
    );
    pipeline.bus().subscribe(
        Topic::StreamDisconnected,
        Box::new(|event| {
            if let PipelineEvent::StreamDisconnected { will_reconnect } = event {
                log::warn!("🔌 Stream down (reconnecting: {})", will_reconnect);
            }
            Ok(())
        }),
    );

    pipeline.start().await?;

    tokio::signal::ctrl_c().await?;
    log::info!("⚡ Ctrl-C received");
    pipeline.shutdown().await;

    let counts = pipeline.registry().counts();
    let stats = pipeline.queue().stats();
    log::info!(
        "📊 Final: {} tokens tracked ({} migrated) | {} events processed, {} dropped",
        counts.total,
        counts.migrated,
        stats.processed,
        stats.dropped
    );
    Ok(())
}
