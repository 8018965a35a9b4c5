//! Priority backpressure queue between the stream decoder and dispatch
//!
//! Decouples event production rate from downstream processing rate,
//! bounding memory while guaranteeing that safety-critical events
//! (migrations) are never shed. Ordering is priority-major, FIFO-minor.
//!
//! `enqueue` is synchronous and non-suspending; a single `dispatch_task`
//! drains the queue in fixed-interval batches through the registered
//! processor.

use crate::events::{current_timestamp_ms, DomainEvent, Priority, QueuedEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::time::{interval, sleep, Duration};

/// Bounded sample window for the rolling batch-latency average
const BATCH_LATENCY_SAMPLES: usize = 100;

/// Queue sizing and dispatch cadence
#[derive(Debug, Clone)]
pub struct BackpressureQueueConfig {
    /// Hard bound on queue depth (soft only for critical overflow)
    pub max_size: usize,
    /// Depth at which priority <= Low events are shed without scanning
    pub high_water_mark: usize,
    /// Depth at which the overflow flag clears again
    pub low_water_mark: usize,
    /// Items removed per dispatch tick
    pub batch_size: usize,
    /// Dispatch tick interval
    pub process_interval_ms: u64,
}

impl Default for BackpressureQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 5_000,
            high_water_mark: 4_000,
            low_water_mark: 1_000,
            batch_size: 100,
            process_interval_ms: 50,
        }
    }
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub depth: usize,
    /// Items handed to the processor (including ones it errored on)
    pub processed: u64,
    /// Items rejected at admission plus victims evicted for criticals
    pub dropped: u64,
    pub critical_processed: u64,
    /// Set at the high watermark, cleared at the low watermark
    pub overflowed: bool,
    pub avg_batch_ms: f64,
}

/// Per-item processor registered on the queue
///
/// Errors are logged and isolated per item; one failing item never
/// aborts its batch.
pub type EventProcessor =
    Arc<dyn Fn(QueuedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

struct QueueInner {
    items: VecDeque<QueuedEvent>,
    processed: u64,
    dropped: u64,
    critical_processed: u64,
    overflowed: bool,
    batch_samples: VecDeque<f64>,
}

/// Overflow-safe priority queue with admission/eviction policy
///
/// Invariants: depth <= max_size except for the transient window where a
/// critical event is admitted with no evictable victim; items at the
/// front always have priority >= items behind them; enqueue order is
/// preserved within one priority class.
pub struct BackpressureQueue {
    config: BackpressureQueueConfig,
    inner: Mutex<QueueInner>,
    processor: RwLock<Option<EventProcessor>>,
}

impl BackpressureQueue {
    pub fn new(config: BackpressureQueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(1024),
                processed: 0,
                dropped: 0,
                critical_processed: 0,
                overflowed: false,
                batch_samples: VecDeque::with_capacity(BATCH_LATENCY_SAMPLES),
            }),
            processor: RwLock::new(None),
        }
    }

    /// Register the processor invoked for each dispatched item
    pub fn set_processor(&self, processor: EventProcessor) {
        *self.processor.write().unwrap_or_else(|e| e.into_inner()) = Some(processor);
    }

    pub fn config(&self) -> &BackpressureQueueConfig {
        &self.config
    }

    /// Admit an event, resolving priority from its kind unless overridden
    ///
    /// Returns false when the event was shed (counted as dropped).
    /// Synchronous, O(depth) worst case: linear scan for the insertion
    /// point and, for criticals at capacity, the eviction victim.
    pub fn enqueue(
        &self,
        event: DomainEvent,
        priority: Option<Priority>,
        slot: Option<u64>,
    ) -> bool {
        let kind = event.kind();
        let priority = priority.unwrap_or_else(|| kind.default_priority());
        let mut inner = self.lock_inner();
        let depth = inner.items.len();

        if priority < Priority::Critical {
            // Early shedding: at/above the high watermark, lowest-value
            // events are rejected without scanning
            if depth >= self.config.high_water_mark && priority <= Priority::Low {
                inner.dropped += 1;
                inner.overflowed = true;
                log::debug!(
                    "🗑️  Shed {} event at high watermark (depth {})",
                    kind.as_str(),
                    depth
                );
                return false;
            }
            if depth >= self.config.max_size {
                inner.dropped += 1;
                inner.overflowed = true;
                log::debug!("🗑️  Queue full, dropped {} event", kind.as_str());
                return false;
            }
        } else if depth >= self.config.max_size {
            // A critical event makes room by evicting the lowest-priority
            // item, most recent among candidates (scanned from the tail).
            // With no evictable victim it is admitted anyway: the no-loss
            // guarantee outweighs the soft size bound.
            let victim = inner
                .items
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, e)| e.priority < Priority::Critical)
                .min_by_key(|(_, e)| e.priority)
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => {
                    let evicted = inner.items.remove(idx);
                    inner.dropped += 1;
                    if let Some(evicted) = evicted {
                        log::debug!(
                            "🗑️  Evicted {} event to admit critical {}",
                            evicted.kind.as_str(),
                            kind.as_str()
                        );
                    }
                }
                None => {
                    log::warn!(
                        "⚠️  Queue full of critical events, admitting {} past max_size ({})",
                        kind.as_str(),
                        self.config.max_size
                    );
                }
            }
        }

        let queued = QueuedEvent {
            kind,
            event,
            priority,
            enqueued_at: current_timestamp_ms(),
            slot,
        };
        // Priority-major, FIFO-minor: insert before the first
        // strictly-lower-priority item
        let pos = inner
            .items
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(inner.items.len());
        inner.items.insert(pos, queued);

        if inner.items.len() >= self.config.high_water_mark {
            inner.overflowed = true;
        }
        true
    }

    /// Remove and process up to `batch_size` items from the front
    ///
    /// Invoked by [`dispatch_task`] on a fixed interval; the single task
    /// makes ticks non-reentrant. Returns the number of items handed to
    /// the processor.
    pub fn process_batch(&self) -> usize {
        let processor = match self
            .processor
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            Some(p) => p,
            None => return 0,
        };

        let batch: Vec<QueuedEvent> = {
            let mut inner = self.lock_inner();
            let take = self.config.batch_size.min(inner.items.len());
            inner.items.drain(..take).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let started = Instant::now();
        let mut criticals = 0u64;
        let count = batch.len();
        for item in batch {
            if item.priority == Priority::Critical {
                criticals += 1;
            }
            let kind = item.kind;
            if let Err(e) = processor(item) {
                // Per-item isolation: log and continue the batch
                log::warn!("⚠️  Processor failed on {} event: {}", kind.as_str(), e);
            }
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut inner = self.lock_inner();
        inner.processed += count as u64;
        inner.critical_processed += criticals;
        if inner.batch_samples.len() >= BATCH_LATENCY_SAMPLES {
            inner.batch_samples.pop_front();
        }
        inner.batch_samples.push_back(elapsed_ms);
        if inner.overflowed && inner.items.len() <= self.config.low_water_mark {
            inner.overflowed = false;
        }
        count
    }

    /// Synchronously process remaining items until empty or `timeout`
    ///
    /// Shutdown-only path; best-effort, per-item errors are swallowed by
    /// `process_batch`.
    pub async fn drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.depth() > 0 {
            if Instant::now() >= deadline {
                log::warn!(
                    "⚠️  Drain timeout elapsed with {} events still queued",
                    self.depth()
                );
                return;
            }
            if self.process_batch() == 0 {
                // No processor registered; nothing more we can do
                return;
            }
            // Yield between batches so shutdown stays responsive
            sleep(Duration::from_millis(1)).await;
        }
        log::info!("✅ Queue drained");
    }

    pub fn depth(&self) -> usize {
        self.lock_inner().items.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock_inner();
        let avg_batch_ms = if inner.batch_samples.is_empty() {
            0.0
        } else {
            inner.batch_samples.iter().sum::<f64>() / inner.batch_samples.len() as f64
        };
        QueueStats {
            depth: inner.items.len(),
            processed: inner.processed,
            dropped: inner.dropped,
            critical_processed: inner.critical_processed,
            overflowed: inner.overflowed,
            avg_batch_ms,
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-interval batch dispatcher
///
/// Runs until aborted. A batch in flight blocks the next tick by
/// construction (single task, sequential loop).
pub async fn dispatch_task(queue: Arc<BackpressureQueue>) {
    let interval_ms = queue.config().process_interval_ms.max(1);
    log::info!("⏰ Starting queue dispatcher (interval: {}ms)", interval_ms);
    let mut timer = interval(Duration::from_millis(interval_ms));
    let mut last_overflow_warn: Option<Instant> = None;
    loop {
        timer.tick().await;
        queue.process_batch();

        let stats = queue.stats();
        let warn_due = last_overflow_warn.map_or(true, |t| t.elapsed().as_secs() >= 10);
        if stats.overflowed && warn_due {
            log::warn!(
                "⚠️  Queue above high watermark: depth {} (dropped so far: {})",
                stats.depth,
                stats.dropped
            );
            last_overflow_warn = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CurveProgressEvent, CurveSnapshot, MigrationEvent, TradeEvent, TradeSide};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn low_event(n: u64) -> DomainEvent {
        DomainEvent::CurveProgress(CurveProgressEvent {
            bonding_curve: format!("Curve{}", n),
            snapshot: CurveSnapshot::default(),
            timestamp: n as i64,
        })
    }

    fn normal_event(n: u64) -> DomainEvent {
        DomainEvent::Trade(TradeEvent {
            mint: format!("Mint{}", n),
            side: TradeSide::Buy,
            sol_amount: 1.0,
            token_amount: 1000.0,
            trader: "Trader".to_string(),
            timestamp: n as i64,
        })
    }

    fn critical_event(n: u64) -> DomainEvent {
        DomainEvent::Migration(MigrationEvent {
            mint: format!("Mint{}", n),
            pool: None,
            timestamp: n as i64,
        })
    }

    fn small_queue(max: usize, high: usize) -> BackpressureQueue {
        BackpressureQueue::new(BackpressureQueueConfig {
            max_size: max,
            high_water_mark: high,
            low_water_mark: 1,
            batch_size: 10,
            process_interval_ms: 10,
        })
    }

    #[test]
    fn test_early_shedding_scenario() {
        // Spec scenario: max 3, high watermark 2. Two Lows accepted, a
        // third Low shed at the watermark, a Critical admitted without
        // eviction since the queue is not yet at max.
        let queue = small_queue(3, 2);

        assert!(queue.enqueue(low_event(1), None, None));
        assert!(queue.enqueue(low_event(2), None, None));
        assert!(!queue.enqueue(low_event(3), None, None));
        assert!(queue.enqueue(critical_event(4), None, None));

        let stats = queue.stats();
        assert_eq!(stats.depth, 3);
        assert_eq!(stats.dropped, 1);
        assert!(stats.overflowed);
    }

    #[test]
    fn test_critical_evicts_most_recent_lowest_priority() {
        let queue = small_queue(3, 3);
        assert!(queue.enqueue(normal_event(1), None, None));
        assert!(queue.enqueue(low_event(2), None, None));
        assert!(queue.enqueue(low_event(3), None, None));

        // Full queue: the critical evicts the most recent Low (Curve3)
        assert!(queue.enqueue(critical_event(4), None, None));

        let processed = Arc::new(Mutex::new(Vec::new()));
        let processed_clone = processed.clone();
        queue.set_processor(Arc::new(move |item| {
            processed_clone.lock().unwrap().push(item.event.clone());
            Ok(())
        }));
        queue.process_batch();

        let order = processed.lock().unwrap();
        assert_eq!(order.len(), 3);
        assert!(matches!(order[0], DomainEvent::Migration(_)));
        assert!(matches!(order[1], DomainEvent::Trade(_)));
        match &order[2] {
            DomainEvent::CurveProgress(p) => assert_eq!(p.bonding_curve, "Curve2"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn test_critical_never_rejected_even_without_victim() {
        let queue = small_queue(2, 2);
        assert!(queue.enqueue(critical_event(1), None, None));
        assert!(queue.enqueue(critical_event(2), None, None));
        // No evictable victim: admitted past max_size
        assert!(queue.enqueue(critical_event(3), None, None));
        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.stats().dropped, 0);
    }

    #[test]
    fn test_fifo_within_priority_class() {
        let queue = small_queue(10, 10);
        for n in 0..5 {
            assert!(queue.enqueue(normal_event(n), None, None));
        }

        let processed = Arc::new(Mutex::new(Vec::new()));
        let processed_clone = processed.clone();
        queue.set_processor(Arc::new(move |item| {
            if let DomainEvent::Trade(t) = &item.event {
                processed_clone.lock().unwrap().push(t.mint.clone());
            }
            Ok(())
        }));
        queue.process_batch();

        let order = processed.lock().unwrap();
        assert_eq!(
            order.as_slice(),
            ["Mint0", "Mint1", "Mint2", "Mint3", "Mint4"]
        );
    }

    #[test]
    fn test_priority_override() {
        let queue = small_queue(10, 10);
        assert!(queue.enqueue(normal_event(1), None, None));
        assert!(queue.enqueue(low_event(2), Some(Priority::High), None));

        let processed = Arc::new(Mutex::new(Vec::new()));
        let processed_clone = processed.clone();
        queue.set_processor(Arc::new(move |item| {
            processed_clone.lock().unwrap().push(item.kind);
            Ok(())
        }));
        queue.process_batch();

        let order = processed.lock().unwrap();
        // The overridden High progress event dispatches before the trade
        assert_eq!(order[0], crate::events::EventKind::CurveProgress);
        assert_eq!(order[1], crate::events::EventKind::Trade);
    }

    #[test]
    fn test_processor_error_does_not_abort_batch() {
        let queue = small_queue(10, 10);
        for n in 0..4 {
            queue.enqueue(normal_event(n), None, None);
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        queue.set_processor(Arc::new(move |_| {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                Err("dispatch failed".into())
            } else {
                Ok(())
            }
        }));

        assert_eq!(queue.process_batch(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(queue.stats().processed, 4);
    }

    #[test]
    fn test_overflow_flag_hysteresis() {
        let queue = BackpressureQueue::new(BackpressureQueueConfig {
            max_size: 10,
            high_water_mark: 4,
            low_water_mark: 2,
            batch_size: 10,
            process_interval_ms: 10,
        });
        for n in 0..4 {
            queue.enqueue(normal_event(n), None, None);
        }
        assert!(queue.stats().overflowed);

        queue.set_processor(Arc::new(|_| Ok(())));
        queue.process_batch();
        assert!(!queue.stats().overflowed);
    }

    #[tokio::test]
    async fn test_drain_empties_queue() {
        let queue = Arc::new(small_queue(50, 50));
        for n in 0..25 {
            queue.enqueue(normal_event(n), None, None);
        }
        queue.set_processor(Arc::new(|_| Ok(())));

        queue.drain(Duration::from_secs(1)).await;
        assert_eq!(queue.depth(), 0);
        let stats = queue.stats();
        assert_eq!(stats.processed, 25);
        assert!(stats.avg_batch_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_dispatch_task_processes_critical_counter() {
        let queue = Arc::new(small_queue(10, 10));
        queue.enqueue(critical_event(1), None, None);
        queue.enqueue(normal_event(2), None, None);
        queue.set_processor(Arc::new(|_| Ok(())));

        let handle = tokio::spawn(dispatch_task(queue.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let stats = queue.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.critical_processed, 1);
    }
}
