//! In-memory registry of per-token state
//!
//! Single source of truth for token records derived from the dispatched
//! event stream. Bounded in size, self-expiring via a TTL sweep, written
//! only through registry methods. A secondary index maps bonding curve
//! address -> mint so curve-keyed account updates resolve in O(1).

use crate::events::{CurveSnapshot, TradeSide};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{interval, Duration};

/// Registry capacity and expiry knobs
#[derive(Debug, Clone)]
pub struct TokenRegistryConfig {
    /// Hard capacity bound; reaching it evicts before insert
    pub max_tokens: usize,
    /// Any token is purged this long after its last update
    pub inactive_ttl_ms: u64,
    /// Migrated tokens are purged on this (shorter) horizon
    pub migrated_ttl_ms: u64,
    /// Sweep cadence
    pub cleanup_interval_ms: u64,
}

impl Default for TokenRegistryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2_000,
            inactive_ttl_ms: 3_600_000,
            migrated_ttl_ms: 600_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Per-token record
#[derive(Debug, Clone, Serialize)]
pub struct TrackedToken {
    pub mint: String,
    pub bonding_curve: String,
    pub creator: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub curve: Option<CurveSnapshot>,
    pub first_seen_ms: i64,
    pub last_updated_ms: i64,
    pub buy_count: u64,
    pub sell_count: u64,
    pub total_volume_sol: f64,
    pub migrated: bool,
    pub migrated_at_ms: Option<i64>,
    pub pool: Option<String>,
}

/// Partial update merged into a record by `upsert`
///
/// `None` fields leave the existing value untouched.
#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    pub creator: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub curve: Option<CurveSnapshot>,
}

/// Aggregate counts for dashboards and health logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub total: usize,
    pub active: usize,
    pub migrated: usize,
}

struct RegistryInner {
    tokens: HashMap<String, TrackedToken>,
    /// bonding_curve -> mint; every entry refers to a live token record
    by_curve: HashMap<String, String>,
}

/// Bounded, self-expiring token state manager
pub struct TokenRegistry {
    config: TokenRegistryConfig,
    inner: Mutex<RegistryInner>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl TokenRegistry {
    pub fn new(config: TokenRegistryConfig) -> Self {
        Self::with_now_fn(config, Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Create a registry with a custom clock (deterministic TTL tests)
    pub fn with_now_fn(
        config: TokenRegistryConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            config,
            inner: Mutex::new(RegistryInner {
                tokens: HashMap::new(),
                by_curve: HashMap::new(),
            }),
            now_fn,
        }
    }

    pub fn config(&self) -> &TokenRegistryConfig {
        &self.config
    }

    /// Create or update a token record
    ///
    /// Existing records get the patch merged and `last_updated` bumped.
    /// At capacity, one record is evicted first: any already-migrated
    /// record if present, otherwise the least-recently-updated one.
    /// Equal-timestamp ties fall to map iteration order.
    pub fn upsert(&self, mint: &str, bonding_curve: &str, patch: TokenPatch) {
        let now = (self.now_fn)();
        let mut inner = self.lock_inner();

        if let Some(token) = inner.tokens.get_mut(mint) {
            merge_patch(token, patch);
            token.last_updated_ms = now;
            return;
        }

        if inner.tokens.len() >= self.config.max_tokens {
            if let Some(victim) = pick_eviction_victim(&inner.tokens) {
                if let Some(evicted) = inner.tokens.remove(&victim) {
                    inner.by_curve.remove(&evicted.bonding_curve);
                    log::debug!(
                        "🗑️  Evicted {} (migrated: {}) to stay within {} tokens",
                        evicted.mint,
                        evicted.migrated,
                        self.config.max_tokens
                    );
                }
            }
        }

        let mut token = TrackedToken {
            mint: mint.to_string(),
            bonding_curve: bonding_curve.to_string(),
            creator: String::new(),
            name: None,
            symbol: None,
            uri: None,
            curve: None,
            first_seen_ms: now,
            last_updated_ms: now,
            buy_count: 0,
            sell_count: 0,
            total_volume_sol: 0.0,
            migrated: false,
            migrated_at_ms: None,
            pool: None,
        };
        merge_patch(&mut token, patch);
        inner
            .by_curve
            .insert(bonding_curve.to_string(), mint.to_string());
        inner.tokens.insert(mint.to_string(), token);
    }

    /// Accumulate trade counters for a known mint
    ///
    /// Unknown mints are a no-op: trade events can outrun the creation
    /// event under reconnect races, and High-priority creation dispatch
    /// closes most of that window already.
    pub fn record_trade(&self, mint: &str, side: TradeSide, sol_amount: f64) {
        let now = (self.now_fn)();
        let mut inner = self.lock_inner();
        match inner.tokens.get_mut(mint) {
            Some(token) => {
                match side {
                    TradeSide::Buy => token.buy_count += 1,
                    TradeSide::Sell => token.sell_count += 1,
                }
                token.total_volume_sol += sol_amount;
                token.last_updated_ms = now;
            }
            None => {
                log::debug!("Trade for unknown mint {}, ignoring", mint);
            }
        }
    }

    /// Merge a curve snapshot, resolving the mint via the secondary index
    ///
    /// Curve account updates do not carry the mint. Unknown curves are a
    /// no-op, same policy as `record_trade`.
    pub fn apply_progress(&self, bonding_curve: &str, snapshot: CurveSnapshot) {
        let now = (self.now_fn)();
        let mut inner = self.lock_inner();
        let mint = match inner.by_curve.get(bonding_curve) {
            Some(m) => m.clone(),
            None => {
                log::debug!("Progress for unknown curve {}, ignoring", bonding_curve);
                return;
            }
        };
        if let Some(token) = inner.tokens.get_mut(&mint) {
            token.curve = Some(snapshot);
            token.last_updated_ms = now;
        }
    }

    /// Mark a token migrated; idempotent, first `migrated_at` wins
    pub fn mark_migrated(&self, mint: &str, pool: Option<&str>) {
        let now = (self.now_fn)();
        let mut inner = self.lock_inner();
        if let Some(token) = inner.tokens.get_mut(mint) {
            if !token.migrated {
                token.migrated = true;
                token.migrated_at_ms = Some(now);
                log::info!("🎓 Token {} migrated (pool: {:?})", mint, pool);
            }
            if token.pool.is_none() {
                token.pool = pool.map(str::to_string);
            }
            token.last_updated_ms = now;
        } else {
            log::debug!("Migration for unknown mint {}, ignoring", mint);
        }
    }

    /// Remove a record and its curve index entry
    pub fn remove(&self, mint: &str) -> Option<TrackedToken> {
        let mut inner = self.lock_inner();
        let token = inner.tokens.remove(mint)?;
        inner.by_curve.remove(&token.bonding_curve);
        Some(token)
    }

    pub fn get(&self, mint: &str) -> Option<TrackedToken> {
        self.lock_inner().tokens.get(mint).cloned()
    }

    pub fn get_by_curve(&self, bonding_curve: &str) -> Option<TrackedToken> {
        let inner = self.lock_inner();
        let mint = inner.by_curve.get(bonding_curve)?;
        inner.tokens.get(mint).cloned()
    }

    pub fn mint_for_curve(&self, bonding_curve: &str) -> Option<String> {
        self.lock_inner().by_curve.get(bonding_curve).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_inner().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge expired records; returns how many were removed
    ///
    /// A migrated record expires `migrated_ttl_ms` after its last update;
    /// any record expires `inactive_ttl_ms` after its last update.
    pub fn sweep_expired(&self) -> usize {
        let now = (self.now_fn)();
        let migrated_ttl = self.config.migrated_ttl_ms as i64;
        let inactive_ttl = self.config.inactive_ttl_ms as i64;
        let mut inner = self.lock_inner();

        let expired: Vec<String> = inner
            .tokens
            .values()
            .filter(|t| {
                let age = now - t.last_updated_ms;
                (t.migrated && age > migrated_ttl) || age > inactive_ttl
            })
            .map(|t| t.mint.clone())
            .collect();

        for mint in &expired {
            if let Some(token) = inner.tokens.remove(mint) {
                inner.by_curve.remove(&token.bonding_curve);
            }
        }
        if !expired.is_empty() {
            log::debug!("🧹 Swept {} expired tokens", expired.len());
        }
        expired.len()
    }

    /// Tokens that have not migrated yet
    pub fn active_tokens(&self) -> Vec<TrackedToken> {
        self.lock_inner()
            .tokens
            .values()
            .filter(|t| !t.migrated)
            .cloned()
            .collect()
    }

    /// Active tokens whose curve progress lies within `[min_pct, max_pct]`
    pub fn tokens_in_progress_range(&self, min_pct: f64, max_pct: f64) -> Vec<TrackedToken> {
        self.lock_inner()
            .tokens
            .values()
            .filter(|t| {
                !t.migrated
                    && t.curve
                        .map(|c| c.progress_pct >= min_pct && c.progress_pct <= max_pct)
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Active tokens at or above `min_pct` progress (migration watch list)
    pub fn tokens_near_completion(&self, min_pct: f64) -> Vec<TrackedToken> {
        self.tokens_in_progress_range(min_pct, 100.0)
    }

    /// Tokens first seen within the trailing `window_ms`
    pub fn recently_seen(&self, window_ms: u64) -> Vec<TrackedToken> {
        let cutoff = (self.now_fn)() - window_ms as i64;
        self.lock_inner()
            .tokens
            .values()
            .filter(|t| t.first_seen_ms >= cutoff)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> RegistryCounts {
        let inner = self.lock_inner();
        let migrated = inner.tokens.values().filter(|t| t.migrated).count();
        RegistryCounts {
            total: inner.tokens.len(),
            active: inner.tokens.len() - migrated,
            migrated,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn merge_patch(token: &mut TrackedToken, patch: TokenPatch) {
    if let Some(creator) = patch.creator {
        token.creator = creator;
    }
    if patch.name.is_some() {
        token.name = patch.name;
    }
    if patch.symbol.is_some() {
        token.symbol = patch.symbol;
    }
    if patch.uri.is_some() {
        token.uri = patch.uri;
    }
    if patch.curve.is_some() {
        token.curve = patch.curve;
    }
}

/// Eviction policy: prefer any already-migrated record, else the
/// least-recently-updated one
fn pick_eviction_victim(tokens: &HashMap<String, TrackedToken>) -> Option<String> {
    if let Some(migrated) = tokens.values().find(|t| t.migrated) {
        return Some(migrated.mint.clone());
    }
    tokens
        .values()
        .min_by_key(|t| t.last_updated_ms)
        .map(|t| t.mint.clone())
}

/// Periodic TTL sweep; runs until aborted
pub async fn sweep_task(registry: Arc<TokenRegistry>) {
    let interval_ms = registry.config().cleanup_interval_ms.max(100);
    log::info!("⏰ Starting registry sweep (interval: {}ms)", interval_ms);
    let mut timer = interval(Duration::from_millis(interval_ms));
    loop {
        timer.tick().await;
        let purged = registry.sweep_expired();
        if purged > 0 {
            let counts = registry.counts();
            log::info!(
                "🧹 Registry sweep purged {} tokens ({} tracked, {} active)",
                purged,
                counts.total,
                counts.active
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn mock_registry(config: TokenRegistryConfig) -> (TokenRegistry, Arc<AtomicI64>) {
        let clock = Arc::new(AtomicI64::new(1_000_000));
        let clock_fn = clock.clone();
        let registry = TokenRegistry::with_now_fn(
            config,
            Box::new(move || clock_fn.load(Ordering::SeqCst)),
        );
        (registry, clock)
    }

    fn created_patch(creator: &str) -> TokenPatch {
        TokenPatch {
            creator: Some(creator.to_string()),
            name: Some("Test Token".to_string()),
            symbol: Some("TST".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_creates_record_and_index() {
        let (registry, _clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintA", "CurveA", created_patch("CreatorA"));

        assert_eq!(registry.len(), 1);
        let token = registry.get("MintA").unwrap();
        assert_eq!(token.creator, "CreatorA");
        assert_eq!(token.symbol.as_deref(), Some("TST"));
        assert_eq!(registry.mint_for_curve("CurveA").as_deref(), Some("MintA"));
        assert_eq!(registry.get_by_curve("CurveA").unwrap().mint, "MintA");
    }

    #[test]
    fn test_upsert_merges_patch_and_bumps_timestamp() {
        let (registry, clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintA", "CurveA", created_patch("CreatorA"));
        let first = registry.get("MintA").unwrap();

        clock.fetch_add(5_000, Ordering::SeqCst);
        registry.upsert(
            "MintA",
            "CurveA",
            TokenPatch {
                uri: Some("ipfs://meta".to_string()),
                ..Default::default()
            },
        );

        let updated = registry.get("MintA").unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(updated.creator, "CreatorA"); // untouched
        assert_eq!(updated.uri.as_deref(), Some("ipfs://meta"));
        assert_eq!(updated.first_seen_ms, first.first_seen_ms);
        assert_eq!(updated.last_updated_ms, first.last_updated_ms + 5_000);
    }

    #[test]
    fn test_remove_deletes_record_and_index() {
        let (registry, _clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintA", "CurveA", TokenPatch::default());

        let removed = registry.remove("MintA").unwrap();
        assert_eq!(removed.mint, "MintA");
        assert!(registry.get("MintA").is_none());
        assert!(registry.mint_for_curve("CurveA").is_none());
        assert!(registry.remove("MintA").is_none());
    }

    #[test]
    fn test_record_trade_counters_and_unknown_noop() {
        let (registry, _clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintA", "CurveA", TokenPatch::default());

        registry.record_trade("MintA", TradeSide::Buy, 1.5);
        registry.record_trade("MintA", TradeSide::Buy, 0.5);
        registry.record_trade("MintA", TradeSide::Sell, 1.0);
        // Unknown mint: no-op, no panic, no record created
        registry.record_trade("Ghost", TradeSide::Buy, 9.0);

        let token = registry.get("MintA").unwrap();
        assert_eq!(token.buy_count, 2);
        assert_eq!(token.sell_count, 1);
        assert!((token.total_volume_sol - 3.0).abs() < f64::EPSILON);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_apply_progress_via_curve_index() {
        let (registry, _clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintA", "CurveA", TokenPatch::default());

        let snapshot = CurveSnapshot {
            progress_pct: 42.5,
            ..Default::default()
        };
        registry.apply_progress("CurveA", snapshot);
        registry.apply_progress("GhostCurve", snapshot); // no-op

        let token = registry.get("MintA").unwrap();
        assert_eq!(token.curve.unwrap().progress_pct, 42.5);
    }

    #[test]
    fn test_mark_migrated_idempotent() {
        let (registry, clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintA", "CurveA", TokenPatch::default());

        registry.mark_migrated("MintA", None);
        let first_ts = registry.get("MintA").unwrap().migrated_at_ms.unwrap();

        clock.fetch_add(10_000, Ordering::SeqCst);
        registry.mark_migrated("MintA", Some("PoolX"));

        let token = registry.get("MintA").unwrap();
        assert!(token.migrated);
        assert_eq!(token.migrated_at_ms.unwrap(), first_ts);
        assert_eq!(token.pool.as_deref(), Some("PoolX"));
    }

    #[test]
    fn test_capacity_eviction_prefers_migrated() {
        let (registry, clock) = mock_registry(TokenRegistryConfig {
            max_tokens: 2,
            ..Default::default()
        });
        registry.upsert("MintOld", "CurveOld", TokenPatch::default());
        clock.fetch_add(1_000, Ordering::SeqCst);
        registry.upsert("MintMigrated", "CurveMigrated", TokenPatch::default());
        registry.mark_migrated("MintMigrated", None);

        clock.fetch_add(1_000, Ordering::SeqCst);
        registry.upsert("MintNew", "CurveNew", TokenPatch::default());

        // The migrated record was evicted even though MintOld is older
        assert_eq!(registry.len(), 2);
        assert!(registry.get("MintMigrated").is_none());
        assert!(registry.mint_for_curve("CurveMigrated").is_none());
        assert!(registry.get("MintOld").is_some());
        assert!(registry.get("MintNew").is_some());
    }

    #[test]
    fn test_capacity_eviction_falls_back_to_oldest() {
        let (registry, clock) = mock_registry(TokenRegistryConfig {
            max_tokens: 1,
            ..Default::default()
        });
        registry.upsert("MintA", "CurveA", TokenPatch::default());
        clock.fetch_add(1_000, Ordering::SeqCst);
        registry.upsert("MintB", "CurveB", TokenPatch::default());

        assert_eq!(registry.len(), 1);
        assert!(registry.get("MintA").is_none());
        assert!(registry.get("MintB").is_some());
    }

    #[test]
    fn test_sweep_purges_inactive_tokens() {
        let (registry, clock) = mock_registry(TokenRegistryConfig {
            inactive_ttl_ms: 60_000,
            migrated_ttl_ms: 10_000,
            ..Default::default()
        });
        registry.upsert("MintStale", "CurveStale", TokenPatch::default());
        clock.fetch_add(50_000, Ordering::SeqCst);
        registry.upsert("MintFresh", "CurveFresh", TokenPatch::default());

        clock.fetch_add(20_000, Ordering::SeqCst);
        // MintStale is 70s old, MintFresh 20s old
        assert_eq!(registry.sweep_expired(), 1);
        assert!(registry.get("MintStale").is_none());
        assert!(registry.mint_for_curve("CurveStale").is_none());
        assert!(registry.get("MintFresh").is_some());
    }

    #[test]
    fn test_sweep_purges_migrated_on_shorter_ttl() {
        let (registry, clock) = mock_registry(TokenRegistryConfig {
            inactive_ttl_ms: 3_600_000,
            migrated_ttl_ms: 10_000,
            ..Default::default()
        });
        registry.upsert("MintMig", "CurveMig", TokenPatch::default());
        registry.mark_migrated("MintMig", None);
        registry.upsert("MintLive", "CurveLive", TokenPatch::default());

        clock.fetch_add(11_000, Ordering::SeqCst);
        assert_eq!(registry.sweep_expired(), 1);
        assert!(registry.get("MintMig").is_none());
        assert!(registry.get("MintLive").is_some());
    }

    #[test]
    fn test_derived_queries() {
        let (registry, clock) = mock_registry(TokenRegistryConfig::default());
        registry.upsert("MintLow", "CurveLow", TokenPatch {
            curve: Some(CurveSnapshot { progress_pct: 20.0, ..Default::default() }),
            ..Default::default()
        });
        registry.upsert("MintHot", "CurveHot", TokenPatch {
            curve: Some(CurveSnapshot { progress_pct: 92.0, ..Default::default() }),
            ..Default::default()
        });
        registry.upsert("MintDone", "CurveDone", TokenPatch::default());
        registry.mark_migrated("MintDone", None);

        let active = registry.active_tokens();
        assert_eq!(active.len(), 2);

        let entry_zone = registry.tokens_in_progress_range(10.0, 50.0);
        assert_eq!(entry_zone.len(), 1);
        assert_eq!(entry_zone[0].mint, "MintLow");

        let near = registry.tokens_near_completion(90.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].mint, "MintHot");

        clock.fetch_add(120_000, Ordering::SeqCst);
        assert!(registry.recently_seen(60_000).is_empty());
        assert_eq!(registry.recently_seen(300_000).len(), 3);

        let counts = registry.counts();
        assert_eq!(counts, RegistryCounts { total: 3, active: 2, migrated: 1 });
    }
}
