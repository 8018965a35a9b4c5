//! Ingestion configuration from environment variables
//!
//! One flat struct covering every tunable, loaded once at startup and
//! split into per-component configs. Every knob has a default; bad
//! values fail validation before any task is spawned.

use crate::breaker::CircuitBreakerConfig;
use crate::queue::BackpressureQueueConfig;
use crate::registry::TokenRegistryConfig;
use crate::stream::manager::ConnectionConfig;
use crate::stream::subscription::Commitment;
use std::env;
use std::str::FromStr;

/// pump.fun bonding-curve program
pub const DEFAULT_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Runtime configuration for the ingestion pipeline
///
/// Loaded from `CURVEFLOW_*` environment variables with defaults
/// matching a single mid-volume launchpad program.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Base58 program id the subscription tracks
    pub program_id: String,
    /// Extra curve accounts to watch beyond program-owned ones
    pub watch_accounts: Vec<String>,
    pub commitment: Commitment,

    // Backpressure queue
    pub max_queue_size: usize,
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    pub batch_size: usize,
    pub process_interval_ms: u64,

    // Circuit breaker
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
    pub failure_window_ms: u64,

    // Connection manager
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub ping_interval_ms: u64,
    pub drain_timeout_ms: u64,

    // Token registry
    pub max_tokens: usize,
    pub inactive_token_ttl_ms: u64,
    pub migrated_token_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidProgramId(String),
    /// Watermarks must satisfy low < high <= max
    InvalidWatermarks {
        low: usize,
        high: usize,
        max: usize,
    },
    ZeroValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidProgramId(id) => {
                write!(f, "CURVEFLOW_PROGRAM_ID must be a base58 Pubkey, got '{}'", id)
            }
            ConfigError::InvalidWatermarks { low, high, max } => write!(
                f,
                "watermarks must satisfy low < high <= max, got {} / {} / {}",
                low, high, max
            ),
            ConfigError::ZeroValue(name) => write!(f, "{} must be greater than zero", name),
        }
    }
}

impl std::error::Error for ConfigError {}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            program_id: DEFAULT_PROGRAM_ID.to_string(),
            watch_accounts: vec![],
            commitment: Commitment::Confirmed,
            max_queue_size: 5_000,
            high_water_mark: 4_000,
            low_water_mark: 1_000,
            batch_size: 100,
            process_interval_ms: 50,
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
            failure_window_ms: 60_000,
            max_reconnect_attempts: 10,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            ping_interval_ms: 30_000,
            drain_timeout_ms: 5_000,
            max_tokens: 2_000,
            inactive_token_ttl_ms: 3_600_000,
            migrated_token_ttl_ms: 600_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `CURVEFLOW_PROGRAM_ID` (default: pump.fun)
    /// - `CURVEFLOW_WATCH_ACCOUNTS` (comma-separated, default: empty)
    /// - `CURVEFLOW_COMMITMENT` (processed|confirmed|finalized, default: confirmed)
    /// - `CURVEFLOW_MAX_QUEUE_SIZE` (default: 5000)
    /// - `CURVEFLOW_HIGH_WATER_MARK` (default: 4000)
    /// - `CURVEFLOW_LOW_WATER_MARK` (default: 1000)
    /// - `CURVEFLOW_BATCH_SIZE` (default: 100)
    /// - `CURVEFLOW_PROCESS_INTERVAL_MS` (default: 50)
    /// - `CURVEFLOW_FAILURE_THRESHOLD` (default: 5)
    /// - `CURVEFLOW_RESET_TIMEOUT_MS` (default: 30000)
    /// - `CURVEFLOW_SUCCESS_THRESHOLD` (default: 2)
    /// - `CURVEFLOW_FAILURE_WINDOW_MS` (default: 60000)
    /// - `CURVEFLOW_MAX_RECONNECT_ATTEMPTS` (default: 10)
    /// - `CURVEFLOW_RECONNECT_BASE_DELAY_MS` (default: 1000)
    /// - `CURVEFLOW_RECONNECT_MAX_DELAY_MS` (default: 30000)
    /// - `CURVEFLOW_PING_INTERVAL_MS` (default: 30000)
    /// - `CURVEFLOW_DRAIN_TIMEOUT_MS` (default: 5000)
    /// - `CURVEFLOW_MAX_TOKENS` (default: 2000)
    /// - `CURVEFLOW_INACTIVE_TOKEN_TTL_MS` (default: 3600000)
    /// - `CURVEFLOW_MIGRATED_TOKEN_TTL_MS` (default: 600000)
    /// - `CURVEFLOW_CLEANUP_INTERVAL_MS` (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let watch_accounts = env::var("CURVEFLOW_WATCH_ACCOUNTS")
            .map(|s| {
                s.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let commitment = env::var("CURVEFLOW_COMMITMENT")
            .map(|s| Commitment::parse(&s))
            .unwrap_or(defaults.commitment);

        Self {
            program_id: env::var("CURVEFLOW_PROGRAM_ID").unwrap_or(defaults.program_id),
            watch_accounts,
            commitment,
            max_queue_size: env_parse("CURVEFLOW_MAX_QUEUE_SIZE", defaults.max_queue_size),
            high_water_mark: env_parse("CURVEFLOW_HIGH_WATER_MARK", defaults.high_water_mark),
            low_water_mark: env_parse("CURVEFLOW_LOW_WATER_MARK", defaults.low_water_mark),
            batch_size: env_parse("CURVEFLOW_BATCH_SIZE", defaults.batch_size),
            process_interval_ms: env_parse(
                "CURVEFLOW_PROCESS_INTERVAL_MS",
                defaults.process_interval_ms,
            ),
            failure_threshold: env_parse(
                "CURVEFLOW_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            ),
            reset_timeout_ms: env_parse("CURVEFLOW_RESET_TIMEOUT_MS", defaults.reset_timeout_ms),
            success_threshold: env_parse(
                "CURVEFLOW_SUCCESS_THRESHOLD",
                defaults.success_threshold,
            ),
            failure_window_ms: env_parse(
                "CURVEFLOW_FAILURE_WINDOW_MS",
                defaults.failure_window_ms,
            ),
            max_reconnect_attempts: env_parse(
                "CURVEFLOW_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_base_delay_ms: env_parse(
                "CURVEFLOW_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay_ms,
            ),
            reconnect_max_delay_ms: env_parse(
                "CURVEFLOW_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay_ms,
            ),
            ping_interval_ms: env_parse("CURVEFLOW_PING_INTERVAL_MS", defaults.ping_interval_ms),
            drain_timeout_ms: env_parse("CURVEFLOW_DRAIN_TIMEOUT_MS", defaults.drain_timeout_ms),
            max_tokens: env_parse("CURVEFLOW_MAX_TOKENS", defaults.max_tokens),
            inactive_token_ttl_ms: env_parse(
                "CURVEFLOW_INACTIVE_TOKEN_TTL_MS",
                defaults.inactive_token_ttl_ms,
            ),
            migrated_token_ttl_ms: env_parse(
                "CURVEFLOW_MIGRATED_TOKEN_TTL_MS",
                defaults.migrated_token_ttl_ms,
            ),
            cleanup_interval_ms: env_parse(
                "CURVEFLOW_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval_ms,
            ),
        }
    }

    /// Check invariants before any component is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program_id.len() < 32 || self.program_id.len() > 44 {
            return Err(ConfigError::InvalidProgramId(self.program_id.clone()));
        }
        if self.low_water_mark >= self.high_water_mark || self.high_water_mark > self.max_queue_size
        {
            return Err(ConfigError::InvalidWatermarks {
                low: self.low_water_mark,
                high: self.high_water_mark,
                max: self.max_queue_size,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroValue("CURVEFLOW_BATCH_SIZE"));
        }
        if self.process_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("CURVEFLOW_PROCESS_INTERVAL_MS"));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroValue("CURVEFLOW_FAILURE_THRESHOLD"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroValue("CURVEFLOW_SUCCESS_THRESHOLD"));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroValue("CURVEFLOW_MAX_TOKENS"));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("CURVEFLOW_CLEANUP_INTERVAL_MS"));
        }
        Ok(())
    }

    pub fn queue_config(&self) -> BackpressureQueueConfig {
        BackpressureQueueConfig {
            max_size: self.max_queue_size,
            high_water_mark: self.high_water_mark,
            low_water_mark: self.low_water_mark,
            batch_size: self.batch_size,
            process_interval_ms: self.process_interval_ms,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout_ms: self.reset_timeout_ms,
            success_threshold: self.success_threshold,
            failure_window_ms: self.failure_window_ms,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.reconnect_max_delay_ms,
            ping_interval_ms: self.ping_interval_ms,
            drain_timeout_ms: self.drain_timeout_ms,
        }
    }

    pub fn registry_config(&self) -> TokenRegistryConfig {
        TokenRegistryConfig {
            max_tokens: self.max_tokens,
            inactive_ttl_ms: self.inactive_token_ttl_ms,
            migrated_ttl_ms: self.migrated_token_ttl_ms,
            cleanup_interval_ms: self.cleanup_interval_ms,
        }
    }
}
