//! Application configuration
//!
//! Centralized configuration management using the `config` crate.
//! Configuration is layered: built-in defaults, `config/default`, `config/{RUN_MODE}`
//! and finally `CONSULTA__*` environment variables.

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            timeout_secs: default_timeout(),
            cors_origins: Vec::new(),
        }
    }
}

/// Database configuration
///
/// Without a URL the server runs on the in-process store.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: true,
        }
    }
}

/// Redis configuration
///
/// Without a URL availability lives in process memory.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix for every key written by this service
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "consulta".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret
    pub jwt_secret: String,

    /// JWT token expiration in minutes
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_minutes: i64,

    /// Media token lifetime in seconds
    #[serde(default = "default_media_token_ttl")]
    pub media_token_ttl_secs: i64,

    /// Secret for media tokens; falls back to `jwt_secret`
    #[serde(default)]
    pub media_token_secret: Option<String>,
}

fn default_jwt_expiration() -> i64 {
    1440 // 24 hours
}

fn default_media_token_ttl() -> i64 {
    300
}

/// Relay matching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Seconds a candidate has to accept before the offer moves on
    #[serde(default = "default_relay_timeout")]
    pub relay_timeout_secs: u64,

    /// Full passes over the candidate list before giving up
    #[serde(default = "default_max_relay_cycles")]
    pub max_relay_cycles: u32,

    /// Relay driver tick interval in milliseconds
    #[serde(default = "default_relay_tick")]
    pub relay_tick_millis: u64,

    /// Minutes of talk time a requester must be able to afford to start
    #[serde(default = "default_min_start_minutes")]
    pub min_start_balance_minutes: i64,
}

fn default_relay_timeout() -> u64 {
    20
}

fn default_max_relay_cycles() -> u32 {
    3
}

fn default_relay_tick() -> u64 {
    1000
}

fn default_min_start_minutes() -> i64 {
    1
}

impl MatchingConfig {
    pub fn relay_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.relay_timeout_secs as i64)
    }

    pub fn relay_tick(&self) -> Duration {
        Duration::from_millis(self.relay_tick_millis)
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            relay_timeout_secs: default_relay_timeout(),
            max_relay_cycles: default_max_relay_cycles(),
            relay_tick_millis: default_relay_tick(),
            min_start_balance_minutes: default_min_start_minutes(),
        }
    }
}

/// Worker availability configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AvailabilityConfig {
    /// A worker without a heartbeat for this long counts as offline
    #[serde(default = "default_heartbeat_ttl")]
    pub heartbeat_ttl_secs: u64,

    /// Upper bound on the candidate list
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Slots reserved for workers in the requester's preferred region
    #[serde(default = "default_region_slots")]
    pub region_priority_slots: usize,
}

fn default_heartbeat_ttl() -> u64 {
    90
}

fn default_max_candidates() -> usize {
    10
}

fn default_region_slots() -> usize {
    5
}

impl AvailabilityConfig {
    pub fn heartbeat_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_ttl_secs as i64)
    }
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: default_heartbeat_ttl(),
            max_candidates: default_max_candidates(),
            region_priority_slots: default_region_slots(),
        }
    }
}

/// Metered billing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Price of one connected minute in minor units
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: i64,

    /// Calls shorter than this are free
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: i64,

    /// Billing sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Charge a started final minute in full
    #[serde(default = "default_true")]
    pub round_up_final_minute: bool,

    /// Sessions billed concurrently by one sweep
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

fn default_rate_per_minute() -> i64 {
    14_000
}

fn default_grace_period() -> i64 {
    15
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_sweep_concurrency() -> usize {
    16
}

impl BillingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            rate_per_minute: default_rate_per_minute(),
            grace_period_secs: default_grace_period(),
            sweep_interval_secs: default_sweep_interval(),
            round_up_final_minute: true,
            sweep_concurrency: default_sweep_concurrency(),
        }
    }
}

/// Revenue split configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Worker share of consultation charges
    #[serde(default = "default_payee_rate")]
    pub consultation_payee_rate: Decimal,

    /// Worker share of gifts
    #[serde(default = "default_payee_rate")]
    pub gift_payee_rate: Decimal,

    /// Share of each present referrer
    #[serde(default = "default_referrer_rate")]
    pub referrer_rate: Decimal,

    #[serde(default = "default_silver_threshold")]
    pub silver_threshold: i64,

    #[serde(default = "default_gold_threshold")]
    pub gold_threshold: i64,

    #[serde(default = "default_platinum_threshold")]
    pub platinum_threshold: i64,
}

fn default_payee_rate() -> Decimal {
    dec!(0.6)
}

fn default_referrer_rate() -> Decimal {
    dec!(0.05)
}

fn default_silver_threshold() -> i64 {
    10_000
}

fn default_gold_threshold() -> i64 {
    100_000
}

fn default_platinum_threshold() -> i64 {
    500_000
}

impl SettlementConfig {
    /// Ascending spend thresholds for silver, gold and platinum
    pub fn tier_thresholds(&self) -> [i64; 3] {
        [
            self.silver_threshold,
            self.gold_threshold,
            self.platinum_threshold,
        ]
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            consultation_payee_rate: default_payee_rate(),
            gift_payee_rate: default_payee_rate(),
            referrer_rate: default_referrer_rate(),
            silver_threshold: default_silver_threshold(),
            gold_threshold: default_gold_threshold(),
            platinum_threshold: default_platinum_threshold(),
        }
    }
}

/// Network quality thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_excellent_latency")]
    pub excellent_latency_ms: u32,
    #[serde(default = "default_excellent_jitter")]
    pub excellent_jitter_ms: u32,
    #[serde(default = "default_good_latency")]
    pub good_latency_ms: u32,
    #[serde(default = "default_good_jitter")]
    pub good_jitter_ms: u32,
    #[serde(default = "default_fair_latency")]
    pub fair_latency_ms: u32,
    #[serde(default = "default_fair_jitter")]
    pub fair_jitter_ms: u32,

    /// Packet loss at or above this percentage is always poor
    #[serde(default = "default_max_packet_loss")]
    pub max_packet_loss_percent: f64,

    /// How long a quality assessment stays cached
    #[serde(default = "default_quality_ttl")]
    pub quality_cache_ttl_secs: u64,
}

fn default_excellent_latency() -> u32 {
    100
}

fn default_excellent_jitter() -> u32 {
    15
}

fn default_good_latency() -> u32 {
    200
}

fn default_good_jitter() -> u32 {
    30
}

fn default_fair_latency() -> u32 {
    300
}

fn default_fair_jitter() -> u32 {
    50
}

fn default_max_packet_loss() -> f64 {
    10.0
}

fn default_quality_ttl() -> u64 {
    60
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            excellent_latency_ms: default_excellent_latency(),
            excellent_jitter_ms: default_excellent_jitter(),
            good_latency_ms: default_good_latency(),
            good_jitter_ms: default_good_jitter(),
            fair_latency_ms: default_fair_latency(),
            fair_jitter_ms: default_fair_jitter(),
            max_packet_loss_percent: default_max_packet_loss(),
            quality_cache_ttl_secs: default_quality_ttl(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config files
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("auth.jwt_expiration_minutes", 1440)?
            .set_default("auth.media_token_ttl_secs", 300)?
            .set_default("matching.relay_timeout_secs", 20)?
            .set_default("matching.max_relay_cycles", 3)?
            .set_default("availability.heartbeat_ttl_secs", 90)?
            .set_default("billing.rate_per_minute", 14_000)?
            .set_default("billing.grace_period_secs", 15)?
            .set_default("billing.sweep_interval_secs", 30)?
            .set_default("settlement.consultation_payee_rate", "0.6")?
            .set_default("settlement.gift_payee_rate", "0.6")?
            .set_default("settlement.referrer_rate", "0.05")?
            // Load config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Environment variables with CONSULTA__ prefix
            .add_source(
                Environment::with_prefix("CONSULTA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CONSULTA").separator("__"))
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the services cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settlement.validate()?;

        if self.billing.rate_per_minute <= 0 {
            return Err(ConfigError::Message(
                "billing.rate_per_minute must be positive".to_string(),
            ));
        }
        if self.billing.sweep_concurrency == 0 {
            return Err(ConfigError::Message(
                "billing.sweep_concurrency must be at least 1".to_string(),
            ));
        }
        if self.matching.max_relay_cycles == 0 {
            return Err(ConfigError::Message(
                "matching.max_relay_cycles must be at least 1".to_string(),
            ));
        }
        if self.availability.max_candidates == 0
            || self.availability.region_priority_slots > self.availability.max_candidates
        {
            return Err(ConfigError::Message(
                "availability.region_priority_slots must not exceed a non-zero max_candidates"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl SettlementConfig {
    /// Payee plus both referrer shares must fit in the charge
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates = [
            ("consultation_payee_rate", self.consultation_payee_rate),
            ("gift_payee_rate", self.gift_payee_rate),
            ("referrer_rate", self.referrer_rate),
        ];
        for (name, rate) in rates {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(ConfigError::Message(format!(
                    "settlement.{} must be between 0 and 1, got {}",
                    name, rate
                )));
            }
        }

        let referrers = self.referrer_rate * dec!(2);
        for (name, payee) in [
            ("consultation", self.consultation_payee_rate),
            ("gift", self.gift_payee_rate),
        ] {
            if payee + referrers > Decimal::ONE {
                return Err(ConfigError::Message(format!(
                    "settlement: {} payee rate {} plus two referrer shares exceeds 1",
                    name, payee
                )));
            }
        }

        let [silver, gold, platinum] = self.tier_thresholds();
        if !(0 < silver && silver < gold && gold < platinum) {
            return Err(ConfigError::Message(
                "settlement tier thresholds must be positive and strictly ascending".to_string(),
            ));
        }
        Ok(())
    }
}
