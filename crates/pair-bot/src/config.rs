//! Configuration for pair-bot.
//!
//! Supports loading from TOML file with environment variable overrides.
//! All pair-tracking policy knobs and exchange constants are defined here.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use pair_common::AssetClass;

/// Top-level configuration for pair-bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Trading mode: paper or replay.
    pub mode: TradingMode,

    /// Logging level.
    pub log_level: String,

    /// Pair tracker policy.
    pub tracker: TrackerConfig,

    /// Audit sink configuration.
    pub audit: AuditConfig,
}

/// Trading mode determines how the harness drives the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    /// Simulated execution against a paper gateway.
    Paper,
    /// Snapshot replay from a JSONL file.
    Replay,
}

impl TradingMode {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "paper" => Some(TradingMode::Paper),
            "replay" => Some(TradingMode::Replay),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Replay => write!(f, "replay"),
        }
    }
}

/// Immutable per-run policy for the pair lifecycle manager.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Asset class the tracker is allowed to trade. Hard filter.
    pub asset_class: AssetClass,

    /// Maximum pairs concurrently in PENDING_ENTRY or WAITING_HEDGE.
    pub max_open_pairs: usize,

    /// Minimum shares per pair.
    pub min_shares_per_pair: Decimal,

    /// Maximum shares per pair.
    pub max_shares_per_pair: Decimal,

    /// Target combined price for a hedged pair (entry + hedge < 1.00).
    pub target_combined_price: Decimal,

    /// Maximum combined price accepted when emergency hedging.
    pub emergency_max_combined_price: Decimal,

    /// Price offset added to the ask when placing an emergency order.
    pub emergency_price_offset: Decimal,

    /// Price offset added to the ask when placing the entry order.
    pub entry_price_offset: Decimal,

    /// Entry is refused when the expensive side's ask exceeds this ceiling.
    pub entry_price_ceiling: Decimal,

    /// Observation delay after a market is first seen before trading it.
    pub startup_delay: Duration,

    /// Minimum interval between successive pair openings.
    pub open_cooldown: Duration,

    /// Unconfirmed entry orders are cancelled after this long.
    pub entry_timeout: Duration,

    /// Terminal pairs are retained this long before cleanup removes them.
    pub retention_window: Duration,

    /// Exchange minimum notional order value per leg.
    pub min_order_notional: Decimal,

    /// Exchange minimum tick price; computed hedge prices below this fail.
    pub min_tick_price: Decimal,

    /// Lower bound of the exchange's valid price band.
    pub min_valid_price: Decimal,

    /// Upper bound of the exchange's valid price band.
    pub max_valid_price: Decimal,

    /// Hedge prices below this are "cheap side" and trigger the exposure cap.
    pub cheap_side_price_threshold: Decimal,

    /// Maximum notional allowed on the entry leg when the cheap-side cap
    /// applies.
    pub max_entry_notional: Decimal,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            asset_class: AssetClass::Crypto,
            max_open_pairs: 3,
            min_shares_per_pair: dec!(5),
            max_shares_per_pair: dec!(100),
            target_combined_price: dec!(0.95),
            emergency_max_combined_price: dec!(1.05),
            emergency_price_offset: dec!(0.02),
            entry_price_offset: dec!(0.01),
            entry_price_ceiling: dec!(0.90),
            startup_delay: Duration::from_secs(120),
            open_cooldown: Duration::from_secs(30),
            entry_timeout: Duration::from_secs(60),
            retention_window: Duration::from_secs(3600),
            min_order_notional: dec!(1.00), // exchange minimum $1
            min_tick_price: dec!(0.05),
            min_valid_price: dec!(0.01),
            max_valid_price: dec!(0.99),
            cheap_side_price_threshold: dec!(0.10),
            max_entry_notional: dec!(50),
        }
    }
}

/// Audit sink configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Whether audit events are emitted at all.
    pub enabled: bool,
    /// Bounded channel capacity; events are dropped when full.
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 1024,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            log_level: "info".to_string(),
            tracker: TrackerConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("PAIR_BOT_MODE") {
            if let Some(m) = TradingMode::from_str(&mode) {
                self.mode = m;
            }
        }
        if let Ok(level) = std::env::var("PAIR_BOT_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(max) = std::env::var("PAIR_BOT_MAX_OPEN_PAIRS") {
            if let Ok(n) = max.parse::<usize>() {
                self.tracker.max_open_pairs = n;
            }
        }
        if let Ok(secs) = std::env::var("PAIR_BOT_OPEN_COOLDOWN_SECS") {
            if let Ok(n) = secs.parse::<u64>() {
                self.tracker.open_cooldown = Duration::from_secs(n);
            }
        }
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        let t = &self.tracker;

        if t.max_open_pairs == 0 {
            bail!("max_open_pairs must be at least 1");
        }
        if t.min_shares_per_pair <= Decimal::ZERO {
            bail!("min_shares_per_pair must be positive");
        }
        if t.min_shares_per_pair > t.max_shares_per_pair {
            bail!("min_shares_per_pair cannot exceed max_shares_per_pair");
        }
        if t.target_combined_price <= Decimal::ZERO || t.target_combined_price >= Decimal::ONE {
            bail!("target_combined_price must be between 0 and 1");
        }
        if t.emergency_max_combined_price < Decimal::ONE {
            bail!("emergency_max_combined_price below 1.0 would refuse every unwind");
        }
        if t.entry_price_ceiling >= t.target_combined_price {
            bail!("entry_price_ceiling must leave room below target_combined_price");
        }
        if t.min_valid_price >= t.max_valid_price {
            bail!("min_valid_price must be below max_valid_price");
        }
        if t.min_tick_price < t.min_valid_price {
            bail!("min_tick_price cannot be below min_valid_price");
        }
        if t.min_order_notional <= Decimal::ZERO {
            bail!("min_order_notional must be positive");
        }
        if t.max_entry_notional < t.min_order_notional {
            bail!("max_entry_notional cannot be below min_order_notional");
        }
        if self.audit.channel_capacity == 0 {
            bail!("audit channel_capacity must be at least 1");
        }

        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    tracker: TrackerToml,
    #[serde(default)]
    audit: AuditToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    mode: String,
    log_level: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            mode: "paper".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TrackerToml {
    asset_class: String,
    max_open_pairs: usize,
    min_shares_per_pair: f64,
    max_shares_per_pair: f64,
    target_combined_price: f64,
    emergency_max_combined_price: f64,
    emergency_price_offset: f64,
    entry_price_offset: f64,
    entry_price_ceiling: f64,
    startup_delay_secs: u64,
    open_cooldown_secs: u64,
    entry_timeout_secs: u64,
    retention_window_secs: u64,
    min_order_notional: f64,
    min_tick_price: f64,
    min_valid_price: f64,
    max_valid_price: f64,
    cheap_side_price_threshold: f64,
    max_entry_notional: f64,
}

impl Default for TrackerToml {
    fn default() -> Self {
        let d = TrackerConfig::default();
        Self {
            asset_class: "crypto".to_string(),
            max_open_pairs: d.max_open_pairs,
            min_shares_per_pair: 5.0,
            max_shares_per_pair: 100.0,
            target_combined_price: 0.95,
            emergency_max_combined_price: 1.05,
            emergency_price_offset: 0.02,
            entry_price_offset: 0.01,
            entry_price_ceiling: 0.90,
            startup_delay_secs: d.startup_delay.as_secs(),
            open_cooldown_secs: d.open_cooldown.as_secs(),
            entry_timeout_secs: d.entry_timeout.as_secs(),
            retention_window_secs: d.retention_window.as_secs(),
            min_order_notional: 1.0,
            min_tick_price: 0.05,
            min_valid_price: 0.01,
            max_valid_price: 0.99,
            cheap_side_price_threshold: 0.10,
            max_entry_notional: 50.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AuditToml {
    enabled: bool,
    channel_capacity: usize,
}

impl Default for AuditToml {
    fn default() -> Self {
        let d = AuditConfig::default();
        Self {
            enabled: d.enabled,
            channel_capacity: d.channel_capacity,
        }
    }
}

/// Convert an f64 config value to Decimal, falling back to zero on
/// non-finite input (validation rejects zero where it matters).
fn f64_to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

fn asset_class_from_str(s: &str) -> AssetClass {
    match s.to_lowercase().as_str() {
        "crypto" => AssetClass::Crypto,
        "sports" => AssetClass::Sports,
        "politics" => AssetClass::Politics,
        _ => AssetClass::Other,
    }
}

impl From<TomlConfig> for BotConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            mode: TradingMode::from_str(&toml.general.mode).unwrap_or(TradingMode::Paper),
            log_level: toml.general.log_level,
            tracker: TrackerConfig {
                asset_class: asset_class_from_str(&toml.tracker.asset_class),
                max_open_pairs: toml.tracker.max_open_pairs,
                min_shares_per_pair: f64_to_decimal(toml.tracker.min_shares_per_pair),
                max_shares_per_pair: f64_to_decimal(toml.tracker.max_shares_per_pair),
                target_combined_price: f64_to_decimal(toml.tracker.target_combined_price),
                emergency_max_combined_price: f64_to_decimal(
                    toml.tracker.emergency_max_combined_price,
                ),
                emergency_price_offset: f64_to_decimal(toml.tracker.emergency_price_offset),
                entry_price_offset: f64_to_decimal(toml.tracker.entry_price_offset),
                entry_price_ceiling: f64_to_decimal(toml.tracker.entry_price_ceiling),
                startup_delay: Duration::from_secs(toml.tracker.startup_delay_secs),
                open_cooldown: Duration::from_secs(toml.tracker.open_cooldown_secs),
                entry_timeout: Duration::from_secs(toml.tracker.entry_timeout_secs),
                retention_window: Duration::from_secs(toml.tracker.retention_window_secs),
                min_order_notional: f64_to_decimal(toml.tracker.min_order_notional),
                min_tick_price: f64_to_decimal(toml.tracker.min_tick_price),
                min_valid_price: f64_to_decimal(toml.tracker.min_valid_price),
                max_valid_price: f64_to_decimal(toml.tracker.max_valid_price),
                cheap_side_price_threshold: f64_to_decimal(
                    toml.tracker.cheap_side_price_threshold,
                ),
                max_entry_notional: f64_to_decimal(toml.tracker.max_entry_notional),
            },
            audit: AuditConfig {
                enabled: toml.audit.enabled,
                channel_capacity: toml.audit.channel_capacity,
            },
        }
    }
}
