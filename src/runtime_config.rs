// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Every tunable lives here and is passed down explicitly at startup; nothing
// in the core reads process-wide state. Persistence uses the atomic tmp +
// rename pattern, and all fields carry serde defaults so adding a field never
// breaks loading an older config file.
//
// Broker credentials are NOT part of this file — they come from the
// environment only and are never persisted.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fees::FeeModel;
use crate::types::EngineMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_initial_capital_paise() -> i64 {
    // 10,00,000 rupees.
    100_000_000
}

fn default_risk_pct_per_trade() -> f64 {
    0.01
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_min_agreement() -> usize {
    2
}

fn default_min_risk_reward() -> f64 {
    1.5
}

fn default_max_sector_pct() -> f64 {
    0.3
}

fn default_max_position_pct() -> f64 {
    0.25
}

fn default_max_trades_per_day() -> u32 {
    50
}

fn default_tick_interval_seconds() -> u64 {
    30
}

fn default_monitor_interval_seconds() -> u64 {
    5
}

fn default_persist_interval_seconds() -> u64 {
    30
}

fn default_order_timeout_seconds() -> u64 {
    15
}

fn default_quote_ttl_open_seconds() -> u64 {
    30
}

fn default_quote_ttl_closed_seconds() -> u64 {
    120
}

fn default_quote_cache_capacity() -> usize {
    512
}

fn default_rate_limit_per_second() -> f64 {
    3.0
}

fn default_rate_limit_burst() -> u32 {
    10
}

fn default_rate_limit_per_minute() -> u32 {
    180
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_open_seconds() -> u64 {
    60
}

fn default_ban_refresh_seconds() -> u64 {
    900
}

fn default_market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).expect("valid time")
}

fn default_market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).expect("valid time")
}

fn default_pre_close_minutes() -> i64 {
    10
}

fn default_expiry_flatten_minutes() -> i64 {
    15
}

fn default_entry_stop_pct() -> f64 {
    0.02
}

fn default_entry_rr() -> f64 {
    2.0
}

fn default_paper_slippage_ticks() -> i64 {
    1
}

fn default_state_file() -> String {
    "vajra_state.json".to_string()
}

fn default_allowed_underlyings() -> Vec<String> {
    vec!["NIFTY".to_string(), "BANKNIFTY".to_string()]
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Vajra engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Mode & capital ------------------------------------------------------

    /// paper / live / backtest; selects the executor protocol.
    #[serde(default)]
    pub mode: EngineMode,

    /// Seed cash on first run, in paise.
    #[serde(default = "default_initial_capital_paise")]
    pub initial_capital_paise: i64,

    /// Ignore any persisted snapshot on paper startup and reseed.
    #[serde(default)]
    pub paper_reset_on_start: bool,

    // --- Universe ------------------------------------------------------------

    /// Whitelist of underlyings scanned for entries.
    #[serde(default = "default_allowed_underlyings")]
    pub allowed_underlyings: Vec<String>,

    /// Underlying -> sector, for the sector exposure cap.
    #[serde(default)]
    pub sector_map: HashMap<String, String>,

    // --- Risk ----------------------------------------------------------------

    #[serde(default = "default_risk_pct_per_trade")]
    pub risk_pct_per_trade: f64,

    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,

    #[serde(default = "default_max_sector_pct")]
    pub max_sector_pct: f64,

    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,

    /// Strategies may opt in to averaging an existing position.
    #[serde(default)]
    pub allow_averaging: bool,

    // --- Signals -------------------------------------------------------------

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum number of strategies agreeing in direction.
    #[serde(default = "default_min_agreement")]
    pub min_agreement: usize,

    // --- Entry level derivation ---------------------------------------------

    /// Stop distance for entries as a fraction of entry price when the
    /// strategy does not supply one.
    #[serde(default = "default_entry_stop_pct")]
    pub entry_stop_pct: f64,

    /// Take-profit as a multiple of the stop distance.
    #[serde(default = "default_entry_rr")]
    pub entry_rr: f64,

    // --- Scheduling ----------------------------------------------------------

    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,

    #[serde(default = "default_persist_interval_seconds")]
    pub persist_interval_seconds: u64,

    #[serde(default = "default_order_timeout_seconds")]
    pub order_timeout_seconds: u64,

    #[serde(default = "default_ban_refresh_seconds")]
    pub ban_refresh_seconds: u64,

    // --- Quote cache ---------------------------------------------------------

    #[serde(default = "default_quote_ttl_open_seconds")]
    pub quote_ttl_open_seconds: u64,

    #[serde(default = "default_quote_ttl_closed_seconds")]
    pub quote_ttl_closed_seconds: u64,

    #[serde(default = "default_quote_cache_capacity")]
    pub quote_cache_capacity: usize,

    // --- Broker protection ---------------------------------------------------

    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: f64,

    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,

    #[serde(default = "default_cb_open_seconds")]
    pub cb_open_seconds: u64,

    // --- Market hours --------------------------------------------------------

    #[serde(default = "default_market_open")]
    pub market_open: NaiveTime,

    #[serde(default = "default_market_close")]
    pub market_close: NaiveTime,

    #[serde(default = "default_pre_close_minutes")]
    pub pre_close_minutes: i64,

    /// Start of the forced-flatten window, minutes before close.
    #[serde(default = "default_expiry_flatten_minutes")]
    pub expiry_flatten_before_close_minutes: i64,

    #[serde(default)]
    pub holiday_calendar: Vec<NaiveDate>,

    // --- Fees, slippage, persistence ----------------------------------------

    #[serde(default)]
    pub fee_model: FeeModel,

    #[serde(default = "default_paper_slippage_ticks")]
    pub paper_slippage_ticks: i64,

    #[serde(default = "default_state_file")]
    pub state_file: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            mode = %config.mode,
            underlyings = ?config.allowed_underlyings,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration using an atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize runtime config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.mode, EngineMode::Paper);
        assert_eq!(cfg.initial_capital_paise, 100_000_000);
        assert!(!cfg.paper_reset_on_start);
        assert!((cfg.risk_pct_per_trade - 0.01).abs() < f64::EPSILON);
        assert!((cfg.min_confidence - 0.7).abs() < f64::EPSILON);
        assert!((cfg.min_risk_reward - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.order_timeout_seconds, 15);
        assert_eq!(cfg.expiry_flatten_before_close_minutes, 15);
        assert_eq!(cfg.rate_limit_per_minute, 180);
        assert_eq!(cfg.fee_model, FeeModel::Auto);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, EngineMode::Paper);
        assert_eq!(cfg.allowed_underlyings, vec!["NIFTY", "BANKNIFTY"]);
        assert_eq!(cfg.circuit_breaker_failure_threshold, 5);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "mode": "live", "allowed_underlyings": ["RELIANCE"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, EngineMode::Live);
        assert_eq!(cfg.allowed_underlyings, vec!["RELIANCE"]);
        assert_eq!(cfg.tick_interval_seconds, 30);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.mode, cfg2.mode);
        assert_eq!(cfg.allowed_underlyings, cfg2.allowed_underlyings);
        assert_eq!(cfg.market_open, cfg2.market_open);
        assert_eq!(cfg.holiday_calendar, cfg2.holiday_calendar);
    }

    #[test]
    fn flat_fee_model_round_trips() {
        let json = r#"{ "fee_model": { "kind": "flat_per_trade", "paise": 20 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.fee_model, FeeModel::FlatPerTrade { paise: 20 });
    }
}
