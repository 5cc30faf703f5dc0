// =============================================================================
// Central Application State — Vajra Trading Engine
// =============================================================================
//
// Ties the long-lived subsystems together so spawned loops can share one Arc.
// Each subsystem manages its own interior mutability; AppState adds only an
// error ring for operator inspection and a version counter bumped on every
// meaningful mutation.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::instruments::InstrumentsCatalog;
use crate::market_clock::MarketClock;
use crate::portfolio::Portfolio;
use crate::quotes::QuoteCache;
use crate::risk::{RiskConfig, RiskGate};
use crate::runtime_config::RuntimeConfig;
use crate::types::Paise;

/// Maximum number of recent errors retained for inspection.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Stable kind code (risk rejection code, broker error class).
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Shared state across all engine tasks, wrapped in `Arc` at startup.
pub struct AppState {
    /// Bumped on every meaningful state mutation.
    pub state_version: AtomicU64,

    pub runtime_config: RwLock<RuntimeConfig>,

    pub catalog: Arc<InstrumentsCatalog>,
    pub quotes: Arc<QuoteCache>,
    pub clock: Arc<MarketClock>,
    pub portfolio: Arc<Portfolio>,
    pub risk_gate: Arc<RiskGate>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire up every subsystem from the runtime configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        let portfolio = Arc::new(Portfolio::new(Paise::from_paise(
            config.initial_capital_paise,
        )));
        Self::with_portfolio(config, portfolio)
    }

    /// As [`new`](Self::new), with a portfolio restored from a snapshot.
    pub fn with_portfolio(config: RuntimeConfig, portfolio: Arc<Portfolio>) -> Self {
        let catalog = Arc::new(InstrumentsCatalog::new());

        let quotes = Arc::new(QuoteCache::new(
            config.quote_cache_capacity,
            Duration::from_secs(config.quote_ttl_closed_seconds),
        ));

        let clock = Arc::new(MarketClock::new(
            config.market_open,
            config.market_close,
            config.pre_close_minutes,
            config.expiry_flatten_before_close_minutes,
            config.holiday_calendar.iter().copied().collect(),
        ));

        let risk_gate = Arc::new(RiskGate::new(RiskConfig {
            risk_pct_per_trade: config.risk_pct_per_trade,
            min_risk_reward: config.min_risk_reward,
            max_sector_pct: config.max_sector_pct,
            max_trades_per_day: config.max_trades_per_day,
            index_underlyings: ["NIFTY", "BANKNIFTY", "FINNIFTY"]
                .into_iter()
                .map(String::from)
                .collect::<HashSet<_>>(),
            sector_map: config.sector_map.clone(),
        }));

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: RwLock::new(config),
            catalog,
            quotes,
            clock,
            portfolio,
            risk_gate,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error ring ──────────────────────────────────────────────────────

    pub fn push_error(&self, message: String, code: Option<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            code,
            at: Utc::now().to_rfc3339(),
        });
        let len = errors.len();
        if len > MAX_RECENT_ERRORS {
            errors.drain(0..len - MAX_RECENT_ERRORS);
        }
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("version", &self.current_state_version())
            .field("catalog", &self.catalog)
            .field("portfolio", &self.portfolio)
            .field("clock", &self.clock)
            .finish()
    }
}
