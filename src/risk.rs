// =============================================================================
// Risk Gate — ordered pre-trade checks protecting capital
// =============================================================================
//
// Checks run in a fixed order and the first failure wins:
//   1. Market hours (entries only; exits are always allowed)
//   2. Regulator F&O ban list (entries only)
//   3. Duplicate position (averaging is opt-in per strategy)
//   4. Per-index cap: one active structure per underlying index
//   5. Per-trade risk cap: |entry - stop| * qty <= risk_pct * equity
//   6. Risk-reward floor, sign-adjusted for shorts
//   7. Sector exposure cap on aggregate notional
//   8. Cash (equity longs) / margin (live F&O)
//   9. Daily trade cap
//
// The gate itself is stateless over a `RiskContext` the caller assembles, so
// it never touches the broker or holds the portfolio lock. Failures are typed
// and carry a stable kind code; transient ones (margin API unavailable) may
// be retried next tick.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::instruments::Instrument;
use crate::types::{Paise, ProductKind, Side};

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskRejection {
    #[error("market is not open for new entries")]
    MarketClosed,

    #[error("{symbol} is on the F&O ban list")]
    SymbolBanned { symbol: String },

    #[error("position already exists in {symbol} and averaging is not enabled")]
    DuplicatePosition { symbol: String },

    #[error("an active structure already exists on index {underlying}")]
    IndexCapReached { underlying: String },

    #[error("entry requires a stop-loss")]
    MissingStop,

    #[error("per-trade risk {risk} exceeds cap {cap}")]
    RiskCapExceeded { risk: Paise, cap: Paise },

    #[error("risk-reward {rr:.2} below minimum {min:.2}")]
    RiskRewardTooLow { rr: f64, min: f64 },

    #[error("sector {sector} notional {notional} would exceed cap {cap}")]
    SectorCapExceeded { sector: String, notional: Paise, cap: Paise },

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: Paise, available: Paise },

    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Paise, available: Paise },

    #[error("margin check unavailable: {0}")]
    MarginUnavailable(String),

    #[error("daily trade limit {limit} reached")]
    TradeLimitReached { limit: u32 },
}

impl RiskRejection {
    /// Stable machine-readable code, logged with every rejection.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MarketClosed => "MARKET_CLOSED",
            Self::SymbolBanned { .. } => "SYMBOL_BANNED",
            Self::DuplicatePosition { .. } => "DUPLICATE_POSITION",
            Self::IndexCapReached { .. } => "INDEX_CAP",
            Self::MissingStop => "MISSING_STOP",
            Self::RiskCapExceeded { .. } => "RISK_CAP",
            Self::RiskRewardTooLow { .. } => "RISK_REWARD",
            Self::SectorCapExceeded { .. } => "SECTOR_CAP",
            Self::InsufficientCash { .. } => "INSUFFICIENT_CASH",
            Self::InsufficientMargin { .. } => "INSUFFICIENT_MARGIN",
            Self::MarginUnavailable(_) => "MARGIN_UNAVAILABLE",
            Self::TradeLimitReached { .. } => "TRADE_LIMIT",
        }
    }

    /// Transient failures may pass on the next tick without any change to the
    /// candidate.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MarginUnavailable(_) | Self::MarketClosed)
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A trade the engine wants to place, as seen by the gate.
#[derive(Debug, Clone)]
pub struct TradeCandidate {
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: i64,
    pub entry: Paise,
    pub stop_loss: Option<Paise>,
    pub take_profit: Option<Paise>,
    pub product: ProductKind,
    /// False for exits, which skip the entry-only checks.
    pub is_entry: bool,
    /// Strategy opted in to averaging an existing position.
    pub allow_averaging: bool,
    /// Estimated fees for the cash check.
    pub fees_estimate: Paise,
}

/// Exposure of one open position, pre-resolved by the caller.
#[derive(Debug, Clone)]
pub struct PositionExposure {
    pub symbol: String,
    pub underlying: String,
    pub sector: String,
    pub notional: Paise,
}

/// Margin numbers for live F&O entries.
#[derive(Debug, Clone, Copy)]
pub struct MarginCheck {
    pub required: Paise,
    pub available: Paise,
}

/// Everything the gate needs about the world, assembled without holding any
/// long-lived lock.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub can_enter: bool,
    pub cash: Paise,
    pub equity: Paise,
    pub exposures: Vec<PositionExposure>,
    /// None when no margin check applies (equity, paper mode).
    pub margin: Option<MarginCheck>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Per-trade risk cap as a fraction of equity (default 0.01).
    pub risk_pct_per_trade: f64,
    /// Minimum risk-reward ratio (default 1.5).
    pub min_risk_reward: f64,
    /// Sector notional cap as a fraction of equity (default 0.3).
    pub max_sector_pct: f64,
    /// Daily trade cap (entries only).
    pub max_trades_per_day: u32,
    /// Underlyings treated as indices for the per-index structure cap.
    pub index_underlyings: HashSet<String>,
    /// Underlying -> sector. Anything unmapped is its own sector.
    pub sector_map: HashMap<String, String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_pct_per_trade: 0.01,
            min_risk_reward: 1.5,
            max_sector_pct: 0.3,
            max_trades_per_day: 50,
            index_underlyings: ["NIFTY", "BANKNIFTY", "FINNIFTY"]
                .into_iter()
                .map(String::from)
                .collect(),
            sector_map: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

struct DailyCounters {
    date: String,
    entries_today: u32,
}

pub struct RiskGate {
    config: RiskConfig,
    ban_list: RwLock<HashSet<String>>,
    daily: RwLock<DailyCounters>,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Self {
            config,
            ban_list: RwLock::new(HashSet::new()),
            daily: RwLock::new(DailyCounters { date: today, entries_today: 0 }),
        }
    }

    /// Replace the ban list with a fresh regulator dump. On refresh failure
    /// the caller simply skips this call and the prior list is retained.
    pub fn update_ban_list(&self, banned: HashSet<String>) {
        let count = banned.len();
        *self.ban_list.write() = banned;
        info!(count, "F&O ban list refreshed");
    }

    pub fn is_banned(&self, underlying: &str) -> bool {
        self.ban_list.read().contains(underlying)
    }

    /// Record an accepted entry toward the daily cap.
    pub fn record_entry(&self) {
        self.maybe_reset_daily();
        self.daily.write().entries_today += 1;
    }

    /// Sector for an underlying; None when no sector is configured (the
    /// sector cap then does not apply to it).
    pub fn sector_for(&self, underlying: &str) -> Option<String> {
        self.config.sector_map.get(underlying).cloned()
    }

    /// Evaluate a candidate trade. Returns `Ok(())` (pass) or the FIRST
    /// failing check.
    pub fn evaluate(&self, c: &TradeCandidate, ctx: &RiskContext) -> Result<(), RiskRejection> {
        self.maybe_reset_daily();

        // Exits bypass every entry-only protection.
        if !c.is_entry {
            return Ok(());
        }

        // 1. Market hours.
        if !ctx.can_enter {
            return Err(RiskRejection::MarketClosed);
        }

        // 2. Ban list (keyed by underlying; all strikes of a banned name are
        //    blocked).
        if self.is_banned(&c.instrument.underlying) {
            return Err(RiskRejection::SymbolBanned { symbol: c.instrument.symbol.clone() });
        }

        // 3. Duplicate position.
        let has_position = ctx.exposures.iter().any(|e| e.symbol == c.instrument.symbol);
        if has_position && !c.allow_averaging {
            return Err(RiskRejection::DuplicatePosition { symbol: c.instrument.symbol.clone() });
        }

        // 4. One structure per underlying index.
        if self.config.index_underlyings.contains(&c.instrument.underlying) {
            let other = ctx
                .exposures
                .iter()
                .any(|e| e.underlying == c.instrument.underlying && e.symbol != c.instrument.symbol);
            if other {
                return Err(RiskRejection::IndexCapReached {
                    underlying: c.instrument.underlying.clone(),
                });
            }
        }

        // 5. Per-trade risk cap.
        let stop = c.stop_loss.ok_or(RiskRejection::MissingStop)?;
        let stop_distance = (c.entry - stop).abs();
        let risk = stop_distance.times(c.quantity);
        let cap = Paise::from_paise(
            (ctx.equity.paise() as f64 * self.config.risk_pct_per_trade) as i64,
        );
        if risk > cap {
            return Err(RiskRejection::RiskCapExceeded { risk, cap });
        }

        // 6. Risk-reward, sign-adjusted.
        if let Some(target) = c.take_profit {
            let reward = match c.side {
                Side::Buy => target - c.entry,
                Side::Sell => c.entry - target,
            };
            if stop_distance.paise() > 0 {
                let rr = reward.paise() as f64 / stop_distance.paise() as f64;
                if rr < self.config.min_risk_reward {
                    return Err(RiskRejection::RiskRewardTooLow {
                        rr,
                        min: self.config.min_risk_reward,
                    });
                }
            }
        }

        // 7. Sector exposure cap (only for underlyings with a configured
        //    sector).
        let candidate_notional = c.entry.times(c.quantity);
        if let Some(sector) = self.sector_for(&c.instrument.underlying) {
            let sector_notional: Paise = ctx
                .exposures
                .iter()
                .filter(|e| e.sector == sector)
                .map(|e| e.notional)
                .sum();
            let total = sector_notional + candidate_notional;
            let sector_cap = Paise::from_paise(
                (ctx.equity.paise() as f64 * self.config.max_sector_pct) as i64,
            );
            if total > sector_cap {
                return Err(RiskRejection::SectorCapExceeded {
                    sector,
                    notional: total,
                    cap: sector_cap,
                });
            }
        }

        // 8. Cash / margin.
        match ctx.margin {
            Some(m) => {
                if m.required > m.available {
                    return Err(RiskRejection::InsufficientMargin {
                        required: m.required,
                        available: m.available,
                    });
                }
            }
            None => {
                // No margin figures: long purchases must be funded from cash.
                if c.side == Side::Buy {
                    let required = candidate_notional + c.fees_estimate;
                    if required > ctx.cash {
                        return Err(RiskRejection::InsufficientCash {
                            required,
                            available: ctx.cash,
                        });
                    }
                }
            }
        }

        // 9. Daily trade cap.
        let entries = self.daily.read().entries_today;
        if entries >= self.config.max_trades_per_day {
            warn!(entries, limit = self.config.max_trades_per_day, "daily trade cap reached");
            return Err(RiskRejection::TradeLimitReached {
                limit: self.config.max_trades_per_day,
            });
        }

        debug!(symbol = %c.instrument.symbol, side = %c.side, qty = c.quantity, "risk gate pass");
        Ok(())
    }

    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let d = self.daily.read();
            if d.date == today {
                return;
            }
        }
        let mut d = self.daily.write();
        if d.date != today {
            info!(old_date = %d.date, new_date = %today, "date rolled — resetting daily risk counters");
            d.date = today;
            d.entries_today = 0;
        }
    }
}

impl std::fmt::Debug for RiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskGate")
            .field("config", &self.config)
            .field("banned", &self.ban_list.read().len())
            .field("entries_today", &self.daily.read().entries_today)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Exchange, InstrumentType};

    fn tcs() -> Instrument {
        Instrument::equity("TCS", Exchange::Nse)
    }

    fn nifty_ce() -> Instrument {
        Instrument {
            symbol: "NIFTY24DEC24000CE".into(),
            exchange: Exchange::Nfo,
            instrument_type: InstrumentType::OptionCall,
            underlying: "NIFTY".into(),
            lot_size: 75,
            tick_size: Paise::from_paise(5),
            expiry_date: None,
            strike: Some(Paise::from_rupees(24_000)),
        }
    }

    fn candidate(instrument: Instrument, qty: i64, entry_rupees: i64) -> TradeCandidate {
        let entry = Paise::from_rupees(entry_rupees);
        TradeCandidate {
            instrument,
            side: Side::Buy,
            quantity: qty,
            entry,
            stop_loss: Some(entry - entry.bps(200)), // 2% stop
            take_profit: Some(entry + entry.bps(400)),
            product: ProductKind::Intraday,
            is_entry: true,
            allow_averaging: false,
            fees_estimate: Paise::from_paise(20),
        }
    }

    fn context(cash_rupees: i64) -> RiskContext {
        RiskContext {
            can_enter: true,
            cash: Paise::from_rupees(cash_rupees),
            equity: Paise::from_rupees(cash_rupees),
            exposures: Vec::new(),
            margin: None,
        }
    }

    #[test]
    fn insufficient_cash_rejects_and_reports_code() {
        // Seed 10,000; BUY 100 @ 4000 costs 400,000.
        let gate = RiskGate::new(RiskConfig::default());
        let mut c = candidate(tcs(), 100, 4000);
        // Loosen the risk cap so the cash check is the one that fires.
        c.stop_loss = Some(c.entry - Paise::from_paise(100));
        c.take_profit = None;
        let err = gate.evaluate(&c, &context(10_000)).unwrap_err();
        assert!(matches!(err, RiskRejection::InsufficientCash { .. }));
        assert_eq!(err.code(), "INSUFFICIENT_CASH");
    }

    #[test]
    fn exits_bypass_all_entry_checks() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut c = candidate(tcs(), 100, 4000);
        c.is_entry = false;
        let mut ctx = context(10);
        ctx.can_enter = false;
        assert!(gate.evaluate(&c, &ctx).is_ok());
    }

    #[test]
    fn market_closed_blocks_entries() {
        let gate = RiskGate::new(RiskConfig::default());
        let c = candidate(tcs(), 1, 4000);
        let mut ctx = context(1_000_000);
        ctx.can_enter = false;
        assert_eq!(gate.evaluate(&c, &ctx).unwrap_err(), RiskRejection::MarketClosed);
    }

    #[test]
    fn banned_underlying_blocks_entries() {
        let gate = RiskGate::new(RiskConfig::default());
        gate.update_ban_list(["TCS".to_string()].into_iter().collect());
        let c = candidate(tcs(), 1, 4000);
        let err = gate.evaluate(&c, &context(1_000_000)).unwrap_err();
        assert_eq!(err.code(), "SYMBOL_BANNED");
    }

    #[test]
    fn duplicate_position_rejected_unless_averaging() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut ctx = context(1_000_000);
        ctx.exposures.push(PositionExposure {
            symbol: "TCS".into(),
            underlying: "TCS".into(),
            sector: "TCS".into(),
            notional: Paise::from_rupees(4_000),
        });

        let mut c = candidate(tcs(), 1, 4000);
        assert_eq!(gate.evaluate(&c, &ctx).unwrap_err().code(), "DUPLICATE_POSITION");

        c.allow_averaging = true;
        assert!(gate.evaluate(&c, &ctx).is_ok());
    }

    #[test]
    fn one_structure_per_index() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut ctx = context(100_000_000);
        ctx.exposures.push(PositionExposure {
            symbol: "NIFTY24DEC23500PE".into(),
            underlying: "NIFTY".into(),
            sector: "NIFTY".into(),
            notional: Paise::from_rupees(100_000),
        });

        let c = candidate(nifty_ce(), 75, 100);
        assert_eq!(gate.evaluate(&c, &ctx).unwrap_err().code(), "INDEX_CAP");
    }

    #[test]
    fn per_trade_risk_cap_enforced() {
        let gate = RiskGate::new(RiskConfig::default());
        // Equity 100,000; 1% cap = 1,000. Stop distance 80 * qty 100 = 8,000.
        let mut c = candidate(tcs(), 100, 4000);
        c.stop_loss = Some(Paise::from_rupees(3920));
        c.take_profit = None;
        let err = gate.evaluate(&c, &context(100_000)).unwrap_err();
        assert_eq!(err.code(), "RISK_CAP");
    }

    #[test]
    fn risk_reward_floor_enforced_for_shorts() {
        let gate = RiskGate::new(RiskConfig::default());
        let entry = Paise::from_rupees(4000);
        let c = TradeCandidate {
            instrument: tcs(),
            side: Side::Sell,
            quantity: 1,
            entry,
            stop_loss: Some(entry + Paise::from_rupees(40)),
            // Reward 40 vs risk 40: RR 1.0 < 1.5.
            take_profit: Some(entry - Paise::from_rupees(40)),
            product: ProductKind::Intraday,
            is_entry: true,
            allow_averaging: false,
            fees_estimate: Paise::ZERO,
        };
        let err = gate.evaluate(&c, &context(10_000_000)).unwrap_err();
        assert_eq!(err.code(), "RISK_REWARD");
    }

    #[test]
    fn sector_cap_counts_existing_exposure() {
        let mut config = RiskConfig::default();
        config
            .sector_map
            .insert("TCS".into(), "IT".into());
        config.sector_map.insert("INFY".into(), "IT".into());
        let gate = RiskGate::new(config);

        let mut ctx = context(100_000);
        ctx.exposures.push(PositionExposure {
            symbol: "INFY".into(),
            underlying: "INFY".into(),
            sector: "IT".into(),
            notional: Paise::from_rupees(28_000),
        });

        // Cap is 30% of 100,000 = 30,000; 28,000 + 4,000 breaches it.
        let mut c = candidate(tcs(), 1, 4000);
        c.stop_loss = Some(c.entry - Paise::from_paise(1000));
        c.take_profit = None;
        let err = gate.evaluate(&c, &ctx).unwrap_err();
        assert_eq!(err.code(), "SECTOR_CAP");
    }

    #[test]
    fn margin_shortfall_rejected_for_fno() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut ctx = context(10_000_000);
        ctx.margin = Some(MarginCheck {
            required: Paise::from_rupees(150_000),
            available: Paise::from_rupees(100_000),
        });
        let mut c = candidate(nifty_ce(), 75, 100);
        c.product = ProductKind::Normal;
        let err = gate.evaluate(&c, &ctx).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_MARGIN");
    }

    #[test]
    fn daily_trade_cap_trips() {
        let mut config = RiskConfig::default();
        config.max_trades_per_day = 2;
        let gate = RiskGate::new(config);
        gate.record_entry();
        gate.record_entry();
        let c = candidate(tcs(), 1, 4000);
        let err = gate.evaluate(&c, &context(1_000_000)).unwrap_err();
        assert_eq!(err.code(), "TRADE_LIMIT");
    }
}
