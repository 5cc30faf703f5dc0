// =============================================================================
// Portfolio — the ledger of cash, positions, and trades
// =============================================================================
//
// The single owner of cash and position mutations. `apply_fill` is the only
// entry point and is called exclusively by the order executor after a
// confirmed terminal fill; everything else is read-only snapshots.
//
// Accounting rules (signed arithmetic, q = filled qty, p = avg price,
// f = fees):
//
//   open long       cash -= q*p + f     invested  = q*p + f
//   open short      cash += q*p - f     invested  = q*p - f   (net credit)
//   average         invested accumulates; avg = invested / |qty|
//   reduce long     proceeds = q*p - f; realized = proceeds - share
//   reduce short    cost     = q*p + f; realized = share - cost
//   reversal        close the whole prior leg, open the remainder opposite,
//                   both inside one lock acquisition
//
// where share = invested * q / |prior qty| (exact, i128). Fees are deducted
// from cash on BOTH open and close; adding gross proceeds on close is the
// classic ledger bug and is rejected by the integrity check below.
//
// Integrity: after every mutation,
//   cash == initial + sum(realized) - sum(long invested) + sum(short credit)
// A violation is unrecoverable and must abort the process.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::execution::Order;
use crate::types::{Paise, ProductKind, Side};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One open position. `signed_quantity` is positive for longs, negative for
/// shorts, and never zero for a live position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub signed_quantity: i64,
    /// VWAP of all opening fills (fees included via invested_amount).
    pub avg_entry_price: Paise,
    /// Longs: total cost paid including fees. Shorts: net credit received
    /// after fees. Always positive.
    pub invested_amount: Paise,
    #[serde(default)]
    pub stop_loss: Option<Paise>,
    #[serde(default)]
    pub take_profit: Option<Paise>,
    pub entry_time: DateTime<Utc>,
    pub strategy_tag: String,
    pub product: ProductKind,
    /// In-memory mark, updated by `mark_prices`; not part of the ledger.
    #[serde(default)]
    pub mark_price: Option<Paise>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.signed_quantity > 0
    }

    pub fn quantity_abs(&self) -> i64 {
        self.signed_quantity.abs()
    }

    /// Signed mark value (longs positive, shorts negative liability).
    pub fn mark_value(&self) -> Paise {
        let mark = self.mark_price.unwrap_or(self.avg_entry_price);
        mark.times(self.signed_quantity)
    }

    /// Unrealized PnL at the current mark.
    pub fn unrealized_pnl(&self) -> Paise {
        let mark = self.mark_price.unwrap_or(self.avg_entry_price);
        if self.is_long() {
            mark.times(self.quantity_abs()) - self.invested_amount
        } else {
            self.invested_amount - mark.times(self.quantity_abs())
        }
    }
}

/// Immutable execution record appended on every applied fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Paise,
    pub gross_value: Paise,
    pub fees: Paise,
    /// Signed cash delta: negative for buys, positive for sells.
    pub net_value: Paise,
    pub executed_at: DateTime<Utc>,
    /// Zero for opening trades.
    pub realized_pnl: Paise,
}

/// Immutable copy of the full portfolio for readers and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: Paise,
    pub positions: HashMap<String, Position>,
    pub open_orders: HashMap<String, Order>,
    pub realized_pnl_day: Paise,
    pub as_of: DateTime<Utc>,
}

/// A confirmed fill handed to `apply_fill` by the executor.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Paise,
    pub fees: Paise,
    pub executed_at: DateTime<Utc>,
    pub strategy_tag: String,
    pub product: ProductKind,
    pub lot_size: i64,
}

/// Result of `apply_fill`.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// One trade normally; two for a reversal (close leg, then open leg).
    Applied(Vec<TradeRecord>),
    /// The client order id was already applied; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("invalid fill quantity {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("fill quantity {quantity} is not a multiple of lot size {lot_size}")]
    LotMisaligned { quantity: i64, lot_size: i64 },

    #[error("no position in {symbol}")]
    NoPosition { symbol: String },

    #[error("exit levels invalid for {symbol}: stop {stop:?} target {target:?} entry {entry}")]
    InvalidExitLevels {
        symbol: String,
        stop: Option<Paise>,
        target: Option<Paise>,
        entry: Paise,
    },

    /// The ledger equation no longer holds. Unrecoverable; the process must
    /// abort rather than keep trading on corrupt state.
    #[error("ledger integrity violated: {0}")]
    Integrity(String),
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

struct Ledger {
    cash: Paise,
    initial_cash: Paise,
    positions: HashMap<String, Position>,
    trades: Vec<TradeRecord>,
    applied_orders: HashSet<String>,
    realized_pnl_day: Paise,
    realized_pnl_total: Paise,
}

impl Ledger {
    /// The ledger equation. Called after every mutation.
    fn verify(&self) -> Result<(), LedgerError> {
        let mut expected = self.initial_cash + self.realized_pnl_total;
        for p in self.positions.values() {
            if p.is_long() {
                expected -= p.invested_amount;
            } else {
                expected += p.invested_amount;
            }
        }
        if expected != self.cash {
            return Err(LedgerError::Integrity(format!(
                "cash {} != expected {} (initial {}, realized {})",
                self.cash, expected, self.initial_cash, self.realized_pnl_total
            )));
        }
        Ok(())
    }
}

/// The ledger. A single portfolio-wide mutex serializes every mutation;
/// readers get deep copies via `snapshot`.
pub struct Portfolio {
    inner: Mutex<Ledger>,
}

impl Portfolio {
    pub fn new(initial_cash: Paise) -> Self {
        info!(initial_cash = %initial_cash, "portfolio seeded");
        Self {
            inner: Mutex::new(Ledger {
                cash: initial_cash,
                initial_cash,
                positions: HashMap::new(),
                trades: Vec::new(),
                applied_orders: HashSet::new(),
                realized_pnl_day: Paise::ZERO,
                realized_pnl_total: Paise::ZERO,
            }),
        }
    }

    /// Rebuild from a persisted snapshot. The seed cash is derived so the
    /// ledger equation holds over the restored positions.
    pub fn restore(
        cash: Paise,
        positions: HashMap<String, Position>,
        realized_pnl_day: Paise,
    ) -> Result<Self, LedgerError> {
        for p in positions.values() {
            if p.signed_quantity == 0 {
                return Err(LedgerError::Integrity(format!(
                    "restored position {} has zero quantity",
                    p.symbol
                )));
            }
        }
        let mut initial_cash = cash - realized_pnl_day;
        for p in positions.values() {
            if p.is_long() {
                initial_cash += p.invested_amount;
            } else {
                initial_cash -= p.invested_amount;
            }
        }
        let portfolio = Self {
            inner: Mutex::new(Ledger {
                cash,
                initial_cash,
                positions,
                trades: Vec::new(),
                applied_orders: HashSet::new(),
                realized_pnl_day,
                realized_pnl_total: realized_pnl_day,
            }),
        };
        portfolio.inner.lock().verify()?;
        Ok(portfolio)
    }

    // -------------------------------------------------------------------------
    // apply_fill — the single mutation entry point
    // -------------------------------------------------------------------------

    /// Apply a confirmed fill. Idempotent per client order id: a repeated call
    /// for the same id is a no-op.
    pub fn apply_fill(&self, fill: &FillEvent) -> Result<ApplyOutcome, LedgerError> {
        if fill.quantity <= 0 {
            return Err(LedgerError::InvalidQuantity { quantity: fill.quantity });
        }
        if fill.lot_size > 1 && fill.quantity % fill.lot_size != 0 {
            return Err(LedgerError::LotMisaligned {
                quantity: fill.quantity,
                lot_size: fill.lot_size,
            });
        }

        let mut ledger = self.inner.lock();

        if ledger.applied_orders.contains(&fill.client_order_id) {
            debug!(
                client_order_id = %fill.client_order_id,
                "fill already applied — idempotent no-op"
            );
            return Ok(ApplyOutcome::Duplicate);
        }

        let prior = ledger.positions.get(&fill.symbol).cloned();
        let mut trades = Vec::with_capacity(1);

        match prior {
            None => {
                trades.push(Self::open_position(&mut ledger, fill, fill.quantity, fill.fees));
            }
            Some(pos) => {
                let same_direction = (pos.is_long() && fill.side == Side::Buy)
                    || (!pos.is_long() && fill.side == Side::Sell);
                if same_direction {
                    trades.push(Self::average_position(&mut ledger, fill));
                } else {
                    let prior_abs = pos.quantity_abs();
                    if fill.quantity <= prior_abs {
                        trades.push(Self::reduce_position(
                            &mut ledger,
                            fill,
                            fill.quantity,
                            fill.fees,
                        ));
                    } else {
                        // Reversal: close the whole prior leg, open the
                        // remainder opposite. Fees split pro rata by quantity.
                        let close_fees = fill.fees.scale(prior_abs, fill.quantity);
                        let open_fees = fill.fees - close_fees;
                        trades.push(Self::reduce_position(&mut ledger, fill, prior_abs, close_fees));
                        trades.push(Self::open_position(
                            &mut ledger,
                            fill,
                            fill.quantity - prior_abs,
                            open_fees,
                        ));
                    }
                }
            }
        }

        ledger.applied_orders.insert(fill.client_order_id.clone());
        for t in &trades {
            ledger.realized_pnl_day += t.realized_pnl;
            ledger.realized_pnl_total += t.realized_pnl;
        }
        ledger.trades.extend(trades.iter().cloned());

        ledger.verify()?;
        Ok(ApplyOutcome::Applied(trades))
    }

    /// Open (or reverse-open) `qty` in the fill's direction.
    fn open_position(ledger: &mut Ledger, fill: &FillEvent, qty: i64, fees: Paise) -> TradeRecord {
        let gross = fill.price.times(qty);
        let (cash_delta, invested, signed_qty) = match fill.side {
            Side::Buy => (-(gross + fees), gross + fees, qty),
            Side::Sell => (gross - fees, gross - fees, -qty),
        };
        ledger.cash += cash_delta;
        ledger.positions.insert(
            fill.symbol.clone(),
            Position {
                symbol: fill.symbol.clone(),
                signed_quantity: signed_qty,
                avg_entry_price: fill.price,
                invested_amount: invested,
                stop_loss: None,
                take_profit: None,
                entry_time: fill.executed_at,
                strategy_tag: fill.strategy_tag.clone(),
                product: fill.product,
                mark_price: Some(fill.price),
            },
        );

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            qty,
            price = %fill.price,
            fees = %fees,
            "position opened"
        );

        Self::trade(fill, qty, fees, cash_delta, Paise::ZERO)
    }

    /// Add to an existing same-direction position.
    fn average_position(ledger: &mut Ledger, fill: &FillEvent) -> TradeRecord {
        let pos = ledger
            .positions
            .get_mut(&fill.symbol)
            .expect("caller verified position exists");
        let gross = fill.price.times(fill.quantity);
        let (cash_delta, invested_delta) = match fill.side {
            Side::Buy => (-(gross + fill.fees), gross + fill.fees),
            Side::Sell => (gross - fill.fees, gross - fill.fees),
        };

        let new_abs = pos.quantity_abs() + fill.quantity;
        pos.invested_amount += invested_delta;
        pos.avg_entry_price = pos.invested_amount.scale(1, new_abs);
        pos.signed_quantity += fill.side.signum() * fill.quantity;
        pos.mark_price = Some(fill.price);
        let new_qty = pos.signed_quantity;
        let new_avg = pos.avg_entry_price;
        ledger.cash += cash_delta;

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            qty = fill.quantity,
            new_qty,
            new_avg = %new_avg,
            "position averaged — caller must recompute exit levels"
        );

        Self::trade(fill, fill.quantity, fill.fees, cash_delta, Paise::ZERO)
    }

    /// Close `qty` (<= |prior|) against an opposite-direction position.
    fn reduce_position(ledger: &mut Ledger, fill: &FillEvent, qty: i64, fees: Paise) -> TradeRecord {
        let pos = ledger
            .positions
            .get_mut(&fill.symbol)
            .expect("caller verified position exists");
        let prior_abs = pos.quantity_abs();
        debug_assert!(qty <= prior_abs);

        let gross = fill.price.times(qty);
        let share = pos.invested_amount.scale(qty, prior_abs);

        let (cash_delta, realized) = if pos.is_long() {
            // Selling a long: proceeds in, cost share out of invested.
            let proceeds = gross - fees;
            (proceeds, proceeds - share)
        } else {
            // Buying back a short: cost out, credit share released.
            let cost = gross + fees;
            (-cost, share - cost)
        };

        pos.invested_amount -= share;
        pos.signed_quantity -= pos.signed_quantity.signum() * qty;
        pos.mark_price = Some(fill.price);
        let fully_closed = pos.signed_quantity == 0;
        ledger.cash += cash_delta;

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            qty,
            price = %fill.price,
            realized_pnl = %realized,
            fully_closed,
            "position reduced"
        );
        if fully_closed {
            ledger.positions.remove(&fill.symbol);
        }

        Self::trade(fill, qty, fees, cash_delta, realized)
    }

    fn trade(
        fill: &FillEvent,
        qty: i64,
        fees: Paise,
        net_value: Paise,
        realized_pnl: Paise,
    ) -> TradeRecord {
        TradeRecord {
            trade_id: Uuid::new_v4().to_string(),
            client_order_id: fill.client_order_id.clone(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            quantity: qty,
            price: fill.price,
            gross_value: fill.price.times(qty),
            fees,
            net_value,
            executed_at: fill.executed_at,
            realized_pnl,
        }
    }

    // -------------------------------------------------------------------------
    // Marks and exit levels
    // -------------------------------------------------------------------------

    /// Update in-memory marks. Does not touch cash or invested amounts.
    pub fn mark_prices(&self, prices: &HashMap<String, Paise>) {
        let mut ledger = self.inner.lock();
        for pos in ledger.positions.values_mut() {
            if let Some(price) = prices.get(&pos.symbol) {
                pos.mark_price = Some(*price);
            }
        }
    }

    /// Set stop/target on an open position, enforcing the ordering invariant
    /// (long: stop < entry < target; short: target < entry < stop).
    pub fn set_exit_levels(
        &self,
        symbol: &str,
        stop_loss: Option<Paise>,
        take_profit: Option<Paise>,
    ) -> Result<(), LedgerError> {
        let mut ledger = self.inner.lock();
        let pos = ledger
            .positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::NoPosition { symbol: symbol.to_string() })?;

        let entry = pos.avg_entry_price;
        let ordered = if pos.is_long() {
            stop_loss.map_or(true, |sl| sl < entry) && take_profit.map_or(true, |tp| tp > entry)
        } else {
            stop_loss.map_or(true, |sl| sl > entry) && take_profit.map_or(true, |tp| tp < entry)
        };
        if !ordered {
            return Err(LedgerError::InvalidExitLevels {
                symbol: symbol.to_string(),
                stop: stop_loss,
                target: take_profit,
                entry,
            });
        }

        pos.stop_loss = stop_loss;
        pos.take_profit = take_profit;
        debug!(symbol, stop = ?stop_loss, target = ?take_profit, "exit levels set");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn cash(&self) -> Paise {
        self.inner.lock().cash
    }

    /// Cash plus the signed mark value of every open position.
    pub fn equity(&self) -> Paise {
        let ledger = self.inner.lock();
        ledger.cash + ledger.positions.values().map(Position::mark_value).sum()
    }

    pub fn realized_pnl_day(&self) -> Paise {
        self.inner.lock().realized_pnl_day
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.inner.lock().positions.get(symbol).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.inner.lock().positions.values().cloned().collect()
    }

    pub fn open_position_count(&self) -> usize {
        self.inner.lock().positions.len()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.inner.lock().trades.clone()
    }

    /// Immutable deep copy for readers and the state store. `open_orders`
    /// is supplied by the executor, which owns the order lifecycle.
    pub fn snapshot(&self, open_orders: HashMap<String, Order>) -> PortfolioSnapshot {
        let ledger = self.inner.lock();
        PortfolioSnapshot {
            cash: ledger.cash,
            positions: ledger.positions.clone(),
            open_orders,
            realized_pnl_day: ledger.realized_pnl_day,
            as_of: Utc::now(),
        }
    }

    /// Reset the daily realized-PnL counter at the date roll.
    pub fn reset_daily_pnl(&self) {
        let mut ledger = self.inner.lock();
        if !ledger.realized_pnl_day.is_zero() {
            info!(realized = %ledger.realized_pnl_day, "daily realized PnL reset");
        }
        ledger.realized_pnl_day = Paise::ZERO;
    }

    /// Re-run the integrity check (used on startup after a restore).
    pub fn verify_integrity(&self) -> Result<(), LedgerError> {
        self.inner.lock().verify()
    }

    /// Carry a position forward under a new canonical symbol (catalog rename).
    pub fn rename_position(&self, from: &str, to: &str) -> Result<(), LedgerError> {
        let mut ledger = self.inner.lock();
        let mut pos = ledger
            .positions
            .remove(from)
            .ok_or_else(|| LedgerError::NoPosition { symbol: from.to_string() })?;
        pos.symbol = to.to_string();
        warn!(from, to, "position carried forward under canonical symbol");
        ledger.positions.insert(to.to_string(), pos);
        Ok(())
    }
}

impl std::fmt::Debug for Portfolio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.inner.lock();
        f.debug_struct("Portfolio")
            .field("cash", &ledger.cash)
            .field("positions", &ledger.positions.len())
            .field("trades", &ledger.trades.len())
            .field("realized_pnl_day", &ledger.realized_pnl_day)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const FLAT_FEE: Paise = Paise::from_paise(20);

    fn fill(id: &str, symbol: &str, side: Side, qty: i64, price_rupees: i64) -> FillEvent {
        FillEvent {
            client_order_id: id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: qty,
            price: Paise::from_rupees(price_rupees),
            fees: FLAT_FEE,
            executed_at: Utc::now(),
            strategy_tag: "test".to_string(),
            product: ProductKind::Delivery,
            lot_size: 1,
        }
    }

    fn applied(outcome: ApplyOutcome) -> Vec<TradeRecord> {
        match outcome {
            ApplyOutcome::Applied(trades) => trades,
            ApplyOutcome::Duplicate => panic!("expected applied"),
        }
    }

    #[test]
    fn simple_long_round_trip() {
        // Seed 10,00,000 rupees; flat 20 paise per trade.
        let portfolio = Portfolio::new(Paise::from_paise(100_000_000));

        let buy = applied(
            portfolio
                .apply_fill(&fill("o1", "RELIANCE", Side::Buy, 100, 2000))
                .unwrap(),
        );
        assert_eq!(buy[0].realized_pnl, Paise::ZERO);
        assert_eq!(portfolio.cash().paise(), 100_000_000 - 20_000_000 - 20);

        let mut sell_fill = fill("o2", "RELIANCE", Side::Sell, 100, 2050);
        sell_fill.executed_at = Utc::now();
        let sell = applied(portfolio.apply_fill(&sell_fill).unwrap());

        assert_eq!(portfolio.cash().paise(), 79_999_980 + 20_500_000 - 20);
        assert_eq!(portfolio.cash().paise(), 100_499_960);
        assert_eq!(sell[0].realized_pnl.paise(), 499_960);
        assert_eq!(portfolio.open_position_count(), 0);
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn short_round_trip_is_symmetric() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));

        applied(
            portfolio
                .apply_fill(&fill("o1", "NIFTY24DEC24000CE", Side::Sell, 75, 100))
                .unwrap(),
        );
        let pos = portfolio.position("NIFTY24DEC24000CE").unwrap();
        assert_eq!(pos.signed_quantity, -75);
        // Net credit: 75 * 100.00 - 0.20.
        assert_eq!(pos.invested_amount.paise(), 750_000 - 20);

        let close = applied(
            portfolio
                .apply_fill(&fill("o2", "NIFTY24DEC24000CE", Side::Buy, 75, 90))
                .unwrap(),
        );
        // Realized: credit 749,980 - cost (675,000 + 20).
        assert_eq!(close[0].realized_pnl.paise(), 749_980 - 675_020);
        assert_eq!(portfolio.open_position_count(), 0);
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn fee_symmetry_on_flat_round_trip() {
        // Open and close at the same price: realized PnL must be exactly
        // -(open fees + close fees), never zero.
        let portfolio = Portfolio::new(Paise::from_rupees(100_000));
        applied(portfolio.apply_fill(&fill("o1", "TCS", Side::Buy, 10, 4000)).unwrap());
        let close = applied(portfolio.apply_fill(&fill("o2", "TCS", Side::Sell, 10, 4000)).unwrap());
        assert_eq!(close[0].realized_pnl.paise(), -40);
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn averaging_updates_vwap_exactly() {
        // Long 100 @ 4000 (invested 400,020 rupees incl fees), then 100 @ 3900.
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        let mut open = fill("o1", "TCS", Side::Buy, 100, 4000);
        open.fees = Paise::from_rupees(20);
        applied(portfolio.apply_fill(&open).unwrap());

        let mut avg = fill("o2", "TCS", Side::Buy, 100, 3900);
        avg.fees = Paise::from_rupees(20);
        applied(portfolio.apply_fill(&avg).unwrap());

        let pos = portfolio.position("TCS").unwrap();
        assert_eq!(pos.signed_quantity, 200);
        assert_eq!(pos.invested_amount, Paise::from_rupees(400_020 + 390_020));
        // 790,040 / 200 = 3950.20 exactly.
        assert_eq!(pos.avg_entry_price.paise(), 395_020);
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn exit_levels_are_recomputed_not_inherited() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        applied(portfolio.apply_fill(&fill("o1", "TCS", Side::Buy, 100, 4000)).unwrap());
        portfolio
            .set_exit_levels(
                "TCS",
                Some(Paise::from_rupees(3920)),
                Some(Paise::from_rupees(4080)),
            )
            .unwrap();

        applied(portfolio.apply_fill(&fill("o2", "TCS", Side::Buy, 100, 3900)).unwrap());
        // After averaging the caller recomputes from the new 3950.xx average;
        // the old 3920 stop is NOT min()'d in.
        let new_stop = Paise::from_paise(387_119);
        portfolio.set_exit_levels("TCS", Some(new_stop), None).unwrap();
        assert_eq!(portfolio.position("TCS").unwrap().stop_loss, Some(new_stop));
    }

    #[test]
    fn invalid_exit_ordering_is_rejected() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        applied(portfolio.apply_fill(&fill("o1", "TCS", Side::Buy, 10, 4000)).unwrap());
        // Stop above entry on a long.
        let err = portfolio
            .set_exit_levels("TCS", Some(Paise::from_rupees(4100)), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidExitLevels { .. }));
    }

    #[test]
    fn duplicate_fill_is_idempotent() {
        let portfolio = Portfolio::new(Paise::from_rupees(100_000));
        let f = fill("o1", "TCS", Side::Buy, 10, 4000);
        applied(portfolio.apply_fill(&f).unwrap());
        let cash_after = portfolio.cash();

        assert!(matches!(portfolio.apply_fill(&f).unwrap(), ApplyOutcome::Duplicate));
        assert_eq!(portfolio.cash(), cash_after);
        assert_eq!(portfolio.position("TCS").unwrap().signed_quantity, 10);
        assert_eq!(portfolio.trades().len(), 1);
    }

    #[test]
    fn partial_close_scales_invested_proportionally() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        applied(portfolio.apply_fill(&fill("o1", "INFY", Side::Buy, 150, 1500)).unwrap());
        let invested_before = portfolio.position("INFY").unwrap().invested_amount;

        applied(portfolio.apply_fill(&fill("o2", "INFY", Side::Sell, 100, 1510)).unwrap());
        let pos = portfolio.position("INFY").unwrap();
        assert_eq!(pos.signed_quantity, 50);
        let share = invested_before.scale(100, 150);
        assert_eq!(pos.invested_amount, invested_before - share);
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn reversal_closes_then_opens_opposite() {
        // Long 100 closed by SELL 150 -> short 50 at the fill price.
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        applied(portfolio.apply_fill(&fill("o1", "SBIN", Side::Buy, 100, 800)).unwrap());

        let trades = applied(portfolio.apply_fill(&fill("o2", "SBIN", Side::Sell, 150, 820)).unwrap());
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].quantity, 100);
        assert!(trades[0].realized_pnl > Paise::ZERO);
        assert_eq!(trades[1].quantity, 50);
        assert_eq!(trades[1].realized_pnl, Paise::ZERO);

        let pos = portfolio.position("SBIN").unwrap();
        assert_eq!(pos.signed_quantity, -50);
        // New short leg entered at the fill price; credit nets the fee share.
        assert_eq!(pos.avg_entry_price, Paise::from_rupees(820));
        let open_fees = FLAT_FEE - FLAT_FEE.scale(100, 150);
        let expected_credit = Paise::from_rupees(820).times(50) - open_fees;
        assert_eq!(pos.invested_amount, expected_credit);
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn lot_misalignment_is_rejected() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        let mut f = fill("o1", "NIFTY24DEC24000CE", Side::Buy, 70, 100);
        f.lot_size = 75;
        assert!(matches!(
            portfolio.apply_fill(&f),
            Err(LedgerError::LotMisaligned { .. })
        ));
        assert_eq!(portfolio.open_position_count(), 0);
    }

    #[test]
    fn mark_prices_do_not_touch_cash() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        applied(portfolio.apply_fill(&fill("o1", "TCS", Side::Buy, 10, 4000)).unwrap());
        let cash = portfolio.cash();

        let mut marks = HashMap::new();
        marks.insert("TCS".to_string(), Paise::from_rupees(4100));
        portfolio.mark_prices(&marks);

        assert_eq!(portfolio.cash(), cash);
        let pos = portfolio.position("TCS").unwrap();
        assert_eq!(pos.mark_price, Some(Paise::from_rupees(4100)));
        assert!(pos.unrealized_pnl() > Paise::ZERO);
    }

    #[test]
    fn restore_rebuilds_a_consistent_ledger() {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        applied(portfolio.apply_fill(&fill("o1", "TCS", Side::Buy, 10, 4000)).unwrap());
        let snap = portfolio.snapshot(HashMap::new());

        let restored =
            Portfolio::restore(snap.cash, snap.positions, snap.realized_pnl_day).unwrap();
        restored.verify_integrity().unwrap();
        assert_eq!(restored.cash(), portfolio.cash());
        assert_eq!(restored.position("TCS").unwrap().signed_quantity, 10);
    }

    #[test]
    fn ledger_equation_holds_across_a_mixed_sequence() {
        let portfolio = Portfolio::new(Paise::from_rupees(10_00_000));
        applied(portfolio.apply_fill(&fill("a", "TCS", Side::Buy, 30, 4000)).unwrap());
        applied(portfolio.apply_fill(&fill("b", "TCS", Side::Buy, 30, 3950)).unwrap());
        applied(portfolio.apply_fill(&fill("c", "TCS", Side::Sell, 45, 4025)).unwrap());
        applied(portfolio.apply_fill(&fill("d", "INFY", Side::Sell, 20, 1500)).unwrap());
        applied(portfolio.apply_fill(&fill("e", "INFY", Side::Buy, 35, 1490)).unwrap());
        portfolio.verify_integrity().unwrap();

        // Trades' signed net values must reconstruct the cash delta exactly.
        let net: Paise = portfolio.trades().iter().map(|t| t.net_value).sum();
        assert_eq!(Paise::from_rupees(10_00_000) + net, portfolio.cash());
    }
}
