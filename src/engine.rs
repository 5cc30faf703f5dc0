// =============================================================================
// Trading Loop — the scheduled pipeline driving monitoring, entries, exits
// =============================================================================
//
// Two cadences share one `TradingLoop`:
//   - the main tick (default 30 s): clock advance, flatten pass, monitoring,
//     entry scanning, bounded persistence;
//   - the monitor sub-tick (default 5 s): quote refresh, marks, exit checks
//     only.
//
// Per position the exit checks run in a fixed order and the first match wins:
// stop-loss, take-profit, expiry/session flatten, strategy-requested exit.
//
// Broker calls never happen under the portfolio lock: each pass snapshots
// positions, talks to the gateway, then applies decisions one order at a
// time. Errors local to one order or signal are logged and the loop proceeds.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::broker::adapter::BrokerGateway;
use crate::execution::{ExecError, ExecRequest, OrderExecutor};
use crate::expiry::{ExpiryResolver, ResolvedExpiry};
use crate::instruments::Instrument;
use crate::market_clock::SessionState;
use crate::portfolio::Position;
use crate::signals::{SignalAggregator, SignalContext};
use crate::sizing::{size_position, SizeInputs, SizerConfig};
use crate::state_store::StateStore;
use crate::types::{Exchange, Paise, ProductKind, Side};

pub struct TradingLoop {
    state: Arc<AppState>,
    executor: Arc<OrderExecutor>,
    gateway: Arc<dyn BrokerGateway>,
    aggregator: Arc<SignalAggregator>,
    resolver: ExpiryResolver,
    store: Arc<StateStore>,
    last_persist: Mutex<Instant>,
    last_trading_date: Mutex<Option<NaiveDate>>,
}

impl TradingLoop {
    pub fn new(
        state: Arc<AppState>,
        executor: Arc<OrderExecutor>,
        gateway: Arc<dyn BrokerGateway>,
        aggregator: Arc<SignalAggregator>,
        store: Arc<StateStore>,
    ) -> Self {
        let resolver = ExpiryResolver::new(state.catalog.clone());
        Self {
            state,
            executor,
            gateway,
            aggregator,
            resolver,
            store,
            last_persist: Mutex::new(Instant::now()),
            last_trading_date: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Loop entry points
    // -------------------------------------------------------------------------

    /// Main tick loop. Returns after finishing the current iteration once the
    /// shutdown signal fires, then persists a final snapshot.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let tick_interval =
            Duration::from_secs(self.state.runtime_config.read().tick_interval_seconds);
        info!(interval_secs = tick_interval.as_secs(), "trading loop started");

        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("trading loop draining — final persist");
                        break;
                    }
                }
            }
        }
        self.persist_now();
    }

    /// Position-monitor sub-tick loop (exits only).
    pub async fn run_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let monitor_interval =
            Duration::from_secs(self.state.runtime_config.read().monitor_interval_seconds);
        info!(interval_secs = monitor_interval.as_secs(), "exit monitor started");

        let mut interval = tokio::time::interval(monitor_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.state.clock.can_exit() {
                        self.monitor_once().await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // One tick
    // -------------------------------------------------------------------------

    pub async fn tick(&self) {
        let (session, changed) = self.state.clock.advance();
        if changed {
            self.on_session_change(session);
        }
        self.maybe_roll_date();

        match session {
            SessionState::ExpiryFlatten => {
                // Forced exits take priority; no entry scanning in the window.
                self.monitor_once().await;
                self.flatten_pass().await;
            }
            SessionState::Open | SessionState::PreClose => {
                self.monitor_once().await;
                if self.state.clock.can_enter() {
                    self.scan_once().await;
                }
            }
            _ => {
                debug!(session = %session, "market closed — idle tick");
            }
        }

        self.persist_maybe();
    }

    fn on_session_change(&self, session: SessionState) {
        let config = self.state.runtime_config.read();
        let ttl = if session == SessionState::Open {
            Duration::from_secs(config.quote_ttl_open_seconds)
        } else {
            Duration::from_secs(config.quote_ttl_closed_seconds)
        };
        drop(config);
        self.state.quotes.set_ttl(ttl);
        self.state.increment_version();
    }

    fn maybe_roll_date(&self) {
        let today = self.state.clock.today_ist();
        let mut last = self.last_trading_date.lock();
        if *last != Some(today) {
            if last.is_some() {
                self.state.portfolio.reset_daily_pnl();
            }
            *last = Some(today);
        }
    }

    // -------------------------------------------------------------------------
    // Monitor pass (exits)
    // -------------------------------------------------------------------------

    /// Refresh quotes for open positions, mark the book, and submit exits.
    pub async fn monitor_once(&self) {
        let positions = self.state.portfolio.positions();
        if positions.is_empty() {
            return;
        }

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let quotes = match self.state.quotes.mget(&symbols, &self.gateway).await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "quote refresh failed — skipping monitor pass");
                self.state.push_error(e.to_string(), Some("QUOTES".into()));
                return;
            }
        };

        let marks: HashMap<String, Paise> =
            quotes.iter().map(|(s, q)| (s.clone(), q.ltp)).collect();
        self.state.portfolio.mark_prices(&marks);

        // Re-read so decisions see fresh marks.
        let today = self.state.clock.today_ist();
        for position in self.state.portfolio.positions() {
            let must_flatten = self.must_flatten(&position, today);
            let strategy_exit = quotes.get(&position.symbol).and_then(|quote| {
                let ctx = SignalContext {
                    quote: quote.clone(),
                    equity: self.state.portfolio.equity(),
                    has_position: true,
                };
                self.aggregator.wants_exit(&position, &ctx)
            });

            if let Some(reason) = decide_exit(&position, must_flatten, strategy_exit) {
                self.submit_exit(&position, &reason).await;
            }
        }
    }

    fn must_flatten(&self, position: &Position, today: NaiveDate) -> bool {
        let expiry = match self.resolver.resolve(&position.symbol, today) {
            ResolvedExpiry::Date(d) => Some(d),
            ResolvedExpiry::NoExpiry | ResolvedExpiry::Unknown => None,
        };
        self.state.clock.must_flatten(expiry, position.product)
    }

    /// Square off everything in scope of the flatten window.
    pub async fn flatten_pass(&self) {
        let today = self.state.clock.today_ist();
        for position in self.state.portfolio.positions() {
            if self.must_flatten(&position, today) {
                self.submit_exit(&position, "ExpiryFlatten").await;
            }
        }
    }

    async fn submit_exit(&self, position: &Position, reason: &str) {
        let instrument = self.exit_instrument(position);
        let side = if position.is_long() { Side::Sell } else { Side::Buy };

        info!(
            symbol = %position.symbol,
            side = %side,
            qty = position.quantity_abs(),
            reason,
            "submitting exit order"
        );

        let request = ExecRequest {
            instrument,
            side,
            quantity: position.quantity_abs(),
            product: position.product,
            limit_price: None,
            strategy_tag: format!("exit:{reason}"),
            is_entry: false,
            allow_averaging: false,
            stop_loss: None,
            take_profit: None,
        };

        match self.executor.execute(request).await {
            Ok(trade) => {
                info!(
                    symbol = %position.symbol,
                    realized_pnl = %trade.realized_pnl,
                    reason,
                    "exit filled"
                );
                self.state.increment_version();
            }
            Err(ExecError::ReconciliationRequired { client_order_id }) => {
                // Already critical-logged by the executor; keep the loop alive.
                self.state.push_error(
                    format!("exit for {} requires reconciliation", position.symbol),
                    Some("RECONCILIATION_REQUIRED".into()),
                );
                error!(symbol = %position.symbol, client_order_id = %client_order_id, "exit parked for reconciliation");
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, reason, "exit order failed");
                self.state.push_error(e.to_string(), Some("EXIT".into()));
            }
        }
    }

    /// Resolve the instrument for an exit; a position must remain exitable
    /// even when the catalog has gone stale.
    fn exit_instrument(&self, position: &Position) -> Instrument {
        if let Some(instrument) = self.state.catalog.resolve(&position.symbol) {
            if instrument.symbol != position.symbol {
                // Symbol renamed between sessions: carry the position forward
                // under the canonical name for subsequent quote/order calls.
                if self
                    .state
                    .portfolio
                    .rename_position(&position.symbol, &instrument.symbol)
                    .is_ok()
                {
                    self.state.increment_version();
                }
            }
            return instrument;
        }
        warn!(symbol = %position.symbol, "exit for symbol missing from catalog — using fallback routing");
        let exchange = if position.product == ProductKind::Normal {
            Exchange::Nfo
        } else {
            Exchange::Nse
        };
        let mut fallback = Instrument::equity(position.symbol.clone(), exchange);
        if position.product == ProductKind::Normal {
            fallback.instrument_type = crate::types::InstrumentType::Future;
            fallback.lot_size = 1;
        }
        fallback
    }

    // -------------------------------------------------------------------------
    // Scan pass (entries)
    // -------------------------------------------------------------------------

    /// Run the aggregation pipeline over the configured universe and submit
    /// entries that survive sizing and the risk gate.
    pub async fn scan_once(&self) {
        if self.aggregator.is_empty() {
            return;
        }
        if self.state.catalog.is_empty() {
            warn!("no instruments catalog — refusing to scan for entries");
            return;
        }

        let (universe, stop_pct, rr, risk_pct, max_position_pct, allow_averaging) = {
            let config = self.state.runtime_config.read();
            (
                config.allowed_underlyings.clone(),
                config.entry_stop_pct,
                config.entry_rr,
                config.risk_pct_per_trade,
                config.max_position_pct,
                config.allow_averaging,
            )
        };

        let quotes = match self.state.quotes.mget(&universe, &self.gateway).await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "entry scan quote fetch failed");
                return;
            }
        };

        for symbol in &universe {
            let Some(instrument) = self.state.catalog.resolve(symbol) else {
                debug!(symbol = %symbol, "universe symbol not in catalog — skipped");
                continue;
            };
            let Some(quote) = quotes.get(symbol) else {
                continue;
            };

            let equity = self.state.portfolio.equity();
            let ctx = SignalContext {
                quote: quote.clone(),
                equity,
                has_position: self.state.portfolio.position(symbol).is_some(),
            };
            let Some(signal) = self.aggregator.aggregate(symbol, &ctx) else {
                continue;
            };

            let side = if signal.direction > 0 { Side::Buy } else { Side::Sell };
            let entry = quote.ltp;
            let stop_distance = entry.bps((stop_pct * 10_000.0) as i64).max(instrument.tick_size);
            let (stop, target) = match side {
                Side::Buy => (
                    entry - stop_distance,
                    entry + stop_distance.scale((rr * 100.0) as i64, 100),
                ),
                Side::Sell => (
                    entry + stop_distance,
                    entry - stop_distance.scale((rr * 100.0) as i64, 100),
                ),
            };

            let quantity = size_position(
                &SizerConfig {
                    risk_pct_per_trade: risk_pct,
                    max_position_pct,
                    vol_risk_pct: None,
                },
                SizeInputs {
                    entry,
                    stop_distance,
                    equity,
                    lot_size: instrument.lot_size,
                    confidence: signal.confidence,
                    atr: None,
                },
            );
            if quantity == 0 {
                debug!(symbol = %symbol, "signal sized to zero — dropped");
                continue;
            }

            let product = if instrument.instrument_type.is_derivative() {
                ProductKind::Normal
            } else {
                ProductKind::Delivery
            };
            let request = ExecRequest {
                instrument: instrument.clone(),
                side,
                quantity,
                product,
                limit_price: None,
                strategy_tag: "ensemble".to_string(),
                is_entry: true,
                allow_averaging,
                stop_loss: Some(stop),
                take_profit: Some(target),
            };

            match self.executor.execute(request).await {
                Ok(trade) => {
                    if let Err(e) = self.state.portfolio.set_exit_levels(
                        &instrument.symbol,
                        Some(stop),
                        Some(target),
                    ) {
                        warn!(symbol = %instrument.symbol, error = %e, "failed to install exit levels");
                    }
                    info!(
                        symbol = %instrument.symbol,
                        side = %side,
                        qty = trade.quantity,
                        price = %trade.price,
                        confidence = signal.confidence,
                        "entry filled"
                    );
                    self.state.increment_version();
                }
                Err(ExecError::Risk(rejection)) => {
                    debug!(symbol = %symbol, code = rejection.code(), "entry blocked by risk gate");
                    if !rejection.is_transient() {
                        self.state
                            .push_error(rejection.to_string(), Some(rejection.code().into()));
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "entry order failed");
                    self.state.push_error(e.to_string(), Some("ENTRY".into()));
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    fn persist_maybe(&self) {
        let interval = Duration::from_secs(
            self.state.runtime_config.read().persist_interval_seconds,
        );
        {
            let last = self.last_persist.lock();
            if last.elapsed() < interval {
                return;
            }
        }
        self.persist_now();
    }

    /// Snapshot and write off the hot path.
    pub fn persist_now(&self) {
        *self.last_persist.lock() = Instant::now();
        let snapshot = self
            .state
            .portfolio
            .snapshot(self.executor.open_orders());
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&snapshot) {
                error!(error = %e, "state persistence failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Exit decision
// ---------------------------------------------------------------------------

/// Pure exit decision for one position. First match wins: stop-loss,
/// take-profit, flatten, strategy.
pub fn decide_exit(
    position: &Position,
    must_flatten: bool,
    strategy_exit: Option<String>,
) -> Option<String> {
    let mark = position.mark_price.unwrap_or(position.avg_entry_price);
    let long = position.is_long();

    if let Some(stop) = position.stop_loss {
        let hit = if long { mark <= stop } else { mark >= stop };
        if hit {
            return Some("StopLoss".to_string());
        }
    }

    if let Some(target) = position.take_profit {
        let hit = if long { mark >= target } else { mark <= target };
        if hit {
            return Some("TakeProfit".to_string());
        }
    }

    if must_flatten {
        return Some("ExpiryFlatten".to_string());
    }

    strategy_exit
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::adapter::{
        BrokerError, BrokerOrderState, BrokerPosition, OrderEvent, OrderRequest,
    };
    use crate::execution::{ExecutorConfig, OrderExecutor};
    use crate::fees::FeeModel;
    use crate::portfolio::FillEvent;
    use crate::runtime_config::RuntimeConfig;
    use crate::signals::{Strategy, StrategySignal};
    use crate::types::{EngineMode, InstrumentType, Quote};
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubGateway;

    #[async_trait]
    impl BrokerGateway for StubGateway {
        async fn instruments(&self, _: Exchange) -> Result<Vec<Instrument>, BrokerError> {
            Ok(Vec::new())
        }
        async fn quotes(
            &self,
            symbols: &[String],
        ) -> Result<HashMap<String, Quote>, BrokerError> {
            // Misses are an error in these tests: quotes must be pre-seeded.
            Err(BrokerError::Transient(format!("unexpected fetch for {symbols:?}")))
        }
        async fn place_order(&self, _: &OrderRequest) -> Result<String, BrokerError> {
            Err(BrokerError::Transient("no live orders in tests".into()))
        }
        async fn order_history(&self, _: &str) -> Result<Vec<OrderEvent>, BrokerError> {
            Ok(vec![OrderEvent {
                state: BrokerOrderState::Placed,
                filled_quantity: 0,
                average_price: None,
                reason: None,
                ts: Utc::now(),
            }])
        }
        async fn cancel_order(&self, _: &str) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(Vec::new())
        }
        async fn margin_for(&self, _: &OrderRequest) -> Result<Paise, BrokerError> {
            Ok(Paise::ZERO)
        }
    }

    struct AlwaysLong;
    impl Strategy for AlwaysLong {
        fn name(&self) -> &str {
            "always-long"
        }
        fn evaluate(&self, _symbol: &str, _ctx: &SignalContext) -> StrategySignal {
            StrategySignal { direction: 1, strength: 0.9, reason: "test".into() }
        }
    }

    fn position(symbol: &str, qty: i64, entry_rupees: i64) -> Position {
        Position {
            symbol: symbol.to_string(),
            signed_quantity: qty,
            avg_entry_price: Paise::from_rupees(entry_rupees),
            invested_amount: Paise::from_rupees(entry_rupees).times(qty.abs()),
            stop_loss: None,
            take_profit: None,
            entry_time: Utc::now(),
            strategy_tag: "test".into(),
            product: ProductKind::Delivery,
            mark_price: Some(Paise::from_rupees(entry_rupees)),
        }
    }

    // -----------------------------------------------------------------------
    // decide_exit ordering
    // -----------------------------------------------------------------------

    #[test]
    fn stop_loss_wins_over_everything() {
        let mut pos = position("TCS", 10, 4000);
        pos.stop_loss = Some(Paise::from_rupees(3950));
        pos.take_profit = Some(Paise::from_rupees(4100));
        pos.mark_price = Some(Paise::from_rupees(3940));
        let reason = decide_exit(&pos, true, Some("strategy".into()));
        assert_eq!(reason.as_deref(), Some("StopLoss"));
    }

    #[test]
    fn take_profit_beats_flatten_and_strategy() {
        let mut pos = position("TCS", 10, 4000);
        pos.stop_loss = Some(Paise::from_rupees(3950));
        pos.take_profit = Some(Paise::from_rupees(4100));
        pos.mark_price = Some(Paise::from_rupees(4120));
        let reason = decide_exit(&pos, true, Some("strategy".into()));
        assert_eq!(reason.as_deref(), Some("TakeProfit"));
    }

    #[test]
    fn flatten_beats_strategy_exit() {
        let pos = position("NIFTY24DEC24000CE", 75, 100);
        let reason = decide_exit(&pos, true, Some("strategy".into()));
        assert_eq!(reason.as_deref(), Some("ExpiryFlatten"));
    }

    #[test]
    fn strategy_exit_is_last_resort() {
        let pos = position("TCS", 10, 4000);
        assert_eq!(
            decide_exit(&pos, false, Some("momentum gone".into())).as_deref(),
            Some("momentum gone")
        );
        assert!(decide_exit(&pos, false, None).is_none());
    }

    #[test]
    fn short_position_stop_is_above_entry() {
        let mut pos = position("TCS", -10, 4000);
        pos.stop_loss = Some(Paise::from_rupees(4050));
        pos.mark_price = Some(Paise::from_rupees(4060));
        assert_eq!(decide_exit(&pos, false, None).as_deref(), Some("StopLoss"));
    }

    // -----------------------------------------------------------------------
    // End-to-end paper passes
    // -----------------------------------------------------------------------

    fn engine_harness(strategies: Vec<Arc<dyn Strategy>>) -> (Arc<AppState>, Arc<TradingLoop>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            allowed_underlyings: vec!["RELIANCE".into()],
            min_agreement: 2,
            ..RuntimeConfig::default()
        };
        let state = Arc::new(AppState::new(config));
        state.clock.force_state(SessionState::Open);

        state.catalog.replace_all(vec![Instrument::equity("RELIANCE", Exchange::Nse)]);

        let gateway: Arc<dyn BrokerGateway> = Arc::new(StubGateway);
        let executor = Arc::new(OrderExecutor::new(
            gateway.clone(),
            state.portfolio.clone(),
            state.risk_gate.clone(),
            state.clock.clone(),
            state.quotes.clone(),
            state.catalog.clone(),
            FeeModel::FlatPerTrade { paise: 20 },
            ExecutorConfig {
                mode: EngineMode::Paper,
                order_timeout: Duration::from_secs(1),
                paper_slippage_ticks: 0,
            },
        ));
        let aggregator = Arc::new(SignalAggregator::new(strategies, 0.7, 2));
        let store = Arc::new(StateStore::new(dir.path().join("state.json")));
        let engine = Arc::new(TradingLoop::new(state.clone(), executor, gateway, aggregator, store));
        (state, engine, dir)
    }

    #[tokio::test]
    async fn scan_opens_position_with_exit_levels() {
        let (state, engine, _dir) = engine_harness(vec![
            Arc::new(AlwaysLong) as Arc<dyn Strategy>,
            Arc::new(AlwaysLong) as Arc<dyn Strategy>,
        ]);
        state.quotes.insert(Quote::new("RELIANCE", Paise::from_rupees(2000)));

        engine.scan_once().await;

        let pos = state.portfolio.position("RELIANCE").expect("position opened");
        assert!(pos.signed_quantity > 0);
        let stop = pos.stop_loss.expect("stop installed");
        let target = pos.take_profit.expect("target installed");
        assert!(stop < pos.avg_entry_price);
        assert!(target > pos.avg_entry_price);
    }

    #[tokio::test]
    async fn monitor_closes_position_on_stop_hit() {
        let (state, engine, _dir) = engine_harness(Vec::new());

        state
            .portfolio
            .apply_fill(&FillEvent {
                client_order_id: "seed".into(),
                symbol: "RELIANCE".into(),
                side: Side::Buy,
                quantity: 10,
                price: Paise::from_rupees(2000),
                fees: Paise::from_paise(20),
                executed_at: Utc::now(),
                strategy_tag: "seed".into(),
                product: ProductKind::Delivery,
                lot_size: 1,
            })
            .unwrap();
        state
            .portfolio
            .set_exit_levels(
                "RELIANCE",
                Some(Paise::from_rupees(1980)),
                Some(Paise::from_rupees(2100)),
            )
            .unwrap();

        // Price gaps through the stop.
        state.quotes.insert(Quote::new("RELIANCE", Paise::from_rupees(1975)));
        engine.monitor_once().await;

        assert_eq!(state.portfolio.open_position_count(), 0);
        let trades = state.portfolio.trades();
        assert_eq!(trades.len(), 2);
        assert!(trades[1].realized_pnl < Paise::ZERO);
    }

    #[tokio::test]
    async fn empty_ensemble_never_enters() {
        let (state, engine, _dir) = engine_harness(Vec::new());
        state.quotes.insert(Quote::new("RELIANCE", Paise::from_rupees(2000)));
        engine.scan_once().await;
        assert_eq!(state.portfolio.open_position_count(), 0);
    }

    #[tokio::test]
    async fn flatten_pass_squares_off_expiring_position() {
        let (state, engine, _dir) = engine_harness(Vec::new());
        let today = state.clock.today_ist();

        // An option expiring today, present in the catalog.
        let option = Instrument {
            symbol: "NIFTYTESTPE".into(),
            exchange: Exchange::Nfo,
            instrument_type: InstrumentType::OptionPut,
            underlying: "NIFTY".into(),
            lot_size: 75,
            tick_size: Paise::from_paise(5),
            expiry_date: Some(today),
            strike: Some(Paise::from_rupees(24_000)),
        };
        state.catalog.replace_all(vec![option]);

        state
            .portfolio
            .apply_fill(&FillEvent {
                client_order_id: "seed".into(),
                symbol: "NIFTYTESTPE".into(),
                side: Side::Buy,
                quantity: 75,
                price: Paise::from_rupees(100),
                fees: Paise::from_paise(20),
                executed_at: Utc::now(),
                strategy_tag: "seed".into(),
                product: ProductKind::Normal,
                lot_size: 75,
            })
            .unwrap();
        state.quotes.insert(Quote::new("NIFTYTESTPE", Paise::from_rupees(95)));

        state.clock.force_state(SessionState::ExpiryFlatten);
        engine.flatten_pass().await;

        assert_eq!(state.portfolio.open_position_count(), 0);
    }
}
