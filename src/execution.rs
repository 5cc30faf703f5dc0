// =============================================================================
// Order Executor — place, confirm, then (and only then) touch the ledger
// =============================================================================
//
// Live protocol, in this exact order to avoid cash desync:
//
//   1. Validate (symbol routing, quantity, lot alignment).
//   2. Risk gate; abort on failure.
//   3. Place the order. Cash is NOT touched here.
//   4. Poll order history with backoff (200 ms doubling, 2 s cap) until a
//      terminal state or the order timeout.
//   5. FILLED: apply the broker-reported quantity and average price to the
//      portfolio — never the requested values.
//   6. REJECTED / CANCELLED: typed error, ledger untouched.
//   7. Timeout: cancel-and-verify. A fill that lands during cancellation is
//      applied normally; an order that stays non-terminal after a failed
//      cancel is parked for startup reconciliation and raises a critical.
//
// Paper protocol: synthesize an immediate fill at the cached quote with a
// tick-aligned slippage adjustment, same fee model as live.
//
// Orders for the same symbol are serialized by a per-symbol async lock; this
// is what makes the duplicate-position check race-free.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::adapter::{
    BrokerError, BrokerGateway, BrokerOrderState, OrderEvent, OrderRequest,
};
use crate::broker::routing::route_for;
use crate::fees::FeeModel;
use crate::instruments::{Instrument, InstrumentsCatalog};
use crate::market_clock::MarketClock;
use crate::portfolio::{ApplyOutcome, FillEvent, LedgerError, Portfolio, TradeRecord};
use crate::quotes::QuoteCache;
use crate::risk::{MarginCheck, PositionExposure, RiskContext, RiskGate, RiskRejection};
use crate::types::{EngineMode, Paise, ProductKind, Side};

// ---------------------------------------------------------------------------
// Order model
// ---------------------------------------------------------------------------

/// Engine-side order state. Transitions are monotonic; a terminal order is
/// immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    PendingPlacement,
    Placed,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    TimedOut,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled | Self::TimedOut)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingPlacement => "PENDING_PLACEMENT",
            Self::Placed => "PLACED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// One tracked order. Lives in `open_orders` until terminal, then purged
/// (except RECONCILIATION_REQUIRED orders, which stay parked for startup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub requested_quantity: i64,
    pub product: ProductKind,
    pub state: OrderState,
    #[serde(default)]
    pub filled_quantity: i64,
    #[serde(default)]
    pub average_fill_price: Option<Paise>,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminal_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    pub strategy_tag: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("risk gate: {0}")]
    Risk(#[from] RiskRejection),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("order cancelled by broker: {reason}")]
    Cancelled { reason: String },

    #[error("order timed out and was cancelled")]
    TimedOutCancelled,

    #[error("order {client_order_id} requires reconciliation")]
    ReconciliationRequired { client_order_id: String },

    #[error("no quote available for {symbol}")]
    NoQuote { symbol: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Requests & config
// ---------------------------------------------------------------------------

/// What the trading loop asks the executor to do.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: i64,
    pub product: ProductKind,
    /// None submits a market order.
    pub limit_price: Option<Paise>,
    pub strategy_tag: String,
    pub is_entry: bool,
    pub allow_averaging: bool,
    /// Exit levels for the risk gate; the loop installs them on the position
    /// after the fill is applied.
    pub stop_loss: Option<Paise>,
    pub take_profit: Option<Paise>,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub mode: EngineMode,
    pub order_timeout: Duration,
    /// Ticks of adverse slippage applied to synthetic paper fills.
    pub paper_slippage_ticks: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Paper,
            order_timeout: Duration::from_secs(15),
            paper_slippage_ticks: 1,
        }
    }
}

/// Poll backoff: initial 200 ms doubling to a 2 s cap.
const POLL_INITIAL: Duration = Duration::from_millis(200);
const POLL_CAP: Duration = Duration::from_secs(2);
/// Post-cancel verification budget.
const CANCEL_VERIFY_BUDGET: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct OrderExecutor {
    gateway: Arc<dyn BrokerGateway>,
    portfolio: Arc<Portfolio>,
    risk_gate: Arc<RiskGate>,
    clock: Arc<MarketClock>,
    quotes: Arc<QuoteCache>,
    catalog: Arc<InstrumentsCatalog>,
    fee_model: FeeModel,
    config: ExecutorConfig,
    open_orders: RwLock<HashMap<String, Order>>,
    symbol_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        portfolio: Arc<Portfolio>,
        risk_gate: Arc<RiskGate>,
        clock: Arc<MarketClock>,
        quotes: Arc<QuoteCache>,
        catalog: Arc<InstrumentsCatalog>,
        fee_model: FeeModel,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            portfolio,
            risk_gate,
            clock,
            quotes,
            catalog,
            fee_model,
            config,
            open_orders: RwLock::new(HashMap::new()),
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Orders not yet terminal (plus any parked for reconciliation).
    pub fn open_orders(&self) -> HashMap<String, Order> {
        self.open_orders.read().clone()
    }

    /// Re-park orders restored from a snapshot (startup).
    pub fn restore_open_orders(&self, orders: Vec<Order>) {
        let mut map = self.open_orders.write();
        for order in orders {
            info!(
                client_order_id = %order.client_order_id,
                symbol = %order.symbol,
                state = %order.state,
                "restored parked order from snapshot"
            );
            map.insert(order.client_order_id.clone(), order);
        }
    }

    // -------------------------------------------------------------------------
    // The single public operation
    // -------------------------------------------------------------------------

    /// Execute one order end to end and return the applied trade.
    pub async fn execute(&self, request: ExecRequest) -> Result<TradeRecord, ExecError> {
        // Per-symbol serialization: at most one in-flight order per
        // instrument; this backs the duplicate-position guarantee.
        let lock = self.symbol_lock(&request.instrument.symbol);
        let _guard = lock.lock().await;

        self.validate(&request)?;
        // Exits bypass the gate entirely (they are always allowed) and must
        // not fail on a missing quote.
        if request.is_entry {
            self.risk_check(&request).await?;
        }

        let trade = match self.config.mode {
            EngineMode::Live => self.execute_live(&request).await?,
            EngineMode::Paper | EngineMode::Backtest => self.execute_paper(&request)?,
        };

        if request.is_entry {
            self.risk_gate.record_entry();
        }

        info!(
            symbol = %request.instrument.symbol,
            client_order_id = %trade.client_order_id,
            side = %request.side,
            qty = trade.quantity,
            price = %trade.price,
            realized_pnl = %trade.realized_pnl,
            "order executed and applied"
        );
        Ok(trade)
    }

    // -------------------------------------------------------------------------
    // Validation & risk
    // -------------------------------------------------------------------------

    fn validate(&self, request: &ExecRequest) -> Result<(), ExecError> {
        if request.quantity <= 0 {
            return Err(ExecError::Validation(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }
        let lot = request.instrument.lot_size;
        if lot > 1 && request.quantity % lot != 0 {
            return Err(ExecError::Validation(format!(
                "quantity {} not a multiple of lot size {lot}",
                request.quantity
            )));
        }
        route_for(&request.instrument, request.product)
            .map_err(|e| ExecError::Validation(e.to_string()))?;
        Ok(())
    }

    async fn risk_check(&self, request: &ExecRequest) -> Result<(), ExecError> {
        let entry_price = match request.limit_price {
            Some(p) => p,
            None => {
                self.quotes
                    .get(&request.instrument.symbol)
                    .ok_or_else(|| ExecError::NoQuote {
                        symbol: request.instrument.symbol.clone(),
                    })?
                    .ltp
            }
        };

        let exposures: Vec<PositionExposure> = self
            .portfolio
            .positions()
            .iter()
            .map(|p| {
                let underlying = self
                    .catalog
                    .get(&p.symbol)
                    .map(|i| i.underlying)
                    .unwrap_or_else(|| p.symbol.clone());
                PositionExposure {
                    symbol: p.symbol.clone(),
                    sector: self
                        .risk_gate
                        .sector_for(&underlying)
                        .unwrap_or_else(|| underlying.clone()),
                    underlying,
                    notional: p.mark_value().abs(),
                }
            })
            .collect();

        // Live F&O entries consult the broker for margin; a margin API
        // failure is transient and retried next tick.
        let margin = if self.config.mode.is_live()
            && request.is_entry
            && request.instrument.instrument_type.is_derivative()
        {
            let broker_request = self.broker_request(request, Uuid::new_v4().to_string());
            match self.gateway.margin_for(&broker_request).await {
                Ok(required) => Some(MarginCheck {
                    required,
                    available: self.portfolio.cash(),
                }),
                Err(e) if e.is_retryable() => {
                    return Err(ExecError::Risk(RiskRejection::MarginUnavailable(e.to_string())))
                }
                Err(e) => return Err(ExecError::Broker(e)),
            }
        } else {
            None
        };

        let fees_estimate = self.fees_for(request, request.quantity, entry_price);
        let candidate = crate::risk::TradeCandidate {
            instrument: request.instrument.clone(),
            side: request.side,
            quantity: request.quantity,
            entry: entry_price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            product: request.product,
            is_entry: request.is_entry,
            allow_averaging: request.allow_averaging,
            fees_estimate,
        };
        let ctx = RiskContext {
            can_enter: self.clock.can_enter(),
            cash: self.portfolio.cash(),
            equity: self.portfolio.equity(),
            exposures,
            margin,
        };

        self.risk_gate.evaluate(&candidate, &ctx).map_err(|rejection| {
            warn!(
                symbol = %request.instrument.symbol,
                side = %request.side,
                code = rejection.code(),
                reason = %rejection,
                "order blocked by risk gate"
            );
            ExecError::Risk(rejection)
        })
    }

    // -------------------------------------------------------------------------
    // Paper execution
    // -------------------------------------------------------------------------

    fn execute_paper(&self, request: &ExecRequest) -> Result<TradeRecord, ExecError> {
        let symbol = &request.instrument.symbol;
        let quote = self
            .quotes
            .get(symbol)
            .ok_or_else(|| ExecError::NoQuote { symbol: symbol.clone() })?;

        // Adverse tick-aligned slippage, bounded by the touch when depth is
        // available.
        let slip = request
            .instrument
            .tick_size
            .times(self.config.paper_slippage_ticks);
        let price = match request.side {
            Side::Buy => {
                let slipped = quote.ltp + slip;
                quote.ask.map_or(slipped, |ask| slipped.min(ask.max(quote.ltp)))
            }
            Side::Sell => {
                let slipped = quote.ltp - slip;
                quote.bid.map_or(slipped, |bid| slipped.max(bid.min(quote.ltp)))
            }
        };

        let client_order_id = Uuid::new_v4().to_string();
        debug!(
            symbol = %symbol,
            client_order_id = %client_order_id,
            ltp = %quote.ltp,
            fill = %price,
            "synthetic paper fill"
        );
        self.apply_confirmed_fill(request, &client_order_id, request.quantity, price)
    }

    // -------------------------------------------------------------------------
    // Live execution
    // -------------------------------------------------------------------------

    async fn execute_live(&self, request: &ExecRequest) -> Result<TradeRecord, ExecError> {
        let client_order_id = Uuid::new_v4().to_string();
        let symbol = request.instrument.symbol.clone();

        self.track(Order {
            client_order_id: client_order_id.clone(),
            order_id: None,
            symbol: symbol.clone(),
            side: request.side,
            requested_quantity: request.quantity,
            product: request.product,
            state: OrderState::PendingPlacement,
            filled_quantity: 0,
            average_fill_price: None,
            placed_at: None,
            terminal_at: None,
            rejection_reason: None,
            strategy_tag: request.strategy_tag.clone(),
        });

        // 3. Place first. Cash is untouched until a confirmed fill.
        let broker_request = self.broker_request(request, client_order_id.clone());
        let order_id = match self.gateway.place_order(&broker_request).await {
            Ok(id) => id,
            Err(e) => {
                self.finish_order(&client_order_id, OrderState::Rejected, Some(e.to_string()));
                return match e {
                    BrokerError::Rejected(reason) => Err(ExecError::Rejected { reason }),
                    other => Err(ExecError::Broker(other)),
                };
            }
        };
        self.mark_placed(&client_order_id, &order_id);

        // 4. Poll to terminal or timeout.
        let deadline = Instant::now() + self.config.order_timeout;
        let mut backoff = POLL_INITIAL;
        loop {
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())))
                .await;
            backoff = (backoff * 2).min(POLL_CAP);

            match self.latest_event(&order_id).await {
                Ok(Some(event)) => {
                    self.note_progress(&client_order_id, &event);
                    if event.state.is_terminal() {
                        return self.settle_terminal(request, &client_order_id, event);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(order_id = %order_id, error = %e, "order history poll failed — will retry");
                }
            }
        }

        // 7. Timeout: cancel and verify.
        self.cancel_and_verify(request, &client_order_id, &order_id).await
    }

    /// Timeout path: best-effort cancel, brief re-poll, then classify.
    async fn cancel_and_verify(
        &self,
        request: &ExecRequest,
        client_order_id: &str,
        order_id: &str,
    ) -> Result<TradeRecord, ExecError> {
        let symbol = &request.instrument.symbol;
        warn!(symbol = %symbol, order_id, "order timed out — attempting cancellation");

        let cancel_result = self.gateway.cancel_order(order_id).await;
        if let Err(e) = &cancel_result {
            warn!(order_id, error = %e, "cancel request failed");
        }

        let verify_deadline = Instant::now() + CANCEL_VERIFY_BUDGET;
        while Instant::now() < verify_deadline {
            tokio::time::sleep(POLL_INITIAL).await;
            match self.latest_event(order_id).await {
                Ok(Some(event)) if event.state.is_terminal() => {
                    match event.state {
                        // A fill that raced the cancel is a real fill.
                        BrokerOrderState::Filled => {
                            info!(order_id, "order filled during cancellation — applying fill");
                            return self.settle_terminal(request, client_order_id, event);
                        }
                        BrokerOrderState::Cancelled if event.filled_quantity > 0 => {
                            // Partial fill then cancel: the filled part is real.
                            return self.settle_terminal(request, client_order_id, event);
                        }
                        BrokerOrderState::Cancelled => {
                            self.finish_order(
                                client_order_id,
                                OrderState::TimedOut,
                                Some("timed out; cancellation confirmed".into()),
                            );
                            info!(order_id, "cancellation confirmed — ledger untouched");
                            return Err(ExecError::TimedOutCancelled);
                        }
                        BrokerOrderState::Rejected => {
                            let reason =
                                event.reason.unwrap_or_else(|| "rejected".to_string());
                            self.finish_order(
                                client_order_id,
                                OrderState::Rejected,
                                Some(reason.clone()),
                            );
                            return Err(ExecError::Rejected { reason });
                        }
                        _ => unreachable!("is_terminal checked"),
                    }
                }
                _ => {}
            }
        }

        // Terminal state could not be determined: park the order for the next
        // startup reconciliation pass and keep the loop alive.
        error!(
            symbol = %symbol,
            order_id,
            client_order_id,
            "CRITICAL: order state unresolved after cancel attempt — reconciliation required"
        );
        Err(ExecError::ReconciliationRequired {
            client_order_id: client_order_id.to_string(),
        })
    }

    /// Apply a terminal broker event to the ledger.
    fn settle_terminal(
        &self,
        request: &ExecRequest,
        client_order_id: &str,
        event: OrderEvent,
    ) -> Result<TradeRecord, ExecError> {
        match event.state {
            BrokerOrderState::Filled => {
                // 5. Use the broker's numbers, not the requested ones.
                let quantity = if event.filled_quantity > 0 {
                    event.filled_quantity
                } else {
                    request.quantity
                };
                let price = event
                    .average_price
                    .or(request.limit_price)
                    .ok_or_else(|| {
                        ExecError::Validation("terminal fill carries no average price".into())
                    })?;
                self.apply_confirmed_fill(request, client_order_id, quantity, price)
            }
            // Broker cancelled the remainder after a partial fill: the filled
            // part is real and must hit the ledger, fees scaled to it.
            BrokerOrderState::Cancelled if event.filled_quantity > 0 => {
                let price = event
                    .average_price
                    .or(request.limit_price)
                    .ok_or_else(|| {
                        ExecError::Validation("terminal fill carries no average price".into())
                    })?;
                self.apply_confirmed_fill(request, client_order_id, event.filled_quantity, price)
            }
            BrokerOrderState::Rejected => {
                let reason = event.reason.unwrap_or_else(|| "rejected".to_string());
                self.finish_order(client_order_id, OrderState::Rejected, Some(reason.clone()));
                warn!(client_order_id, reason = %reason, "order rejected — ledger untouched");
                Err(ExecError::Rejected { reason })
            }
            BrokerOrderState::Cancelled => {
                let reason = event
                    .reason
                    .unwrap_or_else(|| "cancelled by broker".to_string());
                self.finish_order(client_order_id, OrderState::Cancelled, Some(reason.clone()));
                warn!(client_order_id, reason = %reason, "order cancelled — ledger untouched");
                Err(ExecError::Cancelled { reason })
            }
            other => Err(ExecError::Validation(format!(
                "settle_terminal called with non-terminal state {other:?}"
            ))),
        }
    }

    /// Compute fees, apply to the portfolio, purge the order record.
    fn apply_confirmed_fill(
        &self,
        request: &ExecRequest,
        client_order_id: &str,
        quantity: i64,
        price: Paise,
    ) -> Result<TradeRecord, ExecError> {
        let fees = self.fees_for(request, quantity, price);
        let fill = FillEvent {
            client_order_id: client_order_id.to_string(),
            symbol: request.instrument.symbol.clone(),
            side: request.side,
            quantity,
            price,
            fees,
            executed_at: Utc::now(),
            strategy_tag: request.strategy_tag.clone(),
            product: request.product,
            lot_size: request.instrument.lot_size,
        };

        let outcome = self.portfolio.apply_fill(&fill)?;
        self.finish_filled(client_order_id, quantity, price);

        match outcome {
            ApplyOutcome::Applied(mut trades) => Ok(trades.remove(0)),
            ApplyOutcome::Duplicate => Err(ExecError::Validation(format!(
                "client order id {client_order_id} was already applied"
            ))),
        }
    }

    fn fees_for(&self, request: &ExecRequest, quantity: i64, price: Paise) -> Paise {
        self.fee_model.fee_for(
            request.instrument.instrument_type,
            request.product,
            request.instrument.exchange,
            request.side,
            quantity,
            price,
        )
    }

    fn broker_request(&self, request: &ExecRequest, client_order_id: String) -> OrderRequest {
        OrderRequest {
            client_order_id,
            symbol: request.instrument.symbol.clone(),
            exchange: request.instrument.exchange,
            side: request.side,
            quantity: request.quantity,
            product: request.product,
            limit_price: request.limit_price,
        }
    }

    async fn latest_event(&self, order_id: &str) -> Result<Option<OrderEvent>, BrokerError> {
        let events = self.gateway.order_history(order_id).await?;
        Ok(events.into_iter().last())
    }

    // -------------------------------------------------------------------------
    // Order book-keeping
    // -------------------------------------------------------------------------

    fn symbol_lock(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.symbol_locks
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn track(&self, order: Order) {
        self.open_orders
            .write()
            .insert(order.client_order_id.clone(), order);
    }

    fn mark_placed(&self, client_order_id: &str, order_id: &str) {
        if let Some(order) = self.open_orders.write().get_mut(client_order_id) {
            order.order_id = Some(order_id.to_string());
            order.state = OrderState::Placed;
            order.placed_at = Some(Utc::now());
        }
    }

    fn note_progress(&self, client_order_id: &str, event: &OrderEvent) {
        if event.state == BrokerOrderState::PartiallyFilled {
            if let Some(order) = self.open_orders.write().get_mut(client_order_id) {
                order.state = OrderState::PartiallyFilled;
                order.filled_quantity = event.filled_quantity;
                order.average_fill_price = event.average_price;
            }
        }
    }

    /// Purge an order with a non-fill terminal state.
    fn finish_order(&self, client_order_id: &str, state: OrderState, reason: Option<String>) {
        let mut map = self.open_orders.write();
        if let Some(mut order) = map.remove(client_order_id) {
            order.state = state;
            order.terminal_at = Some(Utc::now());
            order.rejection_reason = reason;
        }
    }

    fn finish_filled(&self, client_order_id: &str, quantity: i64, price: Paise) {
        let mut map = self.open_orders.write();
        if let Some(mut order) = map.remove(client_order_id) {
            order.state = OrderState::Filled;
            order.filled_quantity = quantity;
            order.average_fill_price = Some(price);
            order.terminal_at = Some(Utc::now());
        }
    }

    // -------------------------------------------------------------------------
    // Startup reconciliation
    // -------------------------------------------------------------------------

    /// Resolve orders parked from a previous session: poll each once, apply
    /// fills that completed while we were down, drop other terminal states,
    /// and keep anything still unresolved parked.
    pub async fn reconcile_parked(&self) -> usize {
        let parked = self.open_orders();
        let mut resolved = 0;

        for order in parked.into_values() {
            let Some(order_id) = order.order_id.clone() else {
                // Never placed: nothing can have filled.
                self.finish_order(&order.client_order_id, OrderState::Cancelled, None);
                resolved += 1;
                continue;
            };

            match self.latest_event(&order_id).await {
                Ok(Some(event)) if event.state.is_terminal() => {
                    if event.filled_quantity > 0 {
                        let price = event.average_price.unwrap_or(Paise::ZERO);
                        let fill = FillEvent {
                            client_order_id: order.client_order_id.clone(),
                            symbol: order.symbol.clone(),
                            side: order.side,
                            quantity: event.filled_quantity,
                            price,
                            fees: Paise::ZERO,
                            executed_at: event.ts,
                            strategy_tag: order.strategy_tag.clone(),
                            product: order.product,
                            lot_size: 1,
                        };
                        match self.portfolio.apply_fill(&fill) {
                            Ok(_) => info!(
                                client_order_id = %order.client_order_id,
                                qty = event.filled_quantity,
                                "reconciled parked order fill"
                            ),
                            Err(e) => error!(
                                client_order_id = %order.client_order_id,
                                error = %e,
                                "failed to apply reconciled fill"
                            ),
                        }
                        self.finish_filled(&order.client_order_id, event.filled_quantity, price);
                    } else {
                        self.finish_order(&order.client_order_id, OrderState::Cancelled, None);
                    }
                    resolved += 1;
                }
                Ok(_) => warn!(
                    client_order_id = %order.client_order_id,
                    "parked order still non-terminal — keeping parked"
                ),
                Err(e) => warn!(
                    client_order_id = %order.client_order_id,
                    error = %e,
                    "could not reconcile parked order — keeping parked"
                ),
            }
        }
        resolved
    }
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("mode", &self.config.mode)
            .field("open_orders", &self.open_orders.read().len())
            .finish()
    }
}
