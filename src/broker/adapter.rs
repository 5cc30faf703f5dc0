// =============================================================================
// Broker Adapter Contract — the only seam between the engine and the broker
// =============================================================================
//
// Everything the engine needs from a broker goes through `BrokerGateway`.
// Failure semantics are part of the contract: transport problems are
// retryable, semantic rejections (margin, banned symbol, bad parameters) are
// permanent for that order, and authentication failures are fatal for the
// process.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instruments::Instrument;
use crate::types::{Exchange, Paise, ProductKind, Quote, Side};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed broker failures. `is_retryable` drives the caller's retry policy and
/// the circuit breaker's failure accounting.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Network error, timeout, or broker 5xx.
    #[error("broker transport error: {0}")]
    Transient(String),

    /// Broker answered 429; the rate limiter normally absorbs these.
    #[error("rate limited by broker: {0}")]
    RateLimited(String),

    /// Semantic rejection — insufficient margin, banned symbol, bad params.
    #[error("order rejected by broker: {0}")]
    Rejected(String),

    /// Credentials invalid or expired. Unrecoverable without operator action.
    #[error("broker authentication failed: {0}")]
    Auth(String),

    /// The circuit breaker is open; no request was sent.
    #[error("broker circuit open")]
    CircuitOpen,

    /// The rate-limiter token wait would exceed the operation deadline.
    #[error("deadline exceeded waiting for rate-limit token")]
    DeadlineExceeded,
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited(_) | Self::CircuitOpen | Self::DeadlineExceeded
        )
    }
}

// ---------------------------------------------------------------------------
// Wire-facing records
// ---------------------------------------------------------------------------

/// Request sent to the broker to place (or margin-check) an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Locally generated idempotency token.
    pub client_order_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: Side,
    pub quantity: i64,
    pub product: ProductKind,
    /// None places a market order.
    #[serde(default)]
    pub limit_price: Option<Paise>,
}

/// Broker-side order state as reported by order history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderState {
    Pending,
    Placed,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl BrokerOrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled)
    }
}

/// One event from the broker's order history; the most recent event carries
/// the current state and, when filled, the executed quantity and price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub state: BrokerOrderState,
    #[serde(default)]
    pub filled_quantity: i64,
    #[serde(default)]
    pub average_price: Option<Paise>,
    #[serde(default)]
    pub reason: Option<String>,
    pub ts: DateTime<Utc>,
}

/// The broker's authoritative position view (live mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: Paise,
}

// ---------------------------------------------------------------------------
// The gateway trait
// ---------------------------------------------------------------------------

/// Uniform read/write access to the broker. Implementations must be safe to
/// share across tasks; the engine wraps them with the rate limiter and
/// circuit breaker before use.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Full catalog dump for one exchange segment.
    async fn instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>, BrokerError>;

    /// Batched quotes. Single-symbol calls are discouraged; batch wherever
    /// possible.
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, BrokerError>;

    /// Place an order; returns the broker-assigned order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError>;

    /// Order history, oldest first.
    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderEvent>, BrokerError>;

    /// Best-effort cancel; the terminal state must be verified via
    /// [`order_history`](Self::order_history).
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    /// Broker's authoritative positions snapshot.
    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Margin required for the given order (F&O pre-trade sizing).
    async fn margin_for(&self, request: &OrderRequest) -> Result<Paise, BrokerError>;
}
