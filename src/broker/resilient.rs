// =============================================================================
// Resilient Gateway — token bucket + circuit breaker around any gateway
// =============================================================================
//
// Every call (reads on cache miss included) passes the same process-global
// token bucket; the circuit breaker counts only retryable failures, so a
// semantic rejection never opens the circuit.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::broker::adapter::{
    BrokerError, BrokerGateway, BrokerPosition, OrderEvent, OrderRequest,
};
use crate::broker::circuit_breaker::CircuitBreaker;
use crate::broker::rate_limit::TokenBucket;
use crate::instruments::Instrument;
use crate::types::{Exchange, Paise, Quote};

/// Maximum time a single call may spend waiting for a rate-limit token.
const TOKEN_WAIT_BUDGET: Duration = Duration::from_secs(10);

pub struct ResilientGateway {
    inner: Arc<dyn BrokerGateway>,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn BrokerGateway>, bucket: TokenBucket, breaker: CircuitBreaker) -> Self {
        Self { inner, bucket, breaker }
    }

    /// Acquire permission for one outbound call.
    async fn admit(&self) -> Result<(), BrokerError> {
        if !self.breaker.is_call_permitted() {
            return Err(BrokerError::CircuitOpen);
        }
        self.bucket.acquire(Instant::now() + TOKEN_WAIT_BUDGET).await
    }

    fn record<T>(&self, result: &Result<T, BrokerError>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            // Semantic outcomes mean the broker is healthy.
            Err(BrokerError::Rejected(_)) | Err(BrokerError::Auth(_)) => {
                self.breaker.record_success()
            }
            Err(_) => self.breaker.record_failure(),
        }
    }
}

#[async_trait]
impl BrokerGateway for ResilientGateway {
    async fn instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>, BrokerError> {
        self.admit().await?;
        let result = self.inner.instruments(exchange).await;
        self.record(&result);
        result
    }

    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, BrokerError> {
        self.admit().await?;
        let result = self.inner.quotes(symbols).await;
        self.record(&result);
        result
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        self.admit().await?;
        let result = self.inner.place_order(request).await;
        self.record(&result);
        result
    }

    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderEvent>, BrokerError> {
        self.admit().await?;
        let result = self.inner.order_history(order_id).await;
        self.record(&result);
        result
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        self.admit().await?;
        let result = self.inner.cancel_order(order_id).await;
        self.record(&result);
        result
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.admit().await?;
        let result = self.inner.positions().await;
        self.record(&result);
        result
    }

    async fn margin_for(&self, request: &OrderRequest) -> Result<Paise, BrokerError> {
        self.admit().await?;
        let result = self.inner.margin_for(request).await;
        self.record(&result);
        result
    }
}

impl std::fmt::Debug for ResilientGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientGateway")
            .field("bucket", &self.bucket)
            .field("breaker", &self.breaker)
            .finish()
    }
}
