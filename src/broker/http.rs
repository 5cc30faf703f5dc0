// =============================================================================
// HTTP Broker Gateway — HMAC-SHA256 signed REST client
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry the API key in the X-API-KEY header and a recvWindow of 5 000 ms to
// tolerate minor clock drift between the engine and the gateway.
//
// Status mapping: 401/403 -> Auth, 429 -> RateLimited, other 4xx -> Rejected
// (semantic, non-retryable), 5xx and transport errors -> Transient.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::broker::adapter::{
    BrokerError, BrokerGateway, BrokerOrderState, BrokerPosition, OrderEvent, OrderRequest,
};
use crate::instruments::Instrument;
use crate::types::{Exchange, InstrumentType, Paise, Quote};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Signed REST client for the broker gateway.
#[derive(Clone)]
pub struct HttpBrokerGateway {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpBrokerGateway {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-API-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: base_url.into(),
            client,
        }
    }

    /// Build from environment. Credentials live in the environment only.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("VAJRA_BROKER_BASE_URL")
            .map_err(|_| anyhow::anyhow!("VAJRA_BROKER_BASE_URL not set"))?;
        let api_key = std::env::var("VAJRA_BROKER_API_KEY")
            .map_err(|_| anyhow::anyhow!("VAJRA_BROKER_API_KEY not set"))?;
        let secret = std::env::var("VAJRA_BROKER_API_SECRET")
            .map_err(|_| anyhow::anyhow!("VAJRA_BROKER_API_SECRET not set"))?;
        Ok(Self::new(base_url, api_key, secret))
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Full query string for a signed request (appends timestamp, recvWindow,
    /// and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Transport helpers
    // -------------------------------------------------------------------------

    async fn get_json(&self, path: &str, query: &str) -> Result<serde_json::Value, BrokerError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(path, &e))?;
        Self::check(path, resp).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &str,
    ) -> Result<serde_json::Value, BrokerError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| transport_error(path, &e))?;
        Self::check(path, resp).await
    }

    async fn check(path: &str, resp: reqwest::Response) -> Result<serde_json::Value, BrokerError> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::Transient(format!("{path}: bad response body: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message")
            .to_string();

        let err = match status.as_u16() {
            401 | 403 => BrokerError::Auth(format!("{path}: {message}")),
            429 => BrokerError::RateLimited(format!("{path}: {message}")),
            400..=499 => BrokerError::Rejected(format!("{path}: {message}")),
            _ => BrokerError::Transient(format!("{path}: {status}: {message}")),
        };
        warn!(path, status = status.as_u16(), error = %err, "gateway request failed");
        Err(err)
    }
}

fn transport_error(path: &str, e: &reqwest::Error) -> BrokerError {
    BrokerError::Transient(format!("{path}: {e}"))
}

/// Parse a JSON value that may be a string or a number into rupees-as-paise.
fn parse_rupees(val: &serde_json::Value) -> Option<Paise> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().ok().map(Paise::from_rupee_f64)
    } else {
        val.as_f64().map(Paise::from_rupee_f64)
    }
}

fn parse_ts_ms(val: &serde_json::Value) -> DateTime<Utc> {
    val.as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

// -----------------------------------------------------------------------------
// Wire decoding
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireInstrument {
    symbol: String,
    exchange: String,
    instrument_type: String,
    underlying: String,
    lot_size: i64,
    tick_size: f64,
    #[serde(default)]
    expiry_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    strike: Option<f64>,
}

fn decode_exchange(code: &str) -> Option<Exchange> {
    match code {
        "NSE" => Some(Exchange::Nse),
        "BSE" => Some(Exchange::Bse),
        "NFO" => Some(Exchange::Nfo),
        "BFO" => Some(Exchange::Bfo),
        _ => None,
    }
}

fn decode_instrument_type(code: &str) -> Option<InstrumentType> {
    match code {
        "EQ" | "EQUITY" => Some(InstrumentType::Equity),
        "FUT" | "FUTURE" => Some(InstrumentType::Future),
        "CE" | "OPTION_CALL" => Some(InstrumentType::OptionCall),
        "PE" | "OPTION_PUT" => Some(InstrumentType::OptionPut),
        _ => None,
    }
}

fn decode_order_state(code: &str) -> BrokerOrderState {
    match code {
        "PENDING" | "TRANSIT" => BrokerOrderState::Pending,
        "PLACED" | "OPEN" => BrokerOrderState::Placed,
        "PARTIALLY_FILLED" | "PART_TRADED" => BrokerOrderState::PartiallyFilled,
        "FILLED" | "TRADED" | "COMPLETE" => BrokerOrderState::Filled,
        "REJECTED" => BrokerOrderState::Rejected,
        _ => BrokerOrderState::Cancelled,
    }
}

// -----------------------------------------------------------------------------
// Gateway implementation
// -----------------------------------------------------------------------------

#[async_trait]
impl BrokerGateway for HttpBrokerGateway {
    #[instrument(skip(self), name = "gateway::instruments")]
    async fn instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>, BrokerError> {
        let body = self
            .get_json("/v1/instruments", &format!("exchange={}", exchange.as_str()))
            .await?;

        let rows: Vec<WireInstrument> = serde_json::from_value(body)
            .map_err(|e| BrokerError::Transient(format!("instruments: decode: {e}")))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let (Some(exchange), Some(instrument_type)) = (
                decode_exchange(&row.exchange),
                decode_instrument_type(&row.instrument_type),
            ) else {
                warn!(symbol = %row.symbol, "skipping instrument with unknown codes");
                continue;
            };
            out.push(Instrument {
                symbol: row.symbol,
                exchange,
                instrument_type,
                underlying: row.underlying,
                lot_size: row.lot_size.max(1),
                tick_size: Paise::from_rupee_f64(row.tick_size),
                expiry_date: row.expiry_date,
                strike: row.strike.map(Paise::from_rupee_f64),
            });
        }

        debug!(count = out.len(), "instruments fetched");
        Ok(out)
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()), name = "gateway::quotes")]
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, BrokerError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = symbols.join(",");
        let body = self
            .get_json("/v1/quotes", &format!("symbols={joined}"))
            .await?;

        let map = body
            .as_object()
            .ok_or_else(|| BrokerError::Transient("quotes: response is not an object".into()))?;

        let mut out = HashMap::with_capacity(map.len());
        for (symbol, raw) in map {
            let Some(ltp) = raw.get("ltp").and_then(parse_rupees) else {
                warn!(symbol = %symbol, "quote missing ltp — skipped");
                continue;
            };
            out.insert(
                symbol.clone(),
                Quote {
                    symbol: symbol.clone(),
                    ltp,
                    bid: raw.get("bid").and_then(parse_rupees),
                    ask: raw.get("ask").and_then(parse_rupees),
                    ts: parse_ts_ms(raw.get("ts").unwrap_or(&serde_json::Value::Null)),
                },
            );
        }
        Ok(out)
    }

    #[instrument(
        skip(self, request),
        fields(symbol = %request.symbol, side = %request.side, qty = request.quantity),
        name = "gateway::place_order"
    )]
    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        let mut params = format!(
            "symbol={}&exchange={}&side={}&quantity={}&product={}&clientOrderId={}",
            request.symbol,
            request.exchange.as_str(),
            request.side.as_str(),
            request.quantity,
            request.product.as_str(),
            request.client_order_id,
        );
        if let Some(price) = request.limit_price {
            params.push_str(&format!("&price={}", price));
        }

        let qs = self.signed_query(&params);
        let body = self.send_json(reqwest::Method::POST, "/v1/orders", &qs).await?;

        let order_id = body
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrokerError::Transient("orders: response missing order_id".into()))?
            .to_string();

        debug!(order_id = %order_id, "order placed");
        Ok(order_id)
    }

    #[instrument(skip(self), name = "gateway::order_history")]
    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderEvent>, BrokerError> {
        let qs = self.signed_query(&format!("orderId={order_id}"));
        let body = self
            .get_json(&format!("/v1/orders/{order_id}/history"), &qs)
            .await?;

        let rows = body
            .as_array()
            .ok_or_else(|| BrokerError::Transient("order history: not an array".into()))?;

        let events = rows
            .iter()
            .map(|row| OrderEvent {
                state: decode_order_state(
                    row.get("status").and_then(|v| v.as_str()).unwrap_or(""),
                ),
                filled_quantity: row
                    .get("filled_quantity")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
                average_price: row.get("average_price").and_then(parse_rupees),
                reason: row
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                ts: parse_ts_ms(row.get("ts").unwrap_or(&serde_json::Value::Null)),
            })
            .collect();
        Ok(events)
    }

    #[instrument(skip(self), name = "gateway::cancel_order")]
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let qs = self.signed_query(&format!("orderId={order_id}"));
        self.send_json(reqwest::Method::DELETE, &format!("/v1/orders/{order_id}"), &qs)
            .await?;
        debug!(order_id, "cancel requested");
        Ok(())
    }

    #[instrument(skip(self), name = "gateway::positions")]
    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let qs = self.signed_query("");
        let body = self.get_json("/v1/positions", &qs).await?;

        let rows = body
            .as_array()
            .ok_or_else(|| BrokerError::Transient("positions: not an array".into()))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(BrokerPosition {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    quantity: row.get("quantity")?.as_i64()?,
                    average_price: row.get("average_price").and_then(parse_rupees)?,
                })
            })
            .collect())
    }

    #[instrument(skip(self, request), fields(symbol = %request.symbol), name = "gateway::margin_for")]
    async fn margin_for(&self, request: &OrderRequest) -> Result<Paise, BrokerError> {
        let params = format!(
            "symbol={}&exchange={}&side={}&quantity={}&product={}",
            request.symbol,
            request.exchange.as_str(),
            request.side.as_str(),
            request.quantity,
            request.product.as_str(),
        );
        let qs = self.signed_query(&params);
        let body = self.send_json(reqwest::Method::POST, "/v1/margin", &qs).await?;

        body.get("required_margin")
            .and_then(parse_rupees)
            .ok_or_else(|| BrokerError::Transient("margin: response missing required_margin".into()))
    }
}

impl std::fmt::Debug for HttpBrokerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBrokerGateway")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
