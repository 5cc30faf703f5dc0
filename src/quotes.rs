// =============================================================================
// Quote Cache — TTL + LRU front for batched gateway quote fetches
// =============================================================================
//
// Readers share the lock; the write lock is held only for the brief insert /
// promote window, never across a network call. `mget` is the primary entry
// point: it partitions into hits and misses, fetches all misses in a single
// gateway call, repopulates, and returns the union.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::broker::adapter::{BrokerError, BrokerGateway};
use crate::types::Quote;

struct CachedQuote {
    quote: Quote,
    cached_at: Instant,
}

struct Inner {
    entries: HashMap<String, CachedQuote>,
    /// Recency order, most recent at the back. Stale keys are skipped on
    /// eviction; the deque is compacted lazily.
    recency: VecDeque<String>,
    ttl: Duration,
}

/// LRU quote cache with a per-entry TTL.
pub struct QuoteCache {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl QuoteCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                recency: VecDeque::new(),
                ttl,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Adjust the TTL at runtime; the market-hours loop shortens it while the
    /// session is open and relaxes it pre/post market.
    pub fn set_ttl(&self, ttl: Duration) {
        self.inner.write().ttl = ttl;
    }

    pub fn ttl(&self) -> Duration {
        self.inner.read().ttl
    }

    /// Cached, unexpired quote for `symbol`, promoting it in LRU order.
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        let mut inner = self.inner.write();
        let fresh = match inner.entries.get(symbol) {
            Some(entry) if entry.cached_at.elapsed() < inner.ttl => entry.quote.clone(),
            _ => return None,
        };
        let key = symbol.to_string();
        inner.recency.retain(|k| k != &key);
        inner.recency.push_back(key);
        Some(fresh)
    }

    /// Insert or refresh a quote.
    pub fn insert(&self, quote: Quote) {
        let mut inner = self.inner.write();
        let key = quote.symbol.clone();
        inner.recency.retain(|k| k != &key);
        inner.recency.push_back(key.clone());
        inner.entries.insert(
            key,
            CachedQuote {
                quote,
                cached_at: Instant::now(),
            },
        );

        while inner.entries.len() > self.capacity {
            match inner.recency.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Batched lookup: cache hits are served directly, all misses are fetched
    /// in one gateway call and repopulated. Symbols the gateway does not
    /// return are omitted from the result (and logged).
    pub async fn mget(
        &self,
        symbols: &[String],
        gateway: &Arc<dyn BrokerGateway>,
    ) -> Result<HashMap<String, Quote>, BrokerError> {
        let mut result = HashMap::with_capacity(symbols.len());
        let mut misses: Vec<String> = Vec::new();

        for symbol in symbols {
            match self.get(symbol) {
                Some(quote) => {
                    result.insert(symbol.clone(), quote);
                }
                None => misses.push(symbol.clone()),
            }
        }

        if misses.is_empty() {
            return Ok(result);
        }

        debug!(
            hits = result.len(),
            misses = misses.len(),
            "quote cache mget — fetching misses in one batch"
        );

        let fetched = gateway.quotes(&misses).await?;
        for symbol in &misses {
            match fetched.get(symbol) {
                Some(quote) => {
                    self.insert(quote.clone());
                    result.insert(symbol.clone(), quote.clone());
                }
                None => warn!(symbol = %symbol, "gateway returned no quote for requested symbol"),
            }
        }

        Ok(result)
    }
}

impl std::fmt::Debug for QuoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("QuoteCache")
            .field("entries", &inner.entries.len())
            .field("capacity", &self.capacity)
            .field("ttl", &inner.ttl)
            .finish()
    }
}
