// =============================================================================
// Instruments Catalog — symbol resolution over the broker's daily dump
// =============================================================================
//
// The catalog is replaced wholesale at process start and at the pre-open
// boundary. A failed refresh keeps the previous generation (stale symbols
// beat no symbols); with no generation loaded at all the engine refuses to
// trade.
//
// `resolve` falls back to attribute matching when the exact symbol is absent:
// the symbol is parsed into (underlying, expiry, strike, type) and the first
// catalog entry with equal attributes wins. The equivalence is logged so a
// renamed symbol can be traced back.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::expiry::parse_symbol;
use crate::types::{Exchange, InstrumentType, Paise};

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// One row of the broker's instruments dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: Exchange,
    pub instrument_type: InstrumentType,
    pub underlying: String,
    /// Minimum quantity increment; 1 for equity.
    pub lot_size: i64,
    pub tick_size: Paise,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub strike: Option<Paise>,
}

impl Instrument {
    /// Convenience constructor for an equity instrument.
    pub fn equity(symbol: impl Into<String>, exchange: Exchange) -> Self {
        let symbol = symbol.into();
        Self {
            underlying: symbol.clone(),
            symbol,
            exchange,
            instrument_type: InstrumentType::Equity,
            lot_size: 1,
            tick_size: Paise::from_paise(5),
            expiry_date: None,
            strike: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Thread-safe catalog; the inner map is swapped whole on refresh.
pub struct InstrumentsCatalog {
    by_symbol: RwLock<HashMap<String, Instrument>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl InstrumentsCatalog {
    pub fn new() -> Self {
        Self {
            by_symbol: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        }
    }

    /// True when no generation has ever been loaded. The engine must not
    /// trade in this state.
    pub fn is_empty(&self) -> bool {
        self.by_symbol.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.read().len()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read()
    }

    /// Replace the catalog with a freshly fetched generation. An empty dump
    /// is rejected so a broken broker response cannot wipe a good catalog.
    pub fn replace_all(&self, instruments: Vec<Instrument>) {
        if instruments.is_empty() {
            warn!("instruments refresh returned an empty dump — keeping previous catalog");
            return;
        }
        let count = instruments.len();
        let map: HashMap<String, Instrument> = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        *self.by_symbol.write() = map;
        *self.last_refresh.write() = Some(Utc::now());
        info!(count, "instruments catalog refreshed");
    }

    /// Exact lookup, no fallback.
    pub fn get(&self, symbol: &str) -> Option<Instrument> {
        self.by_symbol.read().get(symbol).cloned()
    }

    /// Resolve `symbol` to a catalog instrument. When the exact symbol is
    /// missing the symbol is parsed into attributes and the first entry with
    /// the same (underlying, expiry, strike, type) wins.
    pub fn resolve(&self, symbol: &str) -> Option<Instrument> {
        self.resolve_at(symbol, Utc::now().date_naive())
    }

    /// As [`resolve`](Self::resolve) with an explicit anchor date for the
    /// parsing fallback's year-rollover rule.
    pub fn resolve_at(&self, symbol: &str, today: NaiveDate) -> Option<Instrument> {
        if let Some(found) = self.get(symbol) {
            return Some(found);
        }

        let parsed = parse_symbol(symbol, today)?;

        let map = self.by_symbol.read();
        let found = map.values().find(|i| {
            i.underlying == parsed.underlying
                && i.instrument_type == parsed.instrument_type
                && i.expiry_date == Some(parsed.expiry)
                && i.strike == parsed.strike
        })?;

        info!(
            requested = symbol,
            canonical = %found.symbol,
            underlying = %parsed.underlying,
            expiry = %parsed.expiry,
            "symbol resolved by attribute match"
        );
        Some(found.clone())
    }
}

impl Default for InstrumentsCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InstrumentsCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentsCatalog")
            .field("instruments", &self.len())
            .field("last_refresh", &self.last_refresh())
            .finish()
    }
}
