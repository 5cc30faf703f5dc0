// =============================================================================
// Order Routing — instrument-driven exchange/product code mapping
// =============================================================================
//
// The broker wire expects its own exchange and product codes. Routing is
// derived from the `Instrument` record alone — never from string heuristics
// on the symbol, which is the classic source of live-order rejections.
// =============================================================================

use thiserror::Error;

use crate::instruments::Instrument;
use crate::types::{Exchange, InstrumentType, ProductKind};

/// Broker-facing routing codes for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerRoute {
    pub exchange_code: &'static str,
    pub product_code: &'static str,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("derivative {symbol} must route to a derivatives segment, not {exchange}")]
    DerivativeOnCashSegment { symbol: String, exchange: Exchange },

    #[error("equity {symbol} must route to a cash segment, not {exchange}")]
    EquityOnDerivativesSegment { symbol: String, exchange: Exchange },

    #[error("product {product} is not valid for {instrument_type}")]
    InvalidProduct { product: ProductKind, instrument_type: InstrumentType },
}

/// Compute the broker route for `instrument` under `product`, validating the
/// combination.
pub fn route_for(instrument: &Instrument, product: ProductKind) -> Result<BrokerRoute, RoutingError> {
    let is_derivative = instrument.instrument_type.is_derivative();

    if is_derivative && !instrument.exchange.is_derivative_segment() {
        return Err(RoutingError::DerivativeOnCashSegment {
            symbol: instrument.symbol.clone(),
            exchange: instrument.exchange,
        });
    }
    if !is_derivative && instrument.exchange.is_derivative_segment() {
        return Err(RoutingError::EquityOnDerivativesSegment {
            symbol: instrument.symbol.clone(),
            exchange: instrument.exchange,
        });
    }

    let product_code = match (instrument.instrument_type, product) {
        (InstrumentType::Equity, ProductKind::Intraday) => "INTRADAY",
        (InstrumentType::Equity, ProductKind::Delivery) => "DELIVERY",
        (InstrumentType::Equity, ProductKind::Normal) => {
            return Err(RoutingError::InvalidProduct {
                product,
                instrument_type: instrument.instrument_type,
            })
        }
        // F&O: positional NORMAL or same-day INTRADAY; never DELIVERY.
        (_, ProductKind::Normal) => "NORMAL",
        (_, ProductKind::Intraday) => "INTRADAY",
        (t, ProductKind::Delivery) => {
            return Err(RoutingError::InvalidProduct { product, instrument_type: t })
        }
    };

    Ok(BrokerRoute {
        exchange_code: instrument.exchange.as_str(),
        product_code,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Paise;

    fn nifty_call() -> Instrument {
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

    #[test]
    fn nifty_options_route_to_nfo_normal() {
        let route = route_for(&nifty_call(), ProductKind::Normal).unwrap();
        assert_eq!(route.exchange_code, "NFO");
        assert_eq!(route.product_code, "NORMAL");
    }

    #[test]
    fn equity_intraday_routes_to_nse_intraday() {
        let reliance = Instrument::equity("RELIANCE", Exchange::Nse);
        let route = route_for(&reliance, ProductKind::Intraday).unwrap();
        assert_eq!(route.exchange_code, "NSE");
        assert_eq!(route.product_code, "INTRADAY");
    }

    #[test]
    fn derivative_on_cash_segment_is_rejected() {
        let mut opt = nifty_call();
        opt.exchange = Exchange::Nse;
        assert!(matches!(
            route_for(&opt, ProductKind::Normal),
            Err(RoutingError::DerivativeOnCashSegment { .. })
        ));
    }

    #[test]
    fn option_delivery_is_rejected() {
        assert!(matches!(
            route_for(&nifty_call(), ProductKind::Delivery),
            Err(RoutingError::InvalidProduct { .. })
        ));
    }

    #[test]
    fn equity_normal_is_rejected() {
        let tcs = Instrument::equity("TCS", Exchange::Nse);
        assert!(matches!(
            route_for(&tcs, ProductKind::Normal),
            Err(RoutingError::InvalidProduct { .. })
        ));
    }
}
