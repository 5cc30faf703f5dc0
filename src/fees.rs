// =============================================================================
// Fee Model — pluggable transaction-cost presets
// =============================================================================
//
// The same model is used for paper and live fills so strategy P&L is
// comparable across modes. Every component is computed in exact paise with
// half-up rounding per component.
//
// Preset formulas (T = turnover = qty * price):
//
//   EquityIntraday   brokerage min(0.03% T, Rs 20); STT 0.025% T (sell);
//                    exchange txn 0.00297% T; SEBI 0.0001% T;
//                    stamp 0.003% T (buy); GST 18% on (brokerage + txn).
//   EquityDelivery   brokerage 0; STT 0.1% T (both sides);
//                    exchange txn 0.00297% T; SEBI 0.0001% T;
//                    stamp 0.015% T (buy); GST 18% on txn.
//   IndexOptionsNse  brokerage flat Rs 20; STT 0.0625% premium (sell);
//                    exchange txn 0.03503% T; SEBI 0.0001% T;
//                    stamp 0.003% T (buy); GST 18% on (brokerage + txn).
//   IndexOptionsBse  as NSE options with exchange txn 0.0325% T.
//   FlatPerTrade     fixed paise per executed order (used by tests and for
//                    simple paper runs).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Exchange, InstrumentType, Paise, ProductKind, Side};

/// Fee model selection, configured once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeModel {
    /// Pick the preset matching the instrument's type, product, and exchange.
    Auto,
    /// Fixed fee per executed order.
    FlatPerTrade { paise: i64 },
}

impl Default for FeeModel {
    fn default() -> Self {
        Self::Auto
    }
}

/// The concrete schedule applied to one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    EquityIntraday,
    EquityDelivery,
    IndexOptionsNse,
    IndexOptionsBse,
    Futures,
}

impl FeeModel {
    /// Total fees for one executed order of `qty` at `price`.
    pub fn fee_for(
        &self,
        instrument_type: InstrumentType,
        product: ProductKind,
        exchange: Exchange,
        side: Side,
        qty: i64,
        price: Paise,
    ) -> Paise {
        match self {
            Self::FlatPerTrade { paise } => Paise::from_paise(*paise),
            Self::Auto => {
                let schedule = Schedule::select(instrument_type, product, exchange);
                schedule.compute(side, price.times(qty))
            }
        }
    }
}

impl Schedule {
    fn select(instrument_type: InstrumentType, product: ProductKind, exchange: Exchange) -> Self {
        match instrument_type {
            InstrumentType::Equity => match product {
                ProductKind::Delivery => Self::EquityDelivery,
                _ => Self::EquityIntraday,
            },
            InstrumentType::Future => Self::Futures,
            InstrumentType::OptionCall | InstrumentType::OptionPut => match exchange {
                Exchange::Bfo | Exchange::Bse => Self::IndexOptionsBse,
                _ => Self::IndexOptionsNse,
            },
        }
    }

    /// Compute total fees on `turnover` for one side of a trade.
    fn compute(self, side: Side, turnover: Paise) -> Paise {
        // Component rates as (numerator, denominator) fractions of turnover.
        // 1/10_000_000 resolution covers the finest published rate (0.0001%).
        let frac = |num: i64| turnover.scale(num, 10_000_000);
        let brokerage_cap = Paise::from_rupees(20);

        match self {
            Self::EquityIntraday => {
                let brokerage = frac(3_000).min(brokerage_cap); // 0.03%
                let stt = if side == Side::Sell { frac(2_500) } else { Paise::ZERO }; // 0.025%
                let txn = frac(297); // 0.00297%
                let sebi = frac(10); // 0.0001%
                let stamp = if side == Side::Buy { frac(300) } else { Paise::ZERO }; // 0.003%
                let gst = (brokerage + txn).scale(18, 100);
                brokerage + stt + txn + sebi + stamp + gst
            }
            Self::EquityDelivery => {
                let stt = frac(10_000); // 0.1% both sides
                let txn = frac(297);
                let sebi = frac(10);
                let stamp = if side == Side::Buy { frac(1_500) } else { Paise::ZERO }; // 0.015%
                let gst = txn.scale(18, 100);
                stt + txn + sebi + stamp + gst
            }
            Self::IndexOptionsNse | Self::IndexOptionsBse => {
                let brokerage = brokerage_cap;
                let stt = if side == Side::Sell { frac(6_250) } else { Paise::ZERO }; // 0.0625%
                let txn = if self == Self::IndexOptionsNse {
                    frac(3_503) // 0.03503%
                } else {
                    frac(3_250) // 0.0325%
                };
                let sebi = frac(10);
                let stamp = if side == Side::Buy { frac(300) } else { Paise::ZERO };
                let gst = (brokerage + txn).scale(18, 100);
                brokerage + stt + txn + sebi + stamp + gst
            }
            Self::Futures => {
                let brokerage = frac(3_000).min(brokerage_cap);
                let stt = if side == Side::Sell { frac(1_000) } else { Paise::ZERO }; // 0.01%
                let txn = frac(173); // 0.00173%
                let sebi = frac(10);
                let stamp = if side == Side::Buy { frac(200) } else { Paise::ZERO }; // 0.002%
                let gst = (brokerage + txn).scale(18, 100);
                brokerage + stt + txn + sebi + stamp + gst
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_per_trade_ignores_turnover() {
        let model = FeeModel::FlatPerTrade { paise: 20 };
        let fee = model.fee_for(
            InstrumentType::Equity,
            ProductKind::Intraday,
            Exchange::Nse,
            Side::Buy,
            10,
            Paise::from_rupees(2000),
        );
        assert_eq!(fee.paise(), 20);
    }

    #[test]
    fn intraday_brokerage_caps_at_twenty_rupees() {
        // Turnover 20 lakh: 0.03% = Rs 600, capped at Rs 20.
        let fee_large = Schedule::EquityIntraday.compute(Side::Buy, Paise::from_rupees(2_000_000));
        // Brokerage 2000 + txn 5940 + sebi 200 + stamp 6000 + gst 1429
        assert_eq!(fee_large.paise(), 2_000 + 5_940 + 200 + 6_000 + 1_429);
    }

    #[test]
    fn options_stt_applies_on_sell_only() {
        let turnover = Paise::from_rupees(100_000);
        let buy = Schedule::IndexOptionsNse.compute(Side::Buy, turnover);
        let sell = Schedule::IndexOptionsNse.compute(Side::Sell, turnover);
        // Sell carries STT 0.0625% (Rs 62.50) but no stamp (Rs 3).
        assert_eq!(sell.paise() - buy.paise(), 6_250 - 300);
    }

    #[test]
    fn auto_selects_bse_options_schedule() {
        let model = FeeModel::Auto;
        let nse = model.fee_for(
            InstrumentType::OptionPut,
            ProductKind::Normal,
            Exchange::Nfo,
            Side::Buy,
            50,
            Paise::from_rupees(100),
        );
        let bse = model.fee_for(
            InstrumentType::OptionPut,
            ProductKind::Normal,
            Exchange::Bfo,
            Side::Buy,
            50,
            Paise::from_rupees(100),
        );
        assert!(bse < nse, "BSE txn rate is lower than NSE");
    }
}
