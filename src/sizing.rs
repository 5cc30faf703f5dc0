// =============================================================================
// Position Sizer — risk-based, confidence-scaled, lot-aligned quantities
// =============================================================================
//
// Policy:
//   base_risk = risk_pct_per_trade * equity
//   raw_qty   = base_risk / stop_distance
//   scaled    = raw_qty * (0.5 + 0.5 * confidence)
//   aligned   = floor(scaled / lot_size) * lot_size
//   capped by max_position_pct * equity / entry, and by the ATR inverse when
//   volatility sizing is configured.
//
// A result below one lot drops the signal (returns 0).
// =============================================================================

use tracing::debug;

use crate::types::Paise;

#[derive(Debug, Clone)]
pub struct SizerConfig {
    /// Fraction of equity risked per trade (default 0.01).
    pub risk_pct_per_trade: f64,
    /// Cap on position notional as a fraction of equity (default 0.25).
    pub max_position_pct: f64,
    /// When set, quantity is also capped at vol_risk_pct * equity / ATR.
    pub vol_risk_pct: Option<f64>,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            risk_pct_per_trade: 0.01,
            max_position_pct: 0.25,
            vol_risk_pct: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SizeInputs {
    pub entry: Paise,
    /// |entry - stop_loss|; must be positive.
    pub stop_distance: Paise,
    pub equity: Paise,
    pub lot_size: i64,
    /// Aggregated signal confidence in [0, 1].
    pub confidence: f64,
    /// Average true range in price units, when available.
    pub atr: Option<Paise>,
}

/// Compute the lot-aligned quantity for a signal; 0 means the signal is
/// dropped.
pub fn size_position(config: &SizerConfig, inputs: SizeInputs) -> i64 {
    if inputs.entry.paise() <= 0 || inputs.stop_distance.paise() <= 0 || inputs.lot_size <= 0 {
        return 0;
    }

    let equity = inputs.equity.paise() as f64;
    let base_risk = equity * config.risk_pct_per_trade;
    let raw_qty = base_risk / inputs.stop_distance.paise() as f64;

    let confidence = inputs.confidence.clamp(0.0, 1.0);
    let scaled = raw_qty * (0.5 + 0.5 * confidence);

    let lot = inputs.lot_size;
    let mut qty = (scaled as i64 / lot) * lot;

    // Notional cap.
    let max_notional = equity * config.max_position_pct;
    let notional_cap = (max_notional / inputs.entry.paise() as f64) as i64;
    qty = qty.min((notional_cap / lot) * lot);

    // Volatility inverse cap.
    if let (Some(vol_pct), Some(atr)) = (config.vol_risk_pct, inputs.atr) {
        if atr.paise() > 0 {
            let vol_cap = (equity * vol_pct / atr.paise() as f64) as i64;
            qty = qty.min((vol_cap / lot) * lot);
        }
    }

    if qty < lot {
        debug!(
            raw_qty,
            scaled,
            lot,
            "sized quantity below one lot — signal dropped"
        );
        return 0;
    }
    qty
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(entry_rupees: i64, stop_rupees: i64, equity_rupees: i64, lot: i64) -> SizeInputs {
        SizeInputs {
            entry: Paise::from_rupees(entry_rupees),
            stop_distance: Paise::from_rupees(stop_rupees),
            equity: Paise::from_rupees(equity_rupees),
            lot_size: lot,
            confidence: 1.0,
            atr: None,
        }
    }

    #[test]
    fn full_confidence_risks_the_whole_budget() {
        let config = SizerConfig::default();
        // Risk budget 1% of 10,00,000 = 10,000; stop 100 -> 100 shares.
        let qty = size_position(&config, inputs(2000, 100, 1_000_000, 1));
        assert_eq!(qty, 100);
    }

    #[test]
    fn half_confidence_scales_down() {
        let config = SizerConfig::default();
        let mut i = inputs(2000, 100, 1_000_000, 1);
        i.confidence = 0.0;
        // 0.5 + 0.5*0 = half the raw quantity.
        assert_eq!(size_position(&config, i), 50);
    }

    #[test]
    fn quantity_is_lot_aligned() {
        let config = SizerConfig::default();
        // Raw 100 with lot 75 floors to 75.
        let qty = size_position(&config, inputs(100, 100, 1_000_000, 75));
        assert_eq!(qty % 75, 0);
        assert_eq!(qty, 75);
    }

    #[test]
    fn below_one_lot_drops_signal() {
        let config = SizerConfig::default();
        // Budget sizes ~100 shares; lot of 150 cannot be filled.
        let qty = size_position(&config, inputs(2000, 100, 1_000_000, 150));
        assert_eq!(qty, 0);
    }

    #[test]
    fn notional_cap_limits_quantity() {
        let config = SizerConfig::default();
        // Tight stop would size 10,000 shares; 25% notional cap at entry
        // 2000 allows 125.
        let qty = size_position(&config, inputs(2000, 1, 1_000_000, 1));
        assert_eq!(qty, 125);
    }

    #[test]
    fn atr_cap_applies_when_configured() {
        let config = SizerConfig {
            vol_risk_pct: Some(0.01),
            ..SizerConfig::default()
        };
        let mut i = inputs(100, 10, 1_000_000, 1);
        i.atr = Some(Paise::from_rupees(50));
        // Vol cap: 1% * 10,00,000 / 50 = 200.
        assert_eq!(size_position(&config, i), 200);
    }

    #[test]
    fn degenerate_inputs_drop() {
        let config = SizerConfig::default();
        assert_eq!(size_position(&config, inputs(0, 100, 1_000_000, 1)), 0);
        assert_eq!(size_position(&config, inputs(100, 0, 1_000_000, 1)), 0);
    }
}
