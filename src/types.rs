// =============================================================================
// Shared types used across the Vajra trading engine
// =============================================================================
//
// Money is exact: all ledger arithmetic happens in integer paise (1 INR =
// 100 paise). Floats appear only at the broker wire edge and for ratio-style
// configuration values that never touch the ledger.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Fixed-precision money in paise (1/100 rupee).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Paise(i64);

impl Paise {
    pub const ZERO: Paise = Paise(0);

    pub const fn from_paise(p: i64) -> Self {
        Paise(p)
    }

    pub const fn from_rupees(r: i64) -> Self {
        Paise(r * 100)
    }

    /// Convert a rupee value coming off the wire (broker JSON) into paise,
    /// rounding to the nearest paisa. Never used inside the ledger.
    pub fn from_rupee_f64(r: f64) -> Self {
        Paise((r * 100.0).round() as i64)
    }

    pub const fn paise(self) -> i64 {
        self.0
    }

    pub fn as_rupee_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn abs(self) -> Self {
        Paise(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Paise(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Paise(self.0.max(other.0))
    }

    /// Multiply by an integer quantity (shares/contracts).
    pub fn times(self, qty: i64) -> Self {
        Paise(self.0 * qty)
    }

    /// Exact proportional share: `self * num / den`, computed in i128 and
    /// rounded half-up. Callers keep the ledger exact by assigning the
    /// remainder (`self - share`) to the surviving leg.
    pub fn scale(self, num: i64, den: i64) -> Self {
        debug_assert!(den != 0);
        let wide = self.0 as i128 * num as i128;
        let den = den as i128;
        let half = den.abs() / 2;
        let rounded = if wide >= 0 {
            (wide + half) / den
        } else {
            (wide - half) / den
        };
        Paise(rounded as i64)
    }

    /// Fraction of this amount expressed in basis points (1 bps = 0.01%).
    pub fn bps(self, bps: i64) -> Self {
        self.scale(bps, 10_000)
    }

    /// Round down to the nearest multiple of `tick`.
    pub fn align_down(self, tick: Paise) -> Self {
        if tick.0 <= 0 {
            return self;
        }
        Paise(self.0.div_euclid(tick.0) * tick.0)
    }
}

impl std::ops::Add for Paise {
    type Output = Paise;
    fn add(self, rhs: Paise) -> Paise {
        Paise(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Paise {
    type Output = Paise;
    fn sub(self, rhs: Paise) -> Paise {
        Paise(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Paise {
    type Output = Paise;
    fn neg(self) -> Paise {
        Paise(-self.0)
    }
}

impl std::ops::AddAssign for Paise {
    fn add_assign(&mut self, rhs: Paise) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Paise {
    fn sub_assign(&mut self, rhs: Paise) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Paise {
    fn sum<I: Iterator<Item = Paise>>(iter: I) -> Paise {
        iter.fold(Paise::ZERO, |acc, p| acc + p)
    }
}

impl std::fmt::Display for Paise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// ---------------------------------------------------------------------------
// Exchanges & instruments
// ---------------------------------------------------------------------------

/// Exchange segment an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// NSE equity cash.
    Nse,
    /// BSE equity cash.
    Bse,
    /// NSE futures & options.
    Nfo,
    /// BSE futures & options.
    Bfo,
}

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Bse => "BSE",
            Self::Nfo => "NFO",
            Self::Bfo => "BFO",
        }
    }

    pub fn is_derivative_segment(self) -> bool {
        matches!(self, Self::Nfo | Self::Bfo)
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    Equity,
    Future,
    OptionCall,
    OptionPut,
}

impl InstrumentType {
    pub fn is_option(self) -> bool {
        matches!(self, Self::OptionCall | Self::OptionPut)
    }

    pub fn is_derivative(self) -> bool {
        !matches!(self, Self::Equity)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "EQUITY",
            Self::Future => "FUTURE",
            Self::OptionCall => "OPTION_CALL",
            Self::OptionPut => "OPTION_PUT",
        }
    }
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Buy or sell side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn signum(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker product bucket an order is booked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    /// Equity intraday (square-off same day).
    Intraday,
    /// Equity delivery.
    Delivery,
    /// F&O positional.
    Normal,
}

impl ProductKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intraday => "INTRADAY",
            Self::Delivery => "DELIVERY",
            Self::Normal => "NORMAL",
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Engine mode
// ---------------------------------------------------------------------------

/// Which order-execution protocol the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Paper,
    Live,
    Backtest,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl EngineMode {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
            Self::Backtest => write!(f, "backtest"),
        }
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// A single market quote as served by the broker gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Last traded price.
    pub ltp: Paise,
    #[serde(default)]
    pub bid: Option<Paise>,
    #[serde(default)]
    pub ask: Option<Paise>,
    pub ts: DateTime<Utc>,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, ltp: Paise) -> Self {
        Self {
            symbol: symbol.into(),
            ltp,
            bid: None,
            ask: None,
            ts: Utc::now(),
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
    fn paise_display_formats_rupees() {
        assert_eq!(Paise::from_paise(123_456).to_string(), "1234.56");
        assert_eq!(Paise::from_paise(-50).to_string(), "-0.50");
        assert_eq!(Paise::ZERO.to_string(), "0.00");
    }

    #[test]
    fn paise_scale_is_exact_with_remainder() {
        // Splitting 100 into thirds: share + remainder must reconstruct.
        let total = Paise::from_paise(100);
        let share = total.scale(1, 3);
        assert_eq!(share.paise(), 33);
        assert_eq!((total - share).paise(), 67);
    }

    #[test]
    fn paise_from_rupee_f64_rounds_to_nearest() {
        assert_eq!(Paise::from_rupee_f64(2000.005).paise(), 200_001);
        assert_eq!(Paise::from_rupee_f64(99.994).paise(), 9_999);
    }

    #[test]
    fn align_down_snaps_to_tick() {
        let tick = Paise::from_paise(5);
        assert_eq!(Paise::from_paise(103).align_down(tick).paise(), 100);
        assert_eq!(Paise::from_paise(100).align_down(tick).paise(), 100);
    }

    #[test]
    fn side_signum_and_opposite() {
        assert_eq!(Side::Buy.signum(), 1);
        assert_eq!(Side::Sell.signum(), -1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }
}
