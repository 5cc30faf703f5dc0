// =============================================================================
// Expiry Resolver — catalog-first derivative expiry lookup with symbol parsing
// =============================================================================
//
// Resolution order:
//   1. InstrumentsCatalog (authoritative, refreshed daily).
//   2. Symbol parsing fallback covering NSE option symbology:
//        weekly   UNDERLYING YY M DD STRIKE {CE|PE}   (M: 1-9, O, N, D)
//        monthly  UNDERLYING YY MMM [DD] STRIKE {CE|PE}
//        futures  UNDERLYING YY MMM FUT
//      Monthly symbols without an explicit day expire on the last occurrence
//      of the underlying's expiry weekday in that month (NIFTY Thursday,
//      BANKNIFTY Wednesday, FINNIFTY Tuesday, others Thursday).
//
// A symbol neither source can resolve yields `Unknown`; the flatten state
// machine then treats the instrument as never expiring, which is loud-logged
// here because it can leave a position unflattened on expiry day.
// =============================================================================

use std::sync::{Arc, OnceLock};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use tracing::{debug, warn};

use crate::instruments::InstrumentsCatalog;
use crate::types::{InstrumentType, Paise};

// ---------------------------------------------------------------------------
// Parsed symbol attributes
// ---------------------------------------------------------------------------

/// Attributes recovered from an exchange option/future symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbol {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: Option<Paise>,
    pub instrument_type: InstrumentType,
}

/// Outcome of an expiry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedExpiry {
    /// Derivative expiring on the given date.
    Date(NaiveDate),
    /// Equity — the instrument never expires.
    NoExpiry,
    /// Neither the catalog nor the symbol grammar could resolve it.
    Unknown,
}

impl ResolvedExpiry {
    pub fn expires_on(self, date: NaiveDate) -> bool {
        matches!(self, Self::Date(d) if d == date)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct ExpiryResolver {
    catalog: Arc<InstrumentsCatalog>,
}

impl ExpiryResolver {
    pub fn new(catalog: Arc<InstrumentsCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve the expiry date for `symbol`. `today` anchors year rollover for
    /// the parsing fallback.
    pub fn resolve(&self, symbol: &str, today: NaiveDate) -> ResolvedExpiry {
        if let Some(instrument) = self.catalog.resolve_at(symbol, today) {
            return match instrument.expiry_date {
                Some(d) => ResolvedExpiry::Date(d),
                None if instrument.instrument_type == InstrumentType::Equity => {
                    ResolvedExpiry::NoExpiry
                }
                None => {
                    warn!(symbol, "catalog instrument is a derivative with no expiry date");
                    ResolvedExpiry::Unknown
                }
            };
        }

        if let Some(parsed) = parse_symbol(symbol, today) {
            debug!(symbol, expiry = %parsed.expiry, "expiry resolved by symbol parsing");
            return ResolvedExpiry::Date(parsed.expiry);
        }

        warn!(
            symbol,
            "UNRESOLVED EXPIRY — instrument will be treated as never expiring; \
             positions in it will not be force-flattened"
        );
        ResolvedExpiry::Unknown
    }
}

// ---------------------------------------------------------------------------
// Symbol grammar
// ---------------------------------------------------------------------------

fn weekly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]+?)(\d{2})([1-9OND])(\d{2})(\d{2,})(CE|PE)$").expect("weekly regex")
    })
}

fn monthly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]+?)(\d{2})(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)(\d+)(CE|PE)$")
            .expect("monthly regex")
    })
}

fn future_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]+?)(\d{2})(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)FUT$")
            .expect("future regex")
    })
}

/// Parse an NSE-style derivative symbol into its attributes. Returns `None`
/// for equities or anything outside the grammar.
pub fn parse_symbol(symbol: &str, today: NaiveDate) -> Option<ParsedSymbol> {
    let symbol = symbol.trim().to_uppercase();

    if let Some(caps) = weekly_re().captures(&symbol) {
        let underlying = caps[1].to_string();
        let year = roll_year(2000 + caps[2].parse::<i32>().ok()?, month_code(&caps[3])?, today);
        let month = month_code(&caps[3])?;
        let day: u32 = caps[4].parse().ok()?;
        let expiry = NaiveDate::from_ymd_opt(year, month, day)?;
        let strike = Paise::from_rupees(caps[5].parse::<i64>().ok()?);
        return Some(ParsedSymbol {
            underlying,
            expiry,
            strike: Some(strike),
            instrument_type: option_type(&caps[6]),
        });
    }

    if let Some(caps) = monthly_re().captures(&symbol) {
        let underlying = caps[1].to_string();
        let month = month_name(&caps[3])?;
        let year = roll_year(2000 + caps[2].parse::<i32>().ok()?, month, today);
        let (day, strike_digits) = split_day_strike(&caps[4], year, month);
        let expiry = match day {
            Some(d) => NaiveDate::from_ymd_opt(year, month, d)?,
            None => last_weekday_of_month(year, month, expiry_weekday(&underlying))?,
        };
        let strike = Paise::from_rupees(strike_digits.parse::<i64>().ok()?);
        return Some(ParsedSymbol {
            underlying,
            expiry,
            strike: Some(strike),
            instrument_type: option_type(&caps[5]),
        });
    }

    if let Some(caps) = future_re().captures(&symbol) {
        let underlying = caps[1].to_string();
        let month = month_name(&caps[3])?;
        let year = roll_year(2000 + caps[2].parse::<i32>().ok()?, month, today);
        let expiry = last_weekday_of_month(year, month, expiry_weekday(&underlying))?;
        return Some(ParsedSymbol {
            underlying,
            expiry,
            strike: None,
            instrument_type: InstrumentType::Future,
        });
    }

    None
}

/// Weekly month code: 1-9 for Jan-Sep, O/N/D for Oct-Dec.
fn month_code(code: &str) -> Option<u32> {
    match code {
        "O" => Some(10),
        "N" => Some(11),
        "D" => Some(12),
        d => d.parse::<u32>().ok().filter(|m| (1..=9).contains(m)),
    }
}

fn month_name(name: &str) -> Option<u32> {
    const NAMES: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    NAMES.iter().position(|&n| n == name).map(|i| i as u32 + 1)
}

fn option_type(suffix: &str) -> InstrumentType {
    if suffix == "CE" {
        InstrumentType::OptionCall
    } else {
        InstrumentType::OptionPut
    }
}

/// If the parsed month is strictly earlier than the current month in the same
/// parsed year, the contract belongs to next year.
fn roll_year(year: i32, month: u32, today: NaiveDate) -> i32 {
    if year == today.year() && month < today.month() {
        year + 1
    } else {
        year
    }
}

/// The digit blob after a monthly month-name is either STRIKE or DD+STRIKE.
/// Treat the first two digits as a day only when they form a valid date and
/// at least four digits remain for the strike; a five-digit blob is always a
/// bare index strike (e.g. 25550), never day + three-digit strike.
fn split_day_strike(digits: &str, year: i32, month: u32) -> (Option<u32>, String) {
    if digits.len() >= 6 {
        if let Ok(day) = digits[..2].parse::<u32>() {
            if NaiveDate::from_ymd_opt(year, month, day).is_some() {
                return (Some(day), digits[2..].to_string());
            }
        }
    }
    (None, digits.to_string())
}

/// Expiry weekday per underlying index.
pub fn expiry_weekday(underlying: &str) -> Weekday {
    match underlying {
        "BANKNIFTY" => Weekday::Wed,
        "FINNIFTY" => Weekday::Tue,
        _ => Weekday::Thu,
    }
}

/// Last occurrence of `weekday` within (year, month).
pub fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut d = first_next - Duration::days(1);
    while d.weekday() != weekday {
        d -= Duration::days(1);
    }
    Some(d)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_weekly_october_symbol() {
        // NIFTY 25 O 14 25550 PE -> 2025-10-14, strike 25550.
        let p = parse_symbol("NIFTY25O1425550PE", day(2025, 9, 1)).unwrap();
        assert_eq!(p.underlying, "NIFTY");
        assert_eq!(p.expiry, day(2025, 10, 14));
        assert_eq!(p.strike, Some(Paise::from_rupees(25_550)));
        assert_eq!(p.instrument_type, InstrumentType::OptionPut);
    }

    #[test]
    fn parses_weekly_numeric_month() {
        // NIFTY 24 7 25 24000 CE -> 2024-07-25.
        let p = parse_symbol("NIFTY2472524000CE", day(2024, 7, 1)).unwrap();
        assert_eq!(p.expiry, day(2024, 7, 25));
        assert_eq!(p.instrument_type, InstrumentType::OptionCall);
    }

    #[test]
    fn parses_monthly_with_explicit_day() {
        let p = parse_symbol("NIFTY25OCT1425550PE", day(2025, 9, 1)).unwrap();
        assert_eq!(p.underlying, "NIFTY");
        assert_eq!(p.expiry, day(2025, 10, 14));
        assert_eq!(p.strike, Some(Paise::from_rupees(25_550)));
    }

    #[test]
    fn monthly_without_day_uses_last_expiry_weekday() {
        // Last Thursday of Dec 2024 is the 26th.
        let p = parse_symbol("NIFTY24DEC24000CE", day(2024, 11, 1)).unwrap();
        assert_eq!(p.expiry, day(2024, 12, 26));

        // BANKNIFTY expires Wednesday: last Wednesday of Dec 2024 is the 25th.
        let p = parse_symbol("BANKNIFTY24DEC51000PE", day(2024, 11, 1)).unwrap();
        assert_eq!(p.expiry, day(2024, 12, 25));
    }

    #[test]
    fn monthly_bare_strike_is_not_split_into_day() {
        let p = parse_symbol("NIFTY25OCT25550CE", day(2025, 9, 1)).unwrap();
        assert_eq!(p.strike, Some(Paise::from_rupees(25_550)));
        // Last Thursday of Oct 2025.
        assert_eq!(p.expiry, day(2025, 10, 30));
    }

    #[test]
    fn finnifty_expires_tuesday() {
        assert_eq!(expiry_weekday("FINNIFTY"), Weekday::Tue);
        let d = last_weekday_of_month(2025, 1, Weekday::Tue).unwrap();
        assert_eq!(d, day(2025, 1, 28));
    }

    #[test]
    fn year_rolls_forward_when_month_has_passed() {
        // Parsed in November 2025, a "25JAN" symbol belongs to January 2026.
        let p = parse_symbol("NIFTY25JAN24000CE", day(2025, 11, 10)).unwrap();
        assert_eq!(p.expiry.year(), 2026);
        assert_eq!(p.expiry.month(), 1);
    }

    #[test]
    fn parses_monthly_future() {
        let p = parse_symbol("NIFTY25OCTFUT", day(2025, 9, 1)).unwrap();
        assert_eq!(p.instrument_type, InstrumentType::Future);
        assert_eq!(p.strike, None);
        // Last Thursday of Oct 2025 is the 30th.
        assert_eq!(p.expiry, day(2025, 10, 30));
    }

    #[test]
    fn rejects_plain_equity_symbol() {
        assert!(parse_symbol("RELIANCE", day(2025, 1, 1)).is_none());
        assert!(parse_symbol("TCS", day(2025, 1, 1)).is_none());
    }
}
