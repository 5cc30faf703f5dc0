// =============================================================================
// Market Clock — trading-day state machine in exchange time (Asia/Kolkata)
// =============================================================================
//
// State within a trading day, driven purely by the wall clock:
//
//   PRE_OPEN ──09:15──→ OPEN ──close-15m──→ EXPIRY_FLATTEN ──15:30──→ CLOSED
//                                  └─(when flatten < pre-close) PRE_CLOSE─┘
//
// Holidays and weekends are CLOSED_HOLIDAY all day. The flatten window
// (default 15 minutes before close) also blocks new entries, so it subsumes
// the 10-minute pre-close entry freeze whenever it is the longer of the two.
//
// IST is a fixed +05:30 offset with no daylight saving, so a FixedOffset is
// sufficient; no tz database required.
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use parking_lot::RwLock;
use tracing::info;

use crate::types::ProductKind;

/// Seconds east of UTC for Asia/Kolkata.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 1800;

/// Trading-day session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ClosedHoliday,
    PreOpen,
    Open,
    /// Last minutes of the session; exits only.
    PreClose,
    /// Forced-flatten window before close; exits only, expiring and intraday
    /// positions are squared off.
    ExpiryFlatten,
    Closed,
}

impl SessionState {
    pub fn allows_entry(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn allows_exit(self) -> bool {
        matches!(self, Self::Open | Self::PreClose | Self::ExpiryFlatten)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ClosedHoliday => "CLOSED_HOLIDAY",
            Self::PreOpen => "PRE_OPEN",
            Self::Open => "OPEN",
            Self::PreClose => "PRE_CLOSE",
            Self::ExpiryFlatten => "EXPIRY_FLATTEN",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Authority on trading-day state; `advance` is called once per engine tick.
pub struct MarketClock {
    open: NaiveTime,
    close: NaiveTime,
    pre_close_minutes: i64,
    flatten_minutes: i64,
    holidays: HashSet<NaiveDate>,
    state: RwLock<SessionState>,
}

impl MarketClock {
    pub fn new(
        open: NaiveTime,
        close: NaiveTime,
        pre_close_minutes: i64,
        flatten_minutes: i64,
        holidays: HashSet<NaiveDate>,
    ) -> Self {
        Self {
            open,
            close,
            pre_close_minutes,
            flatten_minutes,
            holidays,
            state: RwLock::new(SessionState::Closed),
        }
    }

    /// NSE defaults: 09:15–15:30, 10-minute pre-close, 15-minute flatten.
    pub fn nse_default(flatten_minutes: i64, holidays: HashSet<NaiveDate>) -> Self {
        Self::new(
            NaiveTime::from_hms_opt(9, 15, 0).expect("valid open"),
            NaiveTime::from_hms_opt(15, 30, 0).expect("valid close"),
            10,
            flatten_minutes,
            holidays,
        )
    }

    pub fn now_ist(&self) -> DateTime<FixedOffset> {
        let ist = FixedOffset::east_opt(IST_OFFSET_SECS).expect("valid IST offset");
        Utc::now().with_timezone(&ist)
    }

    pub fn today_ist(&self) -> NaiveDate {
        self.now_ist().date_naive()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Pure state computation for a given IST wall-clock instant.
    pub fn state_at(&self, ist: NaiveDateTime) -> SessionState {
        if !self.is_trading_day(ist.date()) {
            return SessionState::ClosedHoliday;
        }

        let t = ist.time();
        if t < self.open {
            return SessionState::PreOpen;
        }
        if t >= self.close {
            return SessionState::Closed;
        }

        let flatten_from = self.close - Duration::minutes(self.flatten_minutes);
        let pre_close_from = self.close - Duration::minutes(self.pre_close_minutes);
        if t >= flatten_from {
            SessionState::ExpiryFlatten
        } else if t >= pre_close_from {
            SessionState::PreClose
        } else {
            SessionState::Open
        }
    }

    /// Recompute the state from the wall clock, store it, and report the
    /// transition. Returns `(state, changed)`.
    pub fn advance(&self) -> (SessionState, bool) {
        let next = self.state_at(self.now_ist().naive_local());
        let mut state = self.state.write();
        let changed = *state != next;
        if changed {
            info!(from = %*state, to = %next, "market clock transition");
            *state = next;
        }
        (next, changed)
    }

    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    /// Pin the session state directly; unit tests drive the clock without
    /// depending on the wall clock.
    #[cfg(test)]
    pub(crate) fn force_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// New entries allowed right now.
    pub fn can_enter(&self) -> bool {
        self.current().allows_entry()
    }

    /// Exits allowed right now.
    pub fn can_exit(&self) -> bool {
        self.current().allows_exit()
    }

    /// True when the position must be squared off in the current flatten
    /// window: instruments expiring today, and intraday products at session
    /// end regardless of expiry.
    pub fn must_flatten(&self, expiry_date: Option<NaiveDate>, product: ProductKind) -> bool {
        if self.current() != SessionState::ExpiryFlatten {
            return false;
        }
        product == ProductKind::Intraday || expiry_date == Some(self.today_ist())
    }
}

impl std::fmt::Debug for MarketClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketClock")
            .field("open", &self.open)
            .field("close", &self.close)
            .field("flatten_minutes", &self.flatten_minutes)
            .field("holidays", &self.holidays.len())
            .field("state", &self.current())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> MarketClock {
        MarketClock::nse_default(15, HashSet::new())
    }

    fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, time.2)
            .unwrap()
    }

    // 2025-10-14 is a Tuesday.
    const TUE: (i32, u32, u32) = (2025, 10, 14);

    #[test]
    fn session_states_across_the_day() {
        let c = clock();
        assert_eq!(c.state_at(at(TUE, (8, 0, 0))), SessionState::PreOpen);
        assert_eq!(c.state_at(at(TUE, (9, 15, 0))), SessionState::Open);
        assert_eq!(c.state_at(at(TUE, (14, 0, 0))), SessionState::Open);
        assert_eq!(c.state_at(at(TUE, (15, 14, 59))), SessionState::Open);
        assert_eq!(c.state_at(at(TUE, (15, 15, 0))), SessionState::ExpiryFlatten);
        assert_eq!(c.state_at(at(TUE, (15, 29, 59))), SessionState::ExpiryFlatten);
        assert_eq!(c.state_at(at(TUE, (15, 30, 0))), SessionState::Closed);
    }

    #[test]
    fn pre_close_shows_when_flatten_window_is_shorter() {
        let c = MarketClock::nse_default(5, HashSet::new());
        assert_eq!(c.state_at(at(TUE, (15, 21, 0))), SessionState::PreClose);
        assert_eq!(c.state_at(at(TUE, (15, 26, 0))), SessionState::ExpiryFlatten);
    }

    #[test]
    fn weekends_and_holidays_are_closed() {
        let mut holidays = HashSet::new();
        holidays.insert(NaiveDate::from_ymd_opt(2025, 10, 21).unwrap()); // Diwali
        let c = MarketClock::nse_default(15, holidays);

        // Saturday.
        assert_eq!(
            c.state_at(at((2025, 10, 18), (11, 0, 0))),
            SessionState::ClosedHoliday
        );
        // Configured holiday on a Tuesday.
        assert_eq!(
            c.state_at(at((2025, 10, 21), (11, 0, 0))),
            SessionState::ClosedHoliday
        );
    }

    #[test]
    fn entry_and_exit_predicates() {
        assert!(SessionState::Open.allows_entry());
        assert!(!SessionState::PreClose.allows_entry());
        assert!(!SessionState::ExpiryFlatten.allows_entry());
        assert!(SessionState::PreClose.allows_exit());
        assert!(SessionState::ExpiryFlatten.allows_exit());
        assert!(!SessionState::Closed.allows_exit());
    }

    #[test]
    fn flatten_targets_expiring_and_intraday_only() {
        let c = clock();
        *c.state.write() = SessionState::ExpiryFlatten;
        let today = c.today_ist();
        let next_week = today + Duration::days(7);

        assert!(c.must_flatten(Some(today), ProductKind::Normal));
        assert!(!c.must_flatten(Some(next_week), ProductKind::Normal));
        assert!(c.must_flatten(None, ProductKind::Intraday));
        assert!(!c.must_flatten(None, ProductKind::Delivery));

        *c.state.write() = SessionState::Open;
        assert!(!c.must_flatten(Some(today), ProductKind::Normal));
    }
}
