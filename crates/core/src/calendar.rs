//! Warsaw wall clock, trading sessions, and the GPW holiday calendar.
//!
//! All persisted timestamps are UTC; scheduling and session decisions are
//! made in Europe/Warsaw local time. Sessions run 09:00–17:00 local on
//! weekdays that are not Polish public holidays.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Europe::Warsaw;

use crate::config::{CalendarConfig, SessionConfig};
use crate::error::EngineError;

/// Source of the current instant. Components take a `Clock` so tests can
/// pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current instant in Warsaw local time.
    fn local_now(&self) -> DateTime<chrono_tz::Tz> {
        self.now().with_timezone(&Warsaw)
    }
}

/// Wall clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// One continuous-trading session on a trading day, with bounds resolved
/// to UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingSession {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
    /// Last instant at which new non-hold signals may still be emitted.
    pub last_entry: DateTime<Utc>,
}

impl TradingSession {
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.open && t <= self.close
    }

    #[must_use]
    pub fn allows_entry(&self, t: DateTime<Utc>) -> bool {
        t >= self.open && t <= self.last_entry
    }
}

/// Trading-day and session arithmetic for the Warsaw exchange.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    open_local: NaiveTime,
    close_local: NaiveTime,
    last_entry_local: NaiveTime,
    extra_holidays: Vec<NaiveDate>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self {
            open_local: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            close_local: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            last_entry_local: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            extra_holidays: Vec::new(),
        }
    }
}

impl TradingCalendar {
    /// Builds a calendar from the session and calendar configuration.
    ///
    /// # Errors
    /// Returns a configuration error if a time string does not parse as
    /// `HH:MM` or the bounds are inverted.
    pub fn from_config(
        session: &SessionConfig,
        calendar: &CalendarConfig,
    ) -> Result<Self, EngineError> {
        let parse = |s: &str, key: &str| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|_| EngineError::Configuration(format!("{key} must be HH:MM, got {s:?}")))
        };

        let open_local = parse(&session.open_local, "session.open_local")?;
        let close_local = parse(&session.close_local, "session.close_local")?;
        let last_entry_local = parse(&session.last_entry_local, "session.last_entry_local")?;

        if open_local >= close_local {
            return Err(EngineError::Configuration(format!(
                "session open {open_local} must precede close {close_local}"
            )));
        }

        Ok(Self {
            open_local,
            close_local,
            last_entry_local,
            extra_holidays: calendar.extra_holidays.clone(),
        })
    }

    /// True on weekdays that are not Polish public holidays.
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.extra_holidays.contains(&date) {
            return false;
        }
        !is_polish_holiday(date)
    }

    /// The session for a given date, or `None` on non-trading days.
    #[must_use]
    pub fn session_for(&self, date: NaiveDate) -> Option<TradingSession> {
        if !self.is_trading_day(date) {
            return None;
        }
        Some(TradingSession {
            date,
            open: warsaw_to_utc(date, self.open_local),
            close: warsaw_to_utc(date, self.close_local),
            last_entry: warsaw_to_utc(date, self.last_entry_local),
        })
    }

    /// The session whose date matches `t` in Warsaw local time, if any.
    #[must_use]
    pub fn session_at(&self, t: DateTime<Utc>) -> Option<TradingSession> {
        self.session_for(t.with_timezone(&Warsaw).date_naive())
    }

    /// True while the session of `t`'s local date is open at `t`.
    #[must_use]
    pub fn is_in_session(&self, t: DateTime<Utc>) -> bool {
        self.session_at(t).is_some_and(|s| s.contains(t))
    }

    /// True in the 07:00–09:00 local pre-market window of a trading day.
    #[must_use]
    pub fn is_pre_market(&self, t: DateTime<Utc>) -> bool {
        let local = t.with_timezone(&Warsaw);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let pre_open = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let time = local.time();
        time >= pre_open && time < self.open_local
    }

    /// The next trading day strictly after `date`.
    #[must_use]
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date + Duration::days(1);
        while !self.is_trading_day(d) {
            d += Duration::days(1);
        }
        d
    }
}

/// Resolves a Warsaw local date+time to a UTC instant.
///
/// On the spring-forward gap the first valid later instant is used; on the
/// autumn overlap the earlier offset wins. Session bounds never fall inside
/// either, so this only matters for arbitrary timestamps.
#[must_use]
pub fn warsaw_to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    match Warsaw.from_local_datetime(&date.and_time(time)) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        chrono::LocalResult::None => {
            // Inside the DST gap; shift forward an hour.
            let shifted = date.and_time(time) + Duration::hours(1);
            Warsaw
                .from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(time)))
        }
    }
}

/// Fixed Polish public holidays plus the Easter-derived moveable feasts.
#[must_use]
pub fn is_polish_holiday(date: NaiveDate) -> bool {
    let (month, day) = (date.month(), date.day());
    let fixed = matches!(
        (month, day),
        (1, 1)    // New Year
        | (1, 6)  // Epiphany
        | (5, 1)  // Labour Day
        | (5, 3)  // Constitution Day
        | (8, 15) // Assumption
        | (11, 1) // All Saints
        | (11, 11) // Independence Day
        | (12, 25) // Christmas
        | (12, 26) // Boxing Day
    );
    if fixed {
        return true;
    }

    let easter = easter_sunday(date.year());
    date == easter + Duration::days(1) // Easter Monday
        || date == easter + Duration::days(60) // Corpus Christi
}

/// Gregorian computus (Meeus/Jones/Butcher) for Easter Sunday.
#[must_use]
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap()
}
