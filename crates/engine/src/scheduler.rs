//! Cycle scheduler.
//!
//! A single coordinator ticks (default every 60 s), finds due schedules,
//! and hands each one to a worker task. A schedule never has two
//! concurrent executions: a tick that finds one still running is
//! coalesced. One schedule's failure never blocks another; every run is
//! recorded as a `ScheduleExecution`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Europe::Warsaw;

use gpw_advisor_core::{warsaw_to_utc, Clock, TradingCalendar};
use gpw_advisor_data::{ExecutionRepository, ScheduleExecutionRecord, ScheduleKind};

/// Outcome counters of one cycle run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    pub items_processed: i64,
    pub items_failed: i64,
}

/// Executes the work behind a schedule kind.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Runs one cycle of the given kind.
    ///
    /// # Errors
    /// Returns an error when the cycle as a whole failed; per-item
    /// failures belong in the report instead.
    async fn run_cycle(&self, kind: ScheduleKind) -> anyhow::Result<CycleReport>;
}

/// One schedule record.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub kind: ScheduleKind,
    /// Cadence inside the active window.
    pub interval_minutes: u32,
    /// Cadence outside the trading session, for schedules that also run
    /// off-session (the news collector). `None` means in-session only.
    pub off_session_interval_minutes: Option<u32>,
    /// Active window in Warsaw local time.
    pub active_start: NaiveTime,
    pub active_end: NaiveTime,
    /// Active days, Monday first.
    pub active_days: [bool; 7],
    /// Skip non-trading days entirely.
    pub respect_holidays: bool,
    /// Extra run fired once this many minutes after session close.
    pub run_after_close_minutes: Option<u32>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Schedule {
    #[must_use]
    pub fn new(kind: ScheduleKind, interval_minutes: u32) -> Self {
        Self {
            kind,
            interval_minutes,
            off_session_interval_minutes: None,
            active_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            active_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            active_days: [true, true, true, true, true, false, false],
            respect_holidays: true,
            run_after_close_minutes: None,
            last_run_at: None,
            next_run_at: None,
            consecutive_failures: 0,
        }
    }

    #[must_use]
    pub fn with_active_hours(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.active_start = start;
        self.active_end = end;
        self
    }

    #[must_use]
    pub fn with_off_session_interval(mut self, minutes: u32) -> Self {
        self.off_session_interval_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn with_all_days(mut self) -> Self {
        self.active_days = [true; 7];
        self
    }

    #[must_use]
    pub fn with_run_after_close(mut self, minutes: u32) -> Self {
        self.run_after_close_minutes = Some(minutes);
        self
    }

    fn day_active(&self, weekday: Weekday) -> bool {
        self.active_days[weekday.num_days_from_monday() as usize]
    }

    /// The next aligned run instant strictly after `after`.
    ///
    /// Boundaries are multiples of the effective interval from local
    /// midnight; windows outside the active hours/days (and, when holiday
    /// handling is on, non-trading days) are skipped.
    #[must_use]
    pub fn next_run_after(
        &self,
        after: DateTime<Utc>,
        calendar: &TradingCalendar,
    ) -> DateTime<Utc> {
        let local_after = after.with_timezone(&Warsaw);
        let mut date = local_after.date_naive();

        // Bounded scan; a fortnight always contains an active window for
        // any sane schedule.
        for day_offset in 0..28 {
            let same_day = day_offset == 0;
            let skip_day = !self.day_active(date.weekday())
                || (self.respect_holidays && !calendar.is_trading_day(date));

            if !skip_day {
                let window_start = minutes_of(self.active_start);
                let current_minutes = minutes_of(local_after.time());

                // Within the same day past the window start the boundary
                // must be strictly later than `after`; otherwise the first
                // boundary at or after the window start qualifies.
                let (floor_minutes, strictly_after) = if same_day && current_minutes >= window_start
                {
                    (current_minutes, true)
                } else {
                    (window_start, false)
                };

                let interval = self.effective_interval(date, floor_minutes, calendar);
                let candidate_minutes = if strictly_after {
                    (floor_minutes / interval + 1) * interval
                } else {
                    floor_minutes.div_ceil(interval) * interval
                };

                if candidate_minutes <= minutes_of(self.active_end) {
                    let time = NaiveTime::from_hms_opt(
                        candidate_minutes / 60,
                        candidate_minutes % 60,
                        0,
                    )
                    .unwrap();
                    return warsaw_to_utc(date, time);
                }
            }

            date = date.succ_opt().unwrap_or(date);
        }

        // Unreachable for any schedule with an active day; fall back to
        // one interval from now.
        after + ChronoDuration::minutes(i64::from(self.interval_minutes))
    }

    fn effective_interval(
        &self,
        date: chrono::NaiveDate,
        at_minutes: u32,
        calendar: &TradingCalendar,
    ) -> u32 {
        let Some(off) = self.off_session_interval_minutes else {
            return self.interval_minutes.max(1);
        };
        let in_session = calendar.session_for(date).is_some_and(|session| {
            let t = NaiveTime::from_hms_opt(at_minutes / 60, at_minutes % 60, 0).unwrap();
            let instant = warsaw_to_utc(date, t);
            session.contains(instant)
        });
        if in_session {
            self.interval_minutes.max(1)
        } else {
            off.max(1)
        }
    }

    /// Whether the schedule is due at `now`, including the post-close run.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>, calendar: &TradingCalendar) -> bool {
        if let Some(next) = self.next_run_at {
            if now >= next {
                return true;
            }
        }
        self.post_close_due(now, calendar).is_some()
    }

    /// The post-close fire instant if it is due and not yet run.
    fn post_close_due(&self, now: DateTime<Utc>, calendar: &TradingCalendar) -> Option<DateTime<Utc>> {
        let offset = self.run_after_close_minutes?;
        let session = calendar.session_at(now)?;
        let fire_at = session.close + ChronoDuration::minutes(i64::from(offset));
        if now >= fire_at && self.last_run_at.map_or(true, |last| last < fire_at) {
            Some(fire_at)
        } else {
            None
        }
    }

    /// Records a completed run and advances the next-run pointer.
    pub fn mark_ran(&mut self, now: DateTime<Utc>, calendar: &TradingCalendar, failed: bool) {
        self.last_run_at = Some(now);
        self.next_run_at = Some(self.next_run_after(now, calendar));
        if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
    }
}

fn minutes_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// The default cadence set.
#[must_use]
pub fn default_schedules() -> Vec<Schedule> {
    let open = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let close = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    let day_end = NaiveTime::from_hms_opt(23, 59, 0).unwrap();

    vec![
        Schedule::new(ScheduleKind::Price, 5).with_active_hours(open, close),
        Schedule::new(ScheduleKind::News, 30)
            .with_active_hours(midnight, day_end)
            .with_off_session_interval(120)
            .with_all_days(),
        Schedule::new(ScheduleKind::Signals, 30).with_active_hours(open, close),
        Schedule::new(ScheduleKind::Outcomes, 30)
            .with_active_hours(open, close)
            .with_run_after_close(5),
    ]
}

/// Coordinator that ticks the schedule set and fans work out to tasks.
pub struct Scheduler {
    schedules: Vec<Schedule>,
    calendar: TradingCalendar,
    clock: Arc<dyn Clock>,
    runner: Arc<dyn CycleRunner>,
    executions: Option<ExecutionRepository>,
    tick_interval: Duration,
    in_flight: HashMap<ScheduleKind, Arc<AtomicBool>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        schedules: Vec<Schedule>,
        calendar: TradingCalendar,
        clock: Arc<dyn Clock>,
        runner: Arc<dyn CycleRunner>,
        executions: Option<ExecutionRepository>,
        tick_interval: Duration,
    ) -> Self {
        let in_flight = schedules
            .iter()
            .map(|s| (s.kind, Arc::new(AtomicBool::new(false))))
            .collect();
        Self {
            schedules,
            calendar,
            clock,
            runner,
            executions,
            tick_interval,
            in_flight,
        }
    }

    /// Runs the coordinator loop until the task is aborted.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick_once().await;
        }
    }

    /// One coordinator tick: starts a worker task per due schedule.
    /// Returns the kinds that were started (coalesced ones excluded).
    pub async fn tick_once(&mut self) -> Vec<ScheduleKind> {
        let now = self.clock.now();
        let mut started = Vec::new();

        for schedule in &mut self.schedules {
            if schedule.next_run_at.is_none() {
                schedule.next_run_at = Some(schedule.next_run_after(now, &self.calendar));
            }
            if !schedule.is_due(now, &self.calendar) {
                continue;
            }

            let busy = self
                .in_flight
                .get(&schedule.kind)
                .cloned()
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
            if busy.swap(true, Ordering::AcqRel) {
                tracing::debug!("{} still running, coalescing", schedule.kind.as_str());
                continue;
            }

            // Advance before running so a slow cycle does not re-trigger
            // itself on the next tick; failures are reflected afterwards
            // via the execution record.
            schedule.mark_ran(now, &self.calendar, false);
            started.push(schedule.kind);

            let kind = schedule.kind;
            let runner = Arc::clone(&self.runner);
            let executions = self.executions.clone();
            let clock = Arc::clone(&self.clock);

            tokio::spawn(async move {
                let started_at = clock.now();
                let result = runner.run_cycle(kind).await;
                let duration_ms = (clock.now() - started_at).num_milliseconds();

                let record = match &result {
                    Ok(report) => ScheduleExecutionRecord {
                        kind,
                        started_at,
                        duration_ms,
                        items_processed: report.items_processed,
                        items_failed: report.items_failed,
                        error: None,
                    },
                    Err(e) => {
                        tracing::error!("{} cycle failed: {}", kind.as_str(), e);
                        ScheduleExecutionRecord {
                            kind,
                            started_at,
                            duration_ms,
                            items_processed: 0,
                            items_failed: 0,
                            error: Some(e.to_string()),
                        }
                    }
                };

                if let Some(repo) = executions {
                    if let Err(e) = repo.insert(&record).await {
                        tracing::warn!("Could not record execution: {}", e);
                    }
                }

                busy.store(false, Ordering::Release);
            });
        }

        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use gpw_advisor_core::FixedClock;
    use std::sync::Mutex;

    fn calendar() -> TradingCalendar {
        TradingCalendar::default()
    }

    /// Monday 2025-06-09, a plain trading day (CEST, UTC+2).
    fn monday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 9, h - 2, m, 0).unwrap()
    }

    #[test]
    fn price_schedule_aligns_to_five_minutes() {
        let schedule = Schedule::new(ScheduleKind::Price, 5);
        // 10:02 local -> next boundary 10:05 local (08:05 UTC).
        let next = schedule.next_run_after(monday(10, 2), &calendar());
        assert_eq!(next, monday(10, 5));

        // Exactly on a boundary advances to the next one.
        let next = schedule.next_run_after(monday(10, 5), &calendar());
        assert_eq!(next, monday(10, 10));
    }

    #[test]
    fn run_after_window_rolls_to_next_day() {
        let schedule = Schedule::new(ScheduleKind::Price, 5);
        // 18:00 Monday -> window opening boundary Tuesday 09:00.
        let next = schedule.next_run_after(monday(18, 0), &calendar());
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        assert_eq!(next, warsaw_to_utc(tuesday, NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
    }

    #[test]
    fn weekend_skipped_to_monday() {
        let schedule = Schedule::new(ScheduleKind::Signals, 30);
        // Friday 2025-06-06 18:00 local (16:00 UTC) -> Monday 09:00.
        let friday_evening = Utc.with_ymd_and_hms(2025, 6, 6, 16, 0, 0).unwrap();
        let next = schedule.next_run_after(friday_evening, &calendar());
        let monday_date = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        assert_eq!(
            next,
            warsaw_to_utc(monday_date, NaiveTime::from_hms_opt(9, 0, 0).unwrap())
        );
    }

    #[test]
    fn holiday_skipped_when_respected() {
        let schedule = Schedule::new(ScheduleKind::Price, 5);
        // Wednesday 2025-04-30 18:00 -> May 1 is a holiday -> May 2.
        let wed = warsaw_to_utc(
            NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        );
        let next = schedule.next_run_after(wed, &calendar());
        assert_eq!(
            next,
            warsaw_to_utc(
                NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap()
            )
        );
    }

    #[test]
    fn news_uses_off_session_interval_in_the_evening() {
        let schedule = Schedule::new(ScheduleKind::News, 30)
            .with_active_hours(
                NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            )
            .with_off_session_interval(120)
            .with_all_days();

        // 18:05 local, off-session: next 120-minute boundary is 20:00.
        let next = schedule.next_run_after(monday(18, 5), &calendar());
        assert_eq!(next, monday(20, 0));

        // 10:05 local, in-session: next 30-minute boundary is 10:30.
        let next = schedule.next_run_after(monday(10, 5), &calendar());
        assert_eq!(next, monday(10, 30));
    }

    #[test]
    fn post_close_run_fires_once() {
        let mut schedule = Schedule::new(ScheduleKind::Outcomes, 30).with_run_after_close(5);
        let cal = calendar();

        // 17:04 local: not yet due (ordinary next_run is tomorrow).
        schedule.next_run_at = Some(schedule.next_run_after(monday(17, 1), &cal));
        assert!(!schedule.is_due(monday(17, 4), &cal));

        // 17:06 local: the close + 5 run fires.
        assert!(schedule.is_due(monday(17, 6), &cal));

        // After running, the same fire instant is spent.
        schedule.mark_ran(monday(17, 6), &cal, false);
        assert!(!schedule.is_due(monday(17, 7), &cal));
    }

    #[test]
    fn failures_tracked_and_reset() {
        let mut schedule = Schedule::new(ScheduleKind::Price, 5);
        let cal = calendar();

        schedule.mark_ran(monday(10, 0), &cal, true);
        schedule.mark_ran(monday(10, 5), &cal, true);
        assert_eq!(schedule.consecutive_failures, 2);

        schedule.mark_ran(monday(10, 10), &cal, false);
        assert_eq!(schedule.consecutive_failures, 0);
    }

    #[test]
    fn default_cadences() {
        let schedules = default_schedules();
        let by_kind = |kind: ScheduleKind| {
            schedules
                .iter()
                .find(|s| s.kind == kind)
                .expect("schedule present")
        };

        assert_eq!(by_kind(ScheduleKind::Price).interval_minutes, 5);
        assert_eq!(by_kind(ScheduleKind::News).interval_minutes, 30);
        assert_eq!(
            by_kind(ScheduleKind::News).off_session_interval_minutes,
            Some(120)
        );
        assert_eq!(by_kind(ScheduleKind::Signals).interval_minutes, 30);
        assert_eq!(
            by_kind(ScheduleKind::Outcomes).run_after_close_minutes,
            Some(5)
        );
    }

    struct RecordingRunner {
        calls: Mutex<Vec<ScheduleKind>>,
        fail: bool,
    }

    #[async_trait]
    impl CycleRunner for RecordingRunner {
        async fn run_cycle(&self, kind: ScheduleKind) -> anyhow::Result<CycleReport> {
            self.calls.lock().unwrap().push(kind);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(CycleReport {
                items_processed: 1,
                items_failed: 0,
            })
        }
    }

    #[tokio::test]
    async fn due_schedules_started_on_tick() {
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
            fail: false,
        });
        let clock = Arc::new(FixedClock(monday(10, 0)));

        let mut schedules = vec![Schedule::new(ScheduleKind::Price, 5)];
        // Due in the past relative to the fixed clock.
        schedules[0].next_run_at = Some(monday(9, 55));

        let mut scheduler = Scheduler::new(
            schedules,
            calendar(),
            clock,
            runner.clone(),
            None,
            Duration::from_secs(60),
        );

        let started = scheduler.tick_once().await;
        assert_eq!(started, vec![ScheduleKind::Price]);

        // Give the spawned worker a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.calls.lock().unwrap().as_slice(), &[ScheduleKind::Price]);
    }

    #[tokio::test]
    async fn not_due_schedules_left_alone() {
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
            fail: false,
        });
        let clock = Arc::new(FixedClock(monday(10, 0)));

        let mut schedules = vec![Schedule::new(ScheduleKind::Price, 5)];
        schedules[0].next_run_at = Some(monday(10, 5));

        let mut scheduler = Scheduler::new(
            schedules,
            calendar(),
            clock,
            runner.clone(),
            None,
            Duration::from_secs(60),
        );

        let started = scheduler.tick_once().await;
        assert!(started.is_empty());
    }

    #[tokio::test]
    async fn one_failing_schedule_does_not_block_another() {
        struct SplitRunner {
            calls: Mutex<Vec<ScheduleKind>>,
        }

        #[async_trait]
        impl CycleRunner for SplitRunner {
            async fn run_cycle(&self, kind: ScheduleKind) -> anyhow::Result<CycleReport> {
                self.calls.lock().unwrap().push(kind);
                if kind == ScheduleKind::Price {
                    anyhow::bail!("upstream down");
                }
                Ok(CycleReport::default())
            }
        }

        let runner = Arc::new(SplitRunner {
            calls: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(FixedClock(monday(10, 0)));

        let mut price = Schedule::new(ScheduleKind::Price, 5);
        price.next_run_at = Some(monday(9, 55));
        let mut news = Schedule::new(ScheduleKind::News, 30).with_all_days();
        news.next_run_at = Some(monday(9, 55));

        let mut scheduler = Scheduler::new(
            vec![price, news],
            calendar(),
            clock,
            runner.clone(),
            None,
            Duration::from_secs(60),
        );

        let started = scheduler.tick_once().await;
        assert_eq!(started.len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = runner.calls.lock().unwrap();
        assert!(calls.contains(&ScheduleKind::Price));
        assert!(calls.contains(&ScheduleKind::News));
    }
}
