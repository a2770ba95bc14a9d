//! Time-of-day window checks and the wait-until-start poll loop.

use crate::control::StopFlag;
use crate::schedule::Session;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default poll cadence for [`SessionClock::wait_until_start`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Source of wall-clock time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
    fn sleep(&self, duration: Duration);
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Settable clock shared between a test and the code under test.
///
/// `sleep` advances the clock instead of blocking.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.lock() += step;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Where "now" falls relative to a session's `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Before,
    Inside,
    After,
}

/// How a wait for a session start ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Started,
    Cancelled,
}

/// Session window arithmetic over a [`Clock`].
#[derive(Debug, Clone)]
pub struct SessionClock<C> {
    clock: C,
    poll_interval: Duration,
}

impl<C: Clock> SessionClock<C> {
    pub fn new(clock: C, poll_interval: Duration) -> Self {
        Self {
            clock,
            poll_interval,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.clock.now().time()
    }

    /// True iff the current time of day is at or past `end`.
    pub fn is_window_over(&self, end: NaiveTime) -> bool {
        self.time_of_day() >= end
    }

    pub fn phase(&self, session: &Session) -> WindowPhase {
        let now = self.time_of_day();
        if now < session.start() {
            WindowPhase::Before
        } else if now < session.end() {
            WindowPhase::Inside
        } else {
            WindowPhase::After
        }
    }

    /// Block until the time of day reaches `start`, or `cancel` is raised.
    ///
    /// Polls every `poll_interval`, never sleeping past `start`.
    pub fn wait_until_start(&self, start: NaiveTime, cancel: &StopFlag) -> WaitOutcome {
        let mut logged = false;
        loop {
            if cancel.is_raised() {
                tracing::info!(%start, "wait for session start cancelled");
                return WaitOutcome::Cancelled;
            }

            let now = self.time_of_day();
            if now >= start {
                return WaitOutcome::Started;
            }

            if !logged {
                tracing::info!(%start, now = %now.format("%H:%M:%S"), "waiting for session start");
                logged = true;
            }

            let remaining = (start - now).to_std().unwrap_or(Duration::ZERO);
            let nap = remaining.min(self.poll_interval);
            self.clock.sleep(if nap.is_zero() { self.poll_interval } else { nap });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Clock that raises a flag once it has slept a given number of times.
    struct CancellingClock {
        inner: ManualClock,
        flag: StopFlag,
        sleeps: std::cell::Cell<usize>,
        cancel_after: usize,
    }

    impl Clock for CancellingClock {
        fn now(&self) -> NaiveDateTime {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            self.sleeps.set(self.sleeps.get() + 1);
            if self.sleeps.get() >= self.cancel_after {
                self.flag.raise();
            }
        }
    }

    #[test]
    fn test_window_boundary() {
        let clock = ManualClock::new(at(9, 29, 59));
        let session_clock = SessionClock::new(clock.clone(), DEFAULT_POLL_INTERVAL);
        assert!(!session_clock.is_window_over(hm(9, 30)));

        clock.set(at(9, 30, 0));
        assert!(session_clock.is_window_over(hm(9, 30)));
    }

    #[test]
    fn test_phase() {
        let clock = ManualClock::new(at(8, 59, 59));
        let session_clock = SessionClock::new(clock.clone(), DEFAULT_POLL_INTERVAL);
        let session = Session::new("Math", hm(9, 0), hm(9, 30)).unwrap();

        assert_eq!(session_clock.phase(&session), WindowPhase::Before);
        clock.set(at(9, 0, 0));
        assert_eq!(session_clock.phase(&session), WindowPhase::Inside);
        clock.set(at(9, 30, 0));
        assert_eq!(session_clock.phase(&session), WindowPhase::After);
    }

    #[test]
    fn test_wait_returns_immediately_when_started() {
        let clock = ManualClock::new(at(9, 5, 0));
        let session_clock = SessionClock::new(clock.clone(), DEFAULT_POLL_INTERVAL);
        let outcome = session_clock.wait_until_start(hm(9, 0), &StopFlag::new());
        assert_eq!(outcome, WaitOutcome::Started);
        assert_eq!(clock.now(), at(9, 5, 0));
    }

    #[test]
    fn test_wait_polls_until_start_without_overshoot() {
        let clock = ManualClock::new(at(8, 59, 35));
        let session_clock = SessionClock::new(clock.clone(), DEFAULT_POLL_INTERVAL);
        let outcome = session_clock.wait_until_start(hm(9, 0), &StopFlag::new());
        assert_eq!(outcome, WaitOutcome::Started);
        // 10s + 10s + 5s: the last nap is capped at the remaining time.
        assert_eq!(clock.now(), at(9, 0, 0));
    }

    #[test]
    fn test_wait_cancelled_before_start() {
        let flag = StopFlag::new();
        let clock = CancellingClock {
            inner: ManualClock::new(at(7, 0, 0)),
            flag: flag.clone(),
            sleeps: std::cell::Cell::new(0),
            cancel_after: 3,
        };
        let session_clock = SessionClock::new(clock, Duration::from_secs(60));
        let outcome = session_clock.wait_until_start(hm(9, 0), &flag);
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert_eq!(session_clock.now(), at(7, 3, 0));
    }

    #[test]
    fn test_wait_respects_already_raised_flag() {
        let flag = StopFlag::new();
        flag.raise();
        let session_clock = SessionClock::new(ManualClock::new(at(9, 5, 0)), DEFAULT_POLL_INTERVAL);
        assert_eq!(
            session_clock.wait_until_start(hm(9, 0), &flag),
            WaitOutcome::Cancelled
        );
    }
}
