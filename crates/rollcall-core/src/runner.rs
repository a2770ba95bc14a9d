//! Session runner: the per-session capture state machine.
//!
//! ```text
//! Idle -> WaitingForStart -> Sampling -> Finalizing -> Done
//!               |                             |
//!               +--> Aborted <----------------+ (stop)
//! ```
//!
//! Each dispatched session waits for its start time, opens the capture
//! device, samples frames until the window closes (or the source fails, or a
//! stop is requested), then persists the best frame. The source is held in a
//! [`SourceLease`] so it is released on every exit path before the next
//! session opens it again.

use crate::best_frame::{BestFrameTracker, EvidenceSink};
use crate::capture::{CaptureDevice, SourceLease};
use crate::clock::{Clock, SessionClock, WaitOutcome};
use crate::control::RunControl;
use crate::ledger::{AttendanceLedger, AttendanceStore, MarkOutcome};
use crate::sampler::{FaceEngine, FaceSampler};
use crate::schedule::{Schedule, Session};
use crate::types::BestFrameRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    WaitingForStart,
    Sampling,
    Finalizing,
    Done,
    Aborted,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The window closed while sampling.
    WindowClosed,
    /// The source stopped producing frames.
    FrameUnavailable,
    /// The session was stopped from outside.
    Stopped,
    /// The source could not be opened; nothing was sampled.
    SourceUnavailable,
    /// The window had already closed when the session was dispatched.
    Missed,
    /// Shutdown was requested while waiting for the start time.
    Cancelled,
}

impl SessionExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WindowClosed => "window-closed",
            Self::FrameUnavailable => "frame-unavailable",
            Self::Stopped => "stopped",
            Self::SourceUnavailable => "source-unavailable",
            Self::Missed => "missed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Summary of one dispatched session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub subject: String,
    pub exit: SessionExit,
    pub frames_sampled: usize,
    /// Identities newly marked present during this session.
    pub marked: Vec<String>,
    /// Roster members recorded absent after the window closed.
    pub absent: Vec<String>,
    pub best_frame: Option<BestFrameRecord>,
}

impl SessionOutcome {
    fn new(subject: &str, exit: SessionExit) -> Self {
        Self {
            subject: subject.to_string(),
            exit,
            frames_sampled: 0,
            marked: Vec::new(),
            absent: Vec::new(),
            best_frame: None,
        }
    }
}

pub struct SessionRunner<C, D, E, S, V>
where
    D: CaptureDevice,
{
    clock: SessionClock<C>,
    device: D,
    sampler: FaceSampler<E>,
    ledger: AttendanceLedger<S>,
    tracker: BestFrameTracker<D::Frame>,
    evidence: V,
    control: RunControl,
    roster: Vec<String>,
    state: RunnerState,
}

impl<C, D, E, S, V> SessionRunner<C, D, E, S, V>
where
    C: Clock,
    D: CaptureDevice,
    E: FaceEngine<D::Frame>,
    S: AttendanceStore,
    V: EvidenceSink<D::Frame>,
{
    pub fn new(
        clock: SessionClock<C>,
        device: D,
        sampler: FaceSampler<E>,
        ledger: AttendanceLedger<S>,
        evidence: V,
        control: RunControl,
    ) -> Self {
        Self {
            clock,
            device,
            sampler,
            ledger,
            tracker: BestFrameTracker::new(),
            evidence,
            control,
            roster: Vec::new(),
            state: RunnerState::Idle,
        }
    }

    /// Record everyone on `roster` not seen present as Absent once a
    /// session's window closes. An empty roster disables the sweep.
    pub fn with_absent_roster(mut self, roster: Vec<String>) -> Self {
        self.roster = roster;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn ledger(&self) -> &AttendanceLedger<S> {
        &self.ledger
    }

    pub fn sampler(&self) -> &FaceSampler<E> {
        &self.sampler
    }

    pub fn evidence(&self) -> &V {
        &self.evidence
    }

    /// Run every session in order. Stops dispatching once shutdown is requested.
    pub fn run_schedule(&mut self, schedule: &Schedule) -> Vec<SessionOutcome> {
        let mut outcomes = Vec::with_capacity(schedule.len());
        for session in schedule.sessions() {
            if self.control.shutdown.is_raised() {
                tracing::info!(
                    remaining = schedule.len() - outcomes.len(),
                    "shutdown requested; skipping remaining sessions"
                );
                break;
            }

            let outcome = self.run_session(session);
            tracing::info!(
                subject = %outcome.subject,
                exit = outcome.exit.as_str(),
                frames = outcome.frames_sampled,
                marked = outcome.marked.len(),
                absent = outcome.absent.len(),
                best_frame = outcome.best_frame.as_ref().map(|r| r.image_path.as_str()),
                "session finished"
            );
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Drive one session from dispatch to `Done` or `Aborted`.
    pub fn run_session(&mut self, session: &Session) -> SessionOutcome {
        let subject = session.subject();
        self.transition(RunnerState::Idle);
        self.transition(RunnerState::WaitingForStart);

        if self.clock.is_window_over(session.end()) {
            tracing::warn!(
                subject,
                end = %session.end(),
                "session window already closed; skipping"
            );
            self.transition(RunnerState::Done);
            return SessionOutcome::new(subject, SessionExit::Missed);
        }

        if self.clock.wait_until_start(session.start(), &self.control.shutdown)
            == WaitOutcome::Cancelled
        {
            self.transition(RunnerState::Aborted);
            return SessionOutcome::new(subject, SessionExit::Cancelled);
        }

        // A stop requested before the window opened does not carry into it.
        self.control.session_stop.clear();
        let source = match self.device.open() {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(subject, error = %e, "could not open capture source; skipping session");
                self.transition(RunnerState::Aborted);
                return SessionOutcome::new(subject, SessionExit::SourceUnavailable);
            }
        };
        let mut lease = SourceLease::new(source);

        tracing::info!(subject, start = %session.start(), end = %session.end(), "attendance capture started");
        self.transition(RunnerState::Sampling);
        let mut outcome = SessionOutcome::new(subject, SessionExit::WindowClosed);
        let exit = self.sample_until_exit(session, &mut lease, &mut outcome);
        outcome.exit = exit;

        self.transition(RunnerState::Finalizing);
        outcome.best_frame = self.persist_best_frame(subject);
        if outcome.exit == SessionExit::WindowClosed && !self.roster.is_empty() {
            let at = self.clock.now();
            outcome.absent = self
                .ledger
                .sweep_absent(subject, self.roster.iter().map(String::as_str), at);
        }

        drop(lease);
        self.transition(if outcome.exit == SessionExit::Stopped {
            RunnerState::Aborted
        } else {
            RunnerState::Done
        });
        outcome
    }

    fn sample_until_exit(
        &mut self,
        session: &Session,
        lease: &mut SourceLease<D::Source>,
        outcome: &mut SessionOutcome,
    ) -> SessionExit {
        let subject = session.subject();
        loop {
            let frame = match lease.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(subject, error = %e, "failed to grab frame; ending session");
                    return SessionExit::FrameUnavailable;
                }
            };

            if self.clock.is_window_over(session.end()) {
                tracing::info!(subject, "session ended");
                return SessionExit::WindowClosed;
            }

            outcome.frames_sampled += 1;
            let sample = self.sampler.sample_or_empty(&frame);
            if self.tracker.observe(&frame, sample.face_count) {
                tracing::debug!(subject, faces = sample.face_count, "new best frame");
            }

            for identity in &sample.identities {
                match self.ledger.mark_present(identity, subject, self.clock.now()) {
                    Ok(MarkOutcome::Marked) => outcome.marked.push(identity.clone()),
                    Ok(MarkOutcome::AlreadyMarked) => {}
                    Err(e) => tracing::warn!(
                        person = %identity,
                        subject,
                        error = %e,
                        "failed to record attendance"
                    ),
                }
            }

            if self.control.stop_requested() {
                tracing::info!(subject, "stop requested; ending session");
                return SessionExit::Stopped;
            }
        }
    }

    fn persist_best_frame(&mut self, subject: &str) -> Option<BestFrameRecord> {
        let best = self.tracker.finalize(subject, self.clock.now())?;
        let faces = best.face_count;
        match self.evidence.persist(best) {
            Ok(record) => {
                tracing::info!(subject, faces, path = %record.image_path, "best frame saved");
                Some(record)
            }
            Err(e) => {
                tracing::warn!(subject, faces, error = %e, "failed to save best frame");
                None
            }
        }
    }

    fn transition(&mut self, next: RunnerState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "runner state");
            self.state = next;
        }
    }
}
