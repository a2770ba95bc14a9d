//! rollcall-core — Session scheduling and the attendance capture loop.
//!
//! Waits for each scheduled session window, samples frames from a capture
//! device until the window closes, marks recognized people present once per
//! subject, and keeps the frame with the most faces as evidence. Face
//! recognition, capture hardware and persistence are traits implemented by
//! the other workspace crates.

pub mod best_frame;
pub mod capture;
pub mod clock;
pub mod control;
pub mod ledger;
pub mod runner;
pub mod sampler;
pub mod schedule;
pub mod types;

pub use best_frame::{BestFrame, BestFrameTracker, EvidenceError, EvidenceSink, FrameRecordStore};
pub use capture::{CaptureDevice, CaptureError, FrameSource, SourceLease};
pub use clock::{Clock, ManualClock, SessionClock, SystemClock, WaitOutcome, WindowPhase};
pub use control::{RunControl, StopFlag};
pub use ledger::{AttendanceLedger, AttendanceStore, MarkOutcome, StoreError};
pub use runner::{RunnerState, SessionExit, SessionOutcome, SessionRunner};
pub use sampler::{EngineError, FaceEngine, FaceSampler, SampleFailure};
pub use schedule::{Schedule, ScheduleError, Session};
pub use types::{
    AttendanceEvent, AttendanceStatus, BestFrameRecord, Detection, PresenceKey, SampleResult,
    UnknownStatus, TIMESTAMP_FORMAT,
};
