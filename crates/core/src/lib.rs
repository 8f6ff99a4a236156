//! Domain types shared by every CodeArena crate.
//!
//! This crate performs no I/O. It defines submission and job identities,
//! the two-level status model and its display mapping, the status events
//! workers publish, the snapshots clients read, and the fixed-window
//! arithmetic used by the rate limiter.

pub mod clock;
pub mod error;
pub mod event;
pub mod job;
pub mod snapshot;
pub mod status;
pub mod submission;
pub mod types;
pub mod window;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::CoreError;
pub use event::{ExecutionMetrics, StatusEvent, TestResult};
pub use job::{
    JobAttempt, Language, SubmissionJob, TestCaseRef, PRIORITY_BACKGROUND, PRIORITY_NORMAL,
    PRIORITY_URGENT,
};
pub use snapshot::{SubmissionSnapshot, TerminalSnapshot};
pub use status::{DisplayStatus, SubmissionStatus};
pub use submission::NewSubmission;
pub use types::{ConnectionId, SubmissionId, Timestamp};
pub use window::{FixedWindow, RateDecision};
