//! Two-step scan workflow: bus code, then driver code, then submission.
//!
//! [`machine`] holds the pure state machine; [`session`] drives it against a
//! camera, a decode loop, a submitter and the state store.

pub mod machine;
pub mod session;

use thiserror::Error;

pub use machine::{
    Completion, Effect, ScanAttempt, ScanEvent, ScanMachine, ScanPhase, STATUS_AWAITING_BUS,
    STATUS_AWAITING_DRIVER, STATUS_IDLE, STATUS_INVALID_CODE, STATUS_SUBMITTING,
};
pub use session::{ScanSession, ScanSettings};

/// Errors raised by the scan workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The event is not valid in the current phase.
    #[error("cannot {event} while {phase}")]
    InvalidTransition {
        /// Phase the machine was in.
        phase: &'static str,
        /// Event that was rejected.
        event: &'static str,
    },

    /// A submission is already in flight.
    #[error("a submission is already in progress")]
    SubmissionInFlight,

    /// Submission requested without both codes.
    #[error("both bus and driver codes are required")]
    MissingCodes,
}
