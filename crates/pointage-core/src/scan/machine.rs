//! Pure scan state machine.
//!
//! [`ScanMachine::handle`] applies one [`ScanEvent`] to the current
//! [`ScanAttempt`] and returns the [`Effect`]s the caller must perform. It does
//! no I/O, so every transition can be tested without a camera or network.
//!
//! ```text
//! Idle ──start──▶ AwaitingBus ──decoded──▶ BusLocked ──continue──▶ AwaitingDriver
//!                     │                                                │
//!               camera failed                                     decoded
//!                     ▼                                                ▼
//!             CameraUnavailable ◀──────────camera failed──────── DriverLocked
//!                                                                      │
//!                                                                   submit
//!                                                                      ▼
//!                                   Succeeded / Failed ◀──finished── Submitting
//! ```

use std::fmt;

use tracing::{debug, trace};
use uuid::Uuid;

use super::ScanError;
use crate::client::SubmissionResult;
use crate::types::ScanStep;

/// Status line shown while idle.
pub const STATUS_IDLE: &str = "Press start to scan the bus";
/// Status line shown while waiting for the bus code.
pub const STATUS_AWAITING_BUS: &str = "Position the bus QR code in front of the camera...";
/// Status line shown while waiting for the driver code.
pub const STATUS_AWAITING_DRIVER: &str = "Position the driver QR code in front of the camera...";
/// Status line shown while the submission is in flight.
pub const STATUS_SUBMITTING: &str = "Sending data to the server...";
/// Status line shown after an empty decode.
pub const STATUS_INVALID_CODE: &str = "Invalid code, please retry";

/// Phase of a scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Nothing started.
    Idle,
    /// Decoding, waiting for the bus code.
    AwaitingBus,
    /// Bus code captured, waiting for the operator to continue.
    BusLocked,
    /// Decoding, waiting for the driver code.
    AwaitingDriver,
    /// Both codes captured, waiting for submission.
    DriverLocked,
    /// Submission in flight.
    Submitting,
    /// The server accepted the clocking.
    Succeeded,
    /// The submission failed; both codes were discarded.
    Failed,
    /// The camera could not be acquired or failed while scanning.
    CameraUnavailable {
        /// Phase re-entered on retry.
        retry: ScanStep,
    },
}

impl ScanPhase {
    /// The code being scanned, if the phase decodes.
    #[must_use]
    pub const fn awaiting(self) -> Option<ScanStep> {
        match self {
            Self::AwaitingBus => Some(ScanStep::Bus),
            Self::AwaitingDriver => Some(ScanStep::Driver),
            _ => None,
        }
    }

    const fn awaiting_phase(step: ScanStep) -> Self {
        match step {
            ScanStep::Bus => Self::AwaitingBus,
            ScanStep::Driver => Self::AwaitingDriver,
        }
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingBus => "awaiting bus",
            Self::BusLocked => "bus locked",
            Self::AwaitingDriver => "awaiting driver",
            Self::DriverLocked => "driver locked",
            Self::Submitting => "submitting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::CameraUnavailable { .. } => "camera unavailable",
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Operator starts a scan.
    Start,
    /// The decode loop produced a payload.
    Decoded(String),
    /// Operator moves on to the driver code.
    Continue,
    /// Operator sends the pair.
    Submit,
    /// The submission returned.
    SubmissionFinished(SubmissionResult),
    /// The camera could not be opened or stopped working.
    CameraFailed(String),
    /// Operator retries after a camera failure.
    Retry,
    /// Operator starts over after a result.
    Restart,
    /// Operator goes back to the dashboard.
    Abandon,
    /// Operator cancels the running scan.
    Cancel,
    /// The scan screen is being left.
    Teardown,
}

impl ScanEvent {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Decoded(_) => "decode",
            Self::Continue => "continue",
            Self::Submit => "submit",
            Self::SubmissionFinished(_) => "finish submission",
            Self::CameraFailed(_) => "report camera failure",
            Self::Retry => "retry",
            Self::Restart => "restart",
            Self::Abandon => "abandon",
            Self::Cancel => "cancel",
            Self::Teardown => "tear down",
        }
    }
}

/// Finished submission, handed to the caller for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Bus code that was sent.
    pub bus_code: String,
    /// Driver code that was sent.
    pub driver_code: String,
    /// What the server answered.
    pub result: SubmissionResult,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Acquire the camera and start a decode loop for this step.
    StartDecoding(ScanStep),
    /// Stop the decode loop.
    StopDecoding,
    /// Release the camera.
    ReleaseCamera,
    /// Send the pair to the server.
    Submit {
        /// Bus code.
        bus_code: String,
        /// Driver code.
        driver_code: String,
    },
    /// Record the outcome (history, banner).
    Completed(Completion),
    /// Leave the scan screen for the dashboard.
    NavigateDashboard,
}

/// State of one scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanAttempt {
    /// Identifier used in logs.
    pub id: Uuid,
    /// Locked bus code.
    pub bus_code: Option<String>,
    /// Locked driver code.
    pub driver_code: Option<String>,
    /// Current phase.
    pub phase: ScanPhase,
    /// Status line for the operator.
    pub status: String,
    /// Last submission result.
    pub result: Option<SubmissionResult>,
    /// Last camera error text.
    pub camera_error: Option<String>,
}

impl ScanAttempt {
    /// A fresh, idle attempt.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            bus_code: None,
            driver_code: None,
            phase: ScanPhase::Idle,
            status: STATUS_IDLE.to_string(),
            result: None,
            camera_error: None,
        }
    }
}

impl Default for ScanAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// The scan state machine.
#[derive(Debug, Clone)]
pub struct ScanMachine {
    attempt: ScanAttempt,
    auto_submit: bool,
}

impl ScanMachine {
    /// Idle machine. With `auto_submit`, locking the driver code submits
    /// immediately.
    #[must_use]
    pub fn new(auto_submit: bool) -> Self {
        Self {
            attempt: ScanAttempt::new(),
            auto_submit,
        }
    }

    /// Current attempt.
    #[must_use]
    pub const fn attempt(&self) -> &ScanAttempt {
        &self.attempt
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ScanPhase {
        self.attempt.phase
    }

    /// Apply `event` and return the effects to perform, in order.
    ///
    /// Decodes outside an awaiting phase and camera failures outside a
    /// scanning phase are ignored (no effects). Empty decodes leave the phase
    /// unchanged and only update the status line.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidTransition`] for events that make no sense
    /// in the current phase, and [`ScanError::SubmissionInFlight`] for a second
    /// submit. The attempt is left untouched.
    pub fn handle(&mut self, event: ScanEvent) -> Result<Vec<Effect>, ScanError> {
        use ScanPhase as P;

        let phase = self.attempt.phase;
        trace!(attempt = %self.attempt.id, %phase, event = event.name(), "scan event");

        let effects = match (phase, event) {
            (P::Idle, ScanEvent::Start) => {
                self.enter_awaiting(ScanStep::Bus);
                vec![Effect::StartDecoding(ScanStep::Bus)]
            }

            (P::AwaitingBus, ScanEvent::Decoded(payload)) => self.lock_code(ScanStep::Bus, &payload)?,
            (P::AwaitingDriver, ScanEvent::Decoded(payload)) => {
                self.lock_code(ScanStep::Driver, &payload)?
            }
            (_, ScanEvent::Decoded(_)) => {
                trace!(%phase, "decode ignored outside an awaiting phase");
                Vec::new()
            }

            (P::BusLocked, ScanEvent::Continue) => {
                self.attempt.driver_code = None;
                self.enter_awaiting(ScanStep::Driver);
                vec![Effect::StartDecoding(ScanStep::Driver)]
            }

            (P::DriverLocked, ScanEvent::Submit) => self.begin_submit()?,
            (P::Submitting, ScanEvent::Submit) => return Err(ScanError::SubmissionInFlight),
            (P::Submitting, ScanEvent::SubmissionFinished(result)) => self.finish(result),

            (P::AwaitingBus | P::AwaitingDriver, ScanEvent::CameraFailed(message)) => {
                let retry = phase.awaiting().unwrap_or(ScanStep::Bus);
                debug!(attempt = %self.attempt.id, %retry, %message, "camera unavailable");
                self.attempt.phase = P::CameraUnavailable { retry };
                self.attempt.status = format!("Camera error: {message}. Retry or go back.");
                self.attempt.camera_error = Some(message);
                vec![Effect::StopDecoding, Effect::ReleaseCamera]
            }
            (_, ScanEvent::CameraFailed(_)) => Vec::new(),

            (P::CameraUnavailable { retry }, ScanEvent::Retry) => {
                self.attempt.camera_error = None;
                self.enter_awaiting(retry);
                vec![Effect::StartDecoding(retry)]
            }

            (P::AwaitingBus, ScanEvent::Cancel) => {
                self.reset();
                vec![Effect::StopDecoding, Effect::ReleaseCamera]
            }
            (P::AwaitingDriver, ScanEvent::Cancel) => {
                let bus = self.attempt.bus_code.clone().unwrap_or_default();
                self.attempt.phase = P::BusLocked;
                self.attempt.status = bus_locked_status(&bus);
                vec![Effect::StopDecoding, Effect::ReleaseCamera]
            }

            (P::Succeeded | P::Failed, ScanEvent::Restart) => {
                self.reset();
                Vec::new()
            }
            (P::Succeeded | P::Failed | P::CameraUnavailable { .. }, ScanEvent::Abandon) => {
                self.reset();
                vec![Effect::NavigateDashboard]
            }

            (_, ScanEvent::Teardown) => {
                self.reset();
                vec![Effect::StopDecoding, Effect::ReleaseCamera]
            }

            (phase, event) => {
                return Err(ScanError::InvalidTransition {
                    phase: phase.name(),
                    event: event.name(),
                })
            }
        };

        if self.attempt.phase != phase {
            debug!(attempt = %self.attempt.id, from = %phase, to = %self.attempt.phase, "scan phase changed");
        }
        Ok(effects)
    }

    fn enter_awaiting(&mut self, step: ScanStep) {
        self.attempt.phase = ScanPhase::awaiting_phase(step);
        self.attempt.status = match step {
            ScanStep::Bus => STATUS_AWAITING_BUS,
            ScanStep::Driver => STATUS_AWAITING_DRIVER,
        }
        .to_string();
    }

    fn lock_code(&mut self, step: ScanStep, payload: &str) -> Result<Vec<Effect>, ScanError> {
        let code = payload.trim();
        if code.is_empty() {
            debug!(attempt = %self.attempt.id, %step, "empty payload ignored");
            self.attempt.status = STATUS_INVALID_CODE.to_string();
            return Ok(Vec::new());
        }

        let mut effects = vec![Effect::StopDecoding, Effect::ReleaseCamera];
        match step {
            ScanStep::Bus => {
                self.attempt.bus_code = Some(code.to_string());
                self.attempt.phase = ScanPhase::BusLocked;
                self.attempt.status = bus_locked_status(code);
            }
            ScanStep::Driver => {
                self.attempt.driver_code = Some(code.to_string());
                self.attempt.phase = ScanPhase::DriverLocked;
                self.attempt.status =
                    format!("Driver scanned: {code}. Send to validate the clocking.");
                if self.auto_submit {
                    effects.extend(self.begin_submit()?);
                }
            }
        }
        Ok(effects)
    }

    fn begin_submit(&mut self) -> Result<Vec<Effect>, ScanError> {
        let (Some(bus_code), Some(driver_code)) = (
            self.attempt.bus_code.clone().filter(|c| !c.trim().is_empty()),
            self.attempt.driver_code.clone().filter(|c| !c.trim().is_empty()),
        ) else {
            return Err(ScanError::MissingCodes);
        };

        self.attempt.phase = ScanPhase::Submitting;
        self.attempt.status = STATUS_SUBMITTING.to_string();
        Ok(vec![Effect::Submit {
            bus_code,
            driver_code,
        }])
    }

    fn finish(&mut self, result: SubmissionResult) -> Vec<Effect> {
        let bus_code = self.attempt.bus_code.clone().unwrap_or_default();
        let driver_code = self.attempt.driver_code.clone().unwrap_or_default();

        if result.is_success() {
            self.attempt.phase = ScanPhase::Succeeded;
            self.attempt.status = format!("Clocking recorded. {}", result.server_message);
        } else {
            // Codes are never resubmitted; a retry is a full new scan.
            self.attempt.phase = ScanPhase::Failed;
            self.attempt.status = result.server_message.clone();
            self.attempt.bus_code = None;
            self.attempt.driver_code = None;
        }
        self.attempt.result = Some(result.clone());

        vec![Effect::Completed(Completion {
            bus_code,
            driver_code,
            result,
        })]
    }

    fn reset(&mut self) {
        self.attempt = ScanAttempt::new();
    }
}

fn bus_locked_status(code: &str) -> String {
    format!("Bus scanned: {code}. Continue to scan the driver.")
}
