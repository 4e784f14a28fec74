//! # pointage-core
//!
//! Core logic for clocking a bus and its driver by scanning two QR codes.
//!
//! This crate provides:
//! - Session handling and the screen guard for protected screens
//! - Camera device selection and exclusive stream ownership
//! - A generation-tagged continuous decode loop
//! - The bus-then-driver scan state machine and the session that drives it
//! - The HTTP client for login and clocking submission
//! - Persistent state (session, banner, recent history)
//!
//! ## Architecture
//!
//! - [`camera`] - Camera capability traits and the stream owner
//! - [`client`] - Login and clocking submission against the remote API
//! - [`config`] - Configuration loading, saving, and validation
//! - [`decoder`] - Decoder capability and the background decode loop
//! - [`error`] - Unified error types for the crate
//! - [`scan`] - Scan state machine and scan screen driver
//! - [`session`] - Session context, guard and logout
//! - [`storage`] - JSON-backed persisted state
//! - [`types`] - Shared enums (pointage type, scan step, screens)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod camera;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
#[cfg(any(test, feature = "mock-camera"))]
pub mod mock;
pub mod scan;
pub mod session;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use camera::{
    select_preferred_device, CameraDevice, CameraError, CameraManager, CameraSource, Frame,
    SharedStream, VideoStream,
};
pub use client::{
    is_valid_email, ClientError, ClockingClient, SubmissionOutcome, SubmissionRequest,
    SubmissionResult, Submitter,
};
pub use config::{
    default_config_path, ApiConfig, ClientConfig, ConfigError, ConfigResult, DisplayConfig,
    ScanConfig, StorageConfig,
};
pub use decoder::{decode_once, DecodeEvent, Decoder, DecoderLoop, TextDecoder};
pub use error::{PointageError, Result};
#[cfg(any(test, feature = "mock-camera"))]
pub use mock::{FakeCamera, FakeSubmitter};
pub use scan::{ScanAttempt, ScanError, ScanEvent, ScanMachine, ScanPhase, ScanSession, ScanSettings};
pub use session::{logout, require_session, route, Session};
pub use storage::{Banner, BannerKind, PersistedState, ScanRecord, StateStore, StorageError};
pub use types::{PointageType, ScanStep, Screen};
