//! Scan screen driver.
//!
//! [`ScanSession`] owns everything the scan screen needs for its lifetime: the
//! state machine, the camera, the decode loop and the submitter. It executes
//! the machine's effects and tears everything down when dropped, so leaving
//! the screen never leaves a camera open or a loop running.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::machine::{Completion, Effect, ScanAttempt, ScanEvent, ScanMachine, ScanPhase};
use super::ScanError;
use crate::camera::{CameraDevice, CameraManager, CameraSource};
use crate::client::{SubmissionRequest, SubmissionResult, Submitter};
use crate::config::ClientConfig;
use crate::decoder::{DecodeEvent, Decoder, DecoderLoop};
use crate::error::Result;
use crate::session::{require_session, Session};
use crate::storage::{Banner, BannerKind, ScanRecord, StateStore};
use crate::types::{ScanStep, Screen};

/// Timing and behavior knobs for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Delay between decode attempts.
    pub decode_interval: Duration,
    /// How long to wait for the camera to report ready.
    pub camera_ready_timeout: Duration,
    /// Lifetime of the banner written after a submission.
    pub banner_ttl: chrono::Duration,
    /// Submit as soon as the driver code is locked.
    pub auto_submit: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ScanSettings {
    fn from(config: &ClientConfig) -> Self {
        let ttl = Duration::from_secs(config.display.banner_ttl_secs);
        Self {
            decode_interval: config.scan.decode_interval(),
            camera_ready_timeout: config.scan.camera_ready_timeout(),
            banner_ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            auto_submit: config.scan.auto_submit,
        }
    }
}

/// A running scan screen.
pub struct ScanSession<'s, C: CameraSource, S: Submitter> {
    machine: ScanMachine,
    camera: CameraManager<C>,
    decode: DecoderLoop,
    events: mpsc::UnboundedReceiver<DecodeEvent>,
    submitter: S,
    session: Session,
    store: &'s mut StateStore,
    settings: ScanSettings,
    navigation: Option<Screen>,
}

impl<'s, C: CameraSource, S: Submitter> ScanSession<'s, C, S> {
    /// Open the scan screen.
    ///
    /// Resolves the session first; nothing is acquired without one. Devices
    /// are enumerated eagerly, but an enumeration failure only surfaces when a
    /// scan starts.
    ///
    /// # Errors
    ///
    /// Returns [`PointageError::NoSession`](crate::PointageError::NoSession)
    /// when the operator must log in first.
    pub fn open(
        store: &'s mut StateStore,
        mut camera: CameraManager<C>,
        decoder: Arc<dyn Decoder>,
        submitter: S,
        settings: ScanSettings,
    ) -> Result<Self> {
        let session = require_session(store)?;

        if let Err(e) = camera.refresh_devices() {
            warn!(error = %e, "camera enumeration failed");
        }

        let (decode, events) = DecoderLoop::new(decoder, settings.decode_interval);
        Ok(Self {
            machine: ScanMachine::new(settings.auto_submit),
            camera,
            decode,
            events,
            submitter,
            session,
            store,
            settings,
            navigation: None,
        })
    }

    /// Current attempt.
    #[must_use]
    pub const fn attempt(&self) -> &ScanAttempt {
        self.machine.attempt()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ScanPhase {
        self.machine.phase()
    }

    /// Session the screen runs under.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Known camera devices.
    #[must_use]
    pub fn devices(&self) -> &[CameraDevice] {
        self.camera.devices()
    }

    /// Device used for the next acquisition.
    #[must_use]
    pub fn current_device(&self) -> Option<&CameraDevice> {
        self.camera.selected_device()
    }

    /// Whether a decode loop is running.
    #[must_use]
    pub const fn is_decoding(&self) -> bool {
        self.decode.is_active()
    }

    /// Whether the camera is held.
    #[must_use]
    pub fn camera_active(&self) -> bool {
        self.camera.is_active()
    }

    /// Screen requested by the workflow, if any. Cleared on read.
    pub fn take_navigation(&mut self) -> Option<Screen> {
        self.navigation.take()
    }

    /// Feed an operator event to the machine and run all resulting effects.
    ///
    /// Effects can produce follow-up events (a failed acquisition, a finished
    /// submission); those are handled before this returns.
    ///
    /// # Errors
    ///
    /// Returns the machine's error when an event is not valid in the phase it
    /// reaches; nothing is changed by the rejected event.
    pub async fn dispatch(&mut self, event: ScanEvent) -> std::result::Result<(), ScanError> {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            debug!(attempt = %self.attempt().id, phase = %self.phase(), event = event.name(), "dispatch");
            for effect in self.machine.handle(event)? {
                if let Some(follow_up) = self.apply(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
        Ok(())
    }

    /// Wait for the next event from the decode loop.
    ///
    /// Pends while no loop is running.
    pub async fn next_decode_event(&mut self) -> Option<DecodeEvent> {
        self.events.recv().await
    }

    /// Handle an event from the decode loop.
    ///
    /// Events from a stopped loop are dropped. Returns whether the event was
    /// applied.
    ///
    /// # Errors
    ///
    /// See [`ScanSession::dispatch`].
    pub async fn handle_decode_event(
        &mut self,
        event: DecodeEvent,
    ) -> std::result::Result<bool, ScanError> {
        if !self.decode.is_current(&event) {
            trace!(generation = event.generation(), "stale decode event dropped");
            return Ok(false);
        }
        let event = match event {
            DecodeEvent::Decoded { payload, .. } => ScanEvent::Decoded(payload),
            DecodeEvent::StreamFailed { message, .. } => ScanEvent::CameraFailed(message),
        };
        self.dispatch(event).await?;
        Ok(true)
    }

    /// Wait for and handle the next decode event.
    ///
    /// # Errors
    ///
    /// See [`ScanSession::dispatch`].
    pub async fn process_next_decode(&mut self) -> std::result::Result<bool, ScanError> {
        match self.next_decode_event().await {
            Some(event) => self.handle_decode_event(event).await,
            None => Ok(false),
        }
    }

    /// Decode the current frame immediately instead of waiting for the loop.
    ///
    /// Returns whether a payload was found.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidTransition`] outside a scanning phase.
    pub async fn force_decode(&mut self) -> std::result::Result<bool, ScanError> {
        let phase = self.phase();
        if phase.awaiting().is_none() {
            return Err(ScanError::InvalidTransition {
                phase: phase.name(),
                event: "force decode",
            });
        }
        let Some(stream) = self.camera.active_stream() else {
            return Ok(false);
        };
        match self.decode.force_decode(&stream) {
            Ok(Some(payload)) => {
                self.dispatch(ScanEvent::Decoded(payload)).await?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.dispatch(ScanEvent::CameraFailed(e.to_string())).await?;
                Ok(false)
            }
        }
    }

    /// Move to the next camera device.
    ///
    /// While scanning, the loop is stopped, the old stream released and the
    /// new one acquired before decoding resumes. Returns the newly selected
    /// device, or `None` when there is only one.
    ///
    /// # Errors
    ///
    /// See [`ScanSession::dispatch`].
    pub async fn switch_camera(
        &mut self,
    ) -> std::result::Result<Option<CameraDevice>, ScanError> {
        if self.camera.devices().len() <= 1 {
            return Ok(None);
        }
        let scanning = self.phase().awaiting();
        if scanning.is_some() {
            self.decode.stop();
            self.camera.release();
        }

        let device = self.camera.select_next().cloned();
        if let Some(device) = &device {
            info!(device = %device.id, label = %device.label, "switching camera");
        }

        if let Some(step) = scanning {
            if let Some(event) = self.start_decoding(step).await {
                self.dispatch(event).await?;
            }
        }
        Ok(device)
    }

    /// Stop decoding, release the camera and reset the attempt.
    pub fn teardown(&mut self) {
        if let Err(e) = self.machine.handle(ScanEvent::Teardown) {
            warn!(error = %e, "teardown rejected");
        }
        self.decode.stop();
        self.camera.release();
    }

    async fn apply(&mut self, effect: Effect) -> Option<ScanEvent> {
        match effect {
            Effect::StartDecoding(step) => self.start_decoding(step).await,
            Effect::StopDecoding => {
                self.decode.stop();
                None
            }
            Effect::ReleaseCamera => {
                self.camera.release();
                None
            }
            Effect::Submit {
                bus_code,
                driver_code,
            } => {
                let result = match SubmissionRequest::new(&bus_code, &driver_code, &self.session) {
                    Ok(request) => {
                        info!(bus = %bus_code, driver = %driver_code, "submitting clocking");
                        self.submitter.submit(&request).await
                    }
                    Err(e) => SubmissionResult::failure(e.to_string()),
                };
                Some(ScanEvent::SubmissionFinished(result))
            }
            Effect::Completed(completion) => {
                self.record(&completion);
                None
            }
            Effect::NavigateDashboard => {
                self.navigation = Some(Screen::Dashboard);
                None
            }
        }
    }

    async fn start_decoding(&mut self, step: ScanStep) -> Option<ScanEvent> {
        let stream = match self.camera.acquire() {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%step, error = %e, "camera acquisition failed");
                return Some(ScanEvent::CameraFailed(e.to_string()));
            }
        };
        self.camera.wait_ready(self.settings.camera_ready_timeout).await;
        let generation = self.decode.start(stream);
        debug!(%step, generation, "scanning");
        None
    }

    // Storage failures never undo a server-side clocking; they are logged only.
    fn record(&mut self, completion: &Completion) {
        let now = Utc::now();
        let result = &completion.result;

        let banner = if result.is_success() {
            let record = ScanRecord {
                bus_code: completion.bus_code.clone(),
                driver_code: completion.driver_code.clone(),
                pointage_type: self.session.pointage_type,
                recorded_at: now,
            };
            if let Err(e) = self.store.push_history(record) {
                warn!(error = %e, "failed to record clocking history");
            }
            info!(bus = %completion.bus_code, driver = %completion.driver_code, "clocking recorded");
            Banner::new(BannerKind::Success, result.server_message.clone(), self.settings.banner_ttl, now)
        } else {
            warn!(message = %result.server_message, "clocking rejected");
            Banner::new(BannerKind::Error, result.server_message.clone(), self.settings.banner_ttl, now)
        };

        if let Err(e) = self.store.set_banner(banner) {
            warn!(error = %e, "failed to store banner");
        }
    }
}

impl<C: CameraSource, S: Submitter> Drop for ScanSession<'_, C, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeCamera, FakeSubmitter};
    use crate::types::PointageType;
    use tempfile::TempDir;

    fn settings() -> ScanSettings {
        ScanSettings {
            decode_interval: Duration::from_millis(5),
            camera_ready_timeout: Duration::from_millis(50),
            banner_ttl: chrono::Duration::seconds(5),
            auto_submit: false,
        }
    }

    fn logged_in(dir: &TempDir) -> StateStore {
        let mut store = StateStore::in_dir(dir.path()).unwrap();
        store
            .set_session(Session::new("tok", PointageType::Entry))
            .unwrap();
        store
    }

    async fn next_applied<C: CameraSource, S: Submitter>(scan: &mut ScanSession<'_, C, S>) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !scan.process_next_decode().await.unwrap() {}
        })
        .await
        .expect("decode in time");
    }

    #[test]
    fn test_open_requires_session() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::in_dir(dir.path()).unwrap();
        let camera = FakeCamera::with_labels(&["Back"]);
        let view = camera.clone();

        let opened = ScanSession::open(
            &mut store,
            CameraManager::new(camera),
            Arc::new(crate::decoder::TextDecoder),
            FakeSubmitter::new(),
            settings(),
        );
        assert!(matches!(opened, Err(crate::PointageError::NoSession)));
        assert!(view.acquisitions().is_empty());
    }

    #[tokio::test]
    async fn test_camera_held_only_while_awaiting() {
        let dir = TempDir::new().unwrap();
        let mut store = logged_in(&dir);
        let camera = FakeCamera::with_labels(&["Back"]);
        let view = camera.clone();
        let mut scan = ScanSession::open(
            &mut store,
            CameraManager::new(camera),
            Arc::new(crate::decoder::TextDecoder),
            FakeSubmitter::new(),
            settings(),
        )
        .unwrap();

        assert!(!scan.camera_active());
        scan.dispatch(ScanEvent::Start).await.unwrap();
        assert!(scan.camera_active() && scan.is_decoding());

        view.push_frame("BUS123");
        next_applied(&mut scan).await;
        assert_eq!(scan.phase(), ScanPhase::BusLocked);
        assert!(!scan.camera_active());
        assert!(!scan.is_decoding());
        assert_eq!(view.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_switch_camera_reacquires_while_scanning() {
        let dir = TempDir::new().unwrap();
        let mut store = logged_in(&dir);
        let camera = FakeCamera::with_labels(&["Front", "Back"]);
        let view = camera.clone();
        let mut scan = ScanSession::open(
            &mut store,
            CameraManager::new(camera),
            Arc::new(crate::decoder::TextDecoder),
            FakeSubmitter::new(),
            settings(),
        )
        .unwrap();
        assert_eq!(scan.current_device().map(|d| d.id.as_str()), Some("cam-1"));

        scan.dispatch(ScanEvent::Start).await.unwrap();
        let device = scan.switch_camera().await.unwrap();
        assert_eq!(device.map(|d| d.id), Some("cam-0".to_string()));
        assert_eq!(view.acquisitions(), vec!["cam-1", "cam-0"]);
        assert_eq!(view.peak_open_streams(), 1);
        assert!(scan.is_decoding());
    }

    #[tokio::test]
    async fn test_drop_releases_everything() {
        let dir = TempDir::new().unwrap();
        let mut store = logged_in(&dir);
        let camera = FakeCamera::with_labels(&["Back"]);
        let view = camera.clone();
        {
            let mut scan = ScanSession::open(
                &mut store,
                CameraManager::new(camera),
                Arc::new(crate::decoder::TextDecoder),
                FakeSubmitter::new(),
                settings(),
            )
            .unwrap();
            scan.dispatch(ScanEvent::Start).await.unwrap();
            assert_eq!(view.open_streams(), 1);
        }
        assert_eq!(view.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_teardown_resets_a_locked_attempt() {
        let dir = TempDir::new().unwrap();
        let mut store = logged_in(&dir);
        let camera = FakeCamera::with_labels(&["Back"]);
        let view = camera.clone();
        let mut scan = ScanSession::open(
            &mut store,
            CameraManager::new(camera),
            Arc::new(crate::decoder::TextDecoder),
            FakeSubmitter::new(),
            settings(),
        )
        .unwrap();

        scan.dispatch(ScanEvent::Start).await.unwrap();
        view.push_frame("BUS123");
        next_applied(&mut scan).await;
        scan.dispatch(ScanEvent::Continue).await.unwrap();
        assert_eq!(scan.phase(), ScanPhase::AwaitingDriver);
        assert_eq!(view.open_streams(), 1);

        scan.teardown();
        assert_eq!(scan.phase(), ScanPhase::Idle);
        assert_eq!(scan.attempt().bus_code, None);
        assert!(!scan.is_decoding());
        assert!(!scan.camera_active());
        assert_eq!(view.open_streams(), 0);

        scan.teardown();
        assert_eq!(scan.phase(), ScanPhase::Idle);
    }

    #[tokio::test]
    async fn test_force_decode_outside_scanning_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = logged_in(&dir);
        let camera = FakeCamera::with_labels(&["Back"]);
        let view = camera.clone();
        let mut scan = ScanSession::open(
            &mut store,
            CameraManager::new(camera),
            Arc::new(crate::decoder::TextDecoder),
            FakeSubmitter::new(),
            settings(),
        )
        .unwrap();

        assert!(scan.force_decode().await.is_err());

        scan.dispatch(ScanEvent::Start).await.unwrap();
        scan.decode.stop();
        view.push_frame("BUS9");
        assert!(scan.force_decode().await.unwrap());
        assert_eq!(scan.attempt().bus_code.as_deref(), Some("BUS9"));
    }

    #[tokio::test]
    async fn test_failure_banner_and_no_history() {
        let dir = TempDir::new().unwrap();
        let mut store = logged_in(&dir);
        let camera = FakeCamera::with_labels(&["Back"]);
        let view = camera.clone();
        let submitter = FakeSubmitter::new();
        submitter.respond_with(SubmissionResult::failure("duplicate entry"));
        {
            let mut scan = ScanSession::open(
                &mut store,
                CameraManager::new(camera),
                Arc::new(crate::decoder::TextDecoder),
                submitter.clone(),
                settings(),
            )
            .unwrap();
            scan.dispatch(ScanEvent::Start).await.unwrap();
            view.push_frame("BUS1");
            next_applied(&mut scan).await;
            scan.dispatch(ScanEvent::Continue).await.unwrap();
            view.push_frame("DRV1");
            next_applied(&mut scan).await;
            scan.dispatch(ScanEvent::Submit).await.unwrap();
            assert_eq!(scan.phase(), ScanPhase::Failed);
        }

        assert!(store.history().is_empty());
        let banner = store.active_banner(Utc::now()).unwrap().unwrap();
        assert_eq!(banner.kind, BannerKind::Error);
        assert_eq!(banner.text, "duplicate entry");
        assert_eq!(submitter.requests().len(), 1);
    }
}
