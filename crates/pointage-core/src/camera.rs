//! Camera capability and device management.
//!
//! This module provides:
//! - [`CameraSource`]: platform capability to enumerate and open capture devices
//! - [`VideoStream`]: an open device producing frames
//! - [`select_preferred_device`]: rear-facing camera heuristic
//! - [`CameraManager`]: device selection plus a single active stream slot
//!
//! The manager never holds two streams at once: acquiring always releases the
//! previous stream first, and releasing is idempotent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How often readiness is polled while waiting for a stream.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Labels that suggest a rear-facing camera.
const REAR_LABEL_HINTS: [&str; 3] = ["back", "arrière", "rear"];

/// Errors raised by camera sources and streams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    /// No capture device is available.
    #[error("no camera device found")]
    NoDevice,

    /// The platform refused access to the camera.
    #[error("camera permission denied")]
    PermissionDenied,

    /// The device exists but could not be opened.
    #[error("camera '{device_id}' is unavailable: {message}")]
    Unavailable {
        /// Device that failed to open.
        device_id: String,
        /// Platform error text.
        message: String,
    },

    /// An open stream stopped producing frames.
    #[error("camera stream failed: {0}")]
    StreamFailed(String),
}

/// A capture device as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Platform identifier used to open the device.
    pub id: String,
    /// Human-readable label; may be empty before normalization.
    pub label: String,
}

impl CameraDevice {
    /// Create a device entry.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Replace an empty label with `Camera <id>`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.label.trim().is_empty() {
            self.label = format!("Camera {}", self.id);
        }
        self
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Monotonic frame number within its stream.
    pub sequence: u64,
    /// Encoded frame data handed to the decoder.
    pub data: Vec<u8>,
}

/// An open capture device.
///
/// Dropping the stream releases the device.
pub trait VideoStream: Send {
    /// Device this stream was opened on.
    fn device_id(&self) -> &str;

    /// Whether the device has started delivering frames.
    fn is_ready(&self) -> bool {
        true
    }

    /// Return the newest frame, or `Ok(None)` when no new frame is available.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::StreamFailed`] if the device went away.
    fn grab_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// Platform capability to list and open capture devices.
pub trait CameraSource: Send {
    /// List available devices.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::PermissionDenied`] if listing requires a
    /// permission that was refused.
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>, CameraError>;

    /// Open a device.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::PermissionDenied`], [`CameraError::NoDevice`] or
    /// [`CameraError::Unavailable`].
    fn acquire(&mut self, device_id: &str) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// Slot holding the active stream, shared with the decode loop.
///
/// An empty slot means the camera has been released.
pub type SharedStream = Arc<Mutex<Option<Box<dyn VideoStream>>>>;

/// Lock a stream slot, recovering from a poisoned lock.
pub(crate) fn lock_stream(slot: &SharedStream) -> MutexGuard<'_, Option<Box<dyn VideoStream>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pick the device to use by default.
///
/// Prefers the first device whose label mentions a rear camera, or, when
/// several devices exist, the first one not labelled as front-facing. Falls
/// back to the first device.
#[must_use]
pub fn select_preferred_device(devices: &[CameraDevice]) -> Option<&CameraDevice> {
    let several = devices.len() > 1;
    devices
        .iter()
        .find(|device| {
            let label = device.label.to_lowercase();
            REAR_LABEL_HINTS.iter().any(|hint| label.contains(hint))
                || (several && !label.contains("front"))
        })
        .or_else(|| devices.first())
}

/// Device selection and the single active stream.
pub struct CameraManager<C> {
    source: C,
    devices: Vec<CameraDevice>,
    selected: Option<String>,
    active: Option<SharedStream>,
}

impl<C: CameraSource> CameraManager<C> {
    /// Wrap a camera source. No device is opened.
    pub const fn new(source: C) -> Self {
        Self {
            source,
            devices: Vec::new(),
            selected: None,
            active: None,
        }
    }

    /// Start with `device_id` selected instead of the heuristic choice.
    #[must_use]
    pub fn with_preferred(mut self, device_id: Option<String>) -> Self {
        self.selected = device_id;
        self
    }

    /// Re-enumerate devices, normalizing labels and keeping a valid selection.
    ///
    /// # Errors
    ///
    /// Propagates enumeration errors from the source.
    pub fn refresh_devices(&mut self) -> Result<&[CameraDevice], CameraError> {
        self.devices = self
            .source
            .enumerate_devices()?
            .into_iter()
            .map(CameraDevice::normalized)
            .collect();

        let still_present = self
            .selected
            .as_ref()
            .is_some_and(|id| self.devices.iter().any(|d| &d.id == id));
        if !still_present {
            self.selected = select_preferred_device(&self.devices).map(|d| d.id.clone());
        }
        debug!(
            count = self.devices.len(),
            selected = ?self.selected,
            "camera devices enumerated"
        );
        Ok(&self.devices)
    }

    /// Devices from the last enumeration.
    #[must_use]
    pub fn devices(&self) -> &[CameraDevice] {
        &self.devices
    }

    /// The currently selected device.
    #[must_use]
    pub fn selected_device(&self) -> Option<&CameraDevice> {
        let id = self.selected.as_ref()?;
        self.devices.iter().find(|d| &d.id == id)
    }

    /// Whether a stream is currently held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|slot| lock_stream(slot).is_some())
    }

    /// The active stream slot, if any.
    #[must_use]
    pub fn active_stream(&self) -> Option<SharedStream> {
        self.active.clone()
    }

    /// Open the selected device, releasing any previous stream first.
    ///
    /// Enumerates devices on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::NoDevice`] when nothing can be selected, or the
    /// source's acquisition error.
    pub fn acquire(&mut self) -> Result<SharedStream, CameraError> {
        self.release();

        if self.devices.is_empty() {
            self.refresh_devices()?;
        }
        let device_id = self
            .selected_device()
            .map(|d| d.id.clone())
            .ok_or(CameraError::NoDevice)?;

        let stream = self.source.acquire(&device_id)?;
        info!(device = %device_id, "camera acquired");

        let slot: SharedStream = Arc::new(Mutex::new(Some(stream)));
        self.active = Some(Arc::clone(&slot));
        Ok(slot)
    }

    /// Drop the active stream. Returns `true` if something was released.
    ///
    /// Safe to call when nothing is active.
    pub fn release(&mut self) -> bool {
        let Some(slot) = self.active.take() else {
            return false;
        };
        let released = lock_stream(&slot).take();
        if let Some(stream) = &released {
            info!(device = %stream.device_id(), "camera released");
        }
        released.is_some()
    }

    /// Select the device after the current one (wrapping around).
    ///
    /// Only changes the selection; the caller re-acquires. Returns `None` when
    /// there is nothing to switch to.
    pub fn select_next(&mut self) -> Option<&CameraDevice> {
        if self.devices.len() <= 1 {
            return None;
        }
        let current = self
            .selected
            .as_ref()
            .and_then(|id| self.devices.iter().position(|d| &d.id == id));
        let next = current.map_or(0, |i| (i + 1) % self.devices.len());
        self.selected = Some(self.devices[next].id.clone());
        debug!(device = %self.devices[next].id, "camera selection changed");
        self.devices.get(next)
    }

    /// Wait until the active stream reports ready, up to `timeout`.
    ///
    /// Returns `false` on timeout; callers proceed anyway since some devices
    /// never signal readiness.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let Some(slot) = self.active.clone() else {
            return false;
        };
        let poll = async {
            loop {
                if lock_stream(&slot).as_ref().is_some_and(|s| s.is_ready()) {
                    return;
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        if tokio::time::timeout(timeout, poll).await.is_ok() {
            true
        } else {
            warn!(?timeout, "camera did not report ready, proceeding anyway");
            false
        }
    }
}

impl<C> Drop for CameraManager<C> {
    fn drop(&mut self) {
        if let Some(slot) = self.active.take() {
            lock_stream(&slot).take();
        }
    }
}
