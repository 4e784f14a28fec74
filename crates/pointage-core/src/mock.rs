//! In-memory camera and submitter for tests and demos.
//!
//! [`FakeCamera`] is cheap to clone; every clone shares the same frame feed
//! and counters, so a test keeps one clone to inspect while the session owns
//! another.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::camera::{CameraDevice, CameraError, CameraSource, Frame, VideoStream};
use crate::client::{SubmissionRequest, SubmissionResult, Submitter};

struct Shared {
    feed: Mutex<VecDeque<Vec<u8>>>,
    denied: AtomicBool,
    ready: AtomicBool,
    failing: AtomicBool,
    open: AtomicUsize,
    peak: AtomicUsize,
    acquisitions: Mutex<Vec<String>>,
    grab_counts: Mutex<Vec<Arc<AtomicUsize>>>,
}

/// Scriptable camera source.
#[derive(Clone)]
pub struct FakeCamera {
    devices: Vec<CameraDevice>,
    shared: Arc<Shared>,
}

impl FakeCamera {
    /// Camera source exposing `devices`.
    #[must_use]
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            shared: Arc::new(Shared {
                feed: Mutex::new(VecDeque::new()),
                denied: AtomicBool::new(false),
                ready: AtomicBool::new(true),
                failing: AtomicBool::new(false),
                open: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                acquisitions: Mutex::new(Vec::new()),
                grab_counts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Devices `cam-0`, `cam-1`, ... with the given labels.
    #[must_use]
    pub fn with_labels(labels: &[&str]) -> Self {
        Self::new(
            labels
                .iter()
                .enumerate()
                .map(|(i, label)| CameraDevice::new(format!("cam-{i}"), *label))
                .collect(),
        )
    }

    /// Queue a frame whose data is `text`.
    pub fn push_frame(&self, text: &str) {
        self.push_bytes(text.as_bytes().to_vec());
    }

    /// Queue a raw frame.
    pub fn push_bytes(&self, data: Vec<u8>) {
        lock(&self.shared.feed).push_back(data);
    }

    /// Frames not yet grabbed.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        lock(&self.shared.feed).len()
    }

    /// Make `acquire` fail with [`CameraError::PermissionDenied`].
    pub fn deny_permission(&self, denied: bool) {
        self.shared.denied.store(denied, Ordering::SeqCst);
    }

    /// Control what streams report from `is_ready`.
    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.store(ready, Ordering::SeqCst);
    }

    /// Make every grab fail with [`CameraError::StreamFailed`].
    pub fn fail_streams(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::SeqCst);
    }

    /// Streams currently open.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Highest number of streams ever open at the same time.
    #[must_use]
    pub fn peak_open_streams(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    /// Device ids passed to successful `acquire` calls, in order.
    #[must_use]
    pub fn acquisitions(&self) -> Vec<String> {
        lock(&self.shared.acquisitions).clone()
    }

    /// Number of grabs per stream, in acquisition order.
    #[must_use]
    pub fn grab_counts(&self) -> Vec<usize> {
        lock(&self.shared.grab_counts)
            .iter()
            .map(|count| count.load(Ordering::SeqCst))
            .collect()
    }
}

impl CameraSource for FakeCamera {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        Ok(self.devices.clone())
    }

    fn acquire(&mut self, device_id: &str) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.shared.denied.load(Ordering::SeqCst) {
            return Err(CameraError::PermissionDenied);
        }
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(CameraError::Unavailable {
                device_id: device_id.to_string(),
                message: "unknown device".into(),
            });
        }

        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(open, Ordering::SeqCst);
        lock(&self.shared.acquisitions).push(device_id.to_string());

        let grabs = Arc::new(AtomicUsize::new(0));
        lock(&self.shared.grab_counts).push(Arc::clone(&grabs));

        Ok(Box::new(FakeStream {
            device_id: device_id.to_string(),
            sequence: 0,
            grabs,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct FakeStream {
    device_id: String,
    sequence: u64,
    grabs: Arc<AtomicUsize>,
    shared: Arc<Shared>,
}

impl VideoStream for FakeStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    fn grab_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        if self.shared.failing.load(Ordering::SeqCst) {
            return Err(CameraError::StreamFailed("device disconnected".into()));
        }
        let Some(data) = lock(&self.shared.feed).pop_front() else {
            return Ok(None);
        };
        self.sequence += 1;
        Ok(Some(Frame {
            sequence: self.sequence,
            data,
        }))
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Submitter returning queued results and recording every request.
///
/// Answers `Success("OK")` once the queue is empty.
#[derive(Clone, Default)]
pub struct FakeSubmitter {
    responses: Arc<Mutex<VecDeque<SubmissionResult>>>,
    requests: Arc<Mutex<Vec<SubmissionRequest>>>,
}

impl FakeSubmitter {
    /// Submitter with an empty response queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next submission.
    pub fn respond_with(&self, result: SubmissionResult) {
        lock(&self.responses).push_back(result);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SubmissionRequest> {
        lock(&self.requests).clone()
    }
}

impl Submitter for FakeSubmitter {
    async fn submit(&self, request: &SubmissionRequest) -> SubmissionResult {
        lock(&self.requests).push(request.clone());
        let queued = lock(&self.responses).pop_front();
        queued.unwrap_or_else(|| SubmissionResult::success("OK"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
