//! Keyboard-wedge scanner as a camera source.
//!
//! USB QR scanners in keyboard mode type the decoded text followed by Enter.
//! The app reads those lines from the terminal and feeds them here; the scan
//! session then sees them as frames from an ordinary camera.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pointage_core::{CameraDevice, CameraError, CameraSource, Frame, VideoStream};
use tracing::debug;

/// Device id of the terminal scanner.
pub const WEDGE_DEVICE_ID: &str = "keyboard-wedge";

#[derive(Default)]
struct Feed {
    lines: Mutex<VecDeque<String>>,
    open: AtomicBool,
}

/// Camera source backed by lines typed into the terminal.
#[derive(Clone, Default)]
pub struct WedgeScanner {
    feed: Arc<Feed>,
}

impl WedgeScanner {
    /// New scanner with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one scanned line.
    ///
    /// Returns `false` and drops the line when no stream is open.
    pub fn feed_line(&self, line: &str) -> bool {
        if !self.feed.open.load(Ordering::SeqCst) {
            debug!("scanner input ignored, no open stream");
            return false;
        }
        self.lines().push_back(line.to_string());
        true
    }

    /// Whether a stream is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.feed.open.load(Ordering::SeqCst)
    }

    fn lines(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.feed.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraSource for WedgeScanner {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        Ok(vec![CameraDevice::new(
            WEDGE_DEVICE_ID,
            "USB scanner (keyboard wedge)",
        )])
    }

    fn acquire(&mut self, device_id: &str) -> Result<Box<dyn VideoStream>, CameraError> {
        if device_id != WEDGE_DEVICE_ID {
            return Err(CameraError::Unavailable {
                device_id: device_id.to_string(),
                message: "only the terminal scanner is available".into(),
            });
        }
        if self.feed.open.swap(true, Ordering::SeqCst) {
            return Err(CameraError::Unavailable {
                device_id: device_id.to_string(),
                message: "scanner already in use".into(),
            });
        }
        // Lines typed before this acquisition belong to nobody.
        self.lines().clear();
        Ok(Box::new(WedgeStream {
            scanner: self.clone(),
            sequence: 0,
        }))
    }
}

struct WedgeStream {
    scanner: WedgeScanner,
    sequence: u64,
}

impl VideoStream for WedgeStream {
    fn device_id(&self) -> &str {
        WEDGE_DEVICE_ID
    }

    fn grab_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(line) = self.scanner.lines().pop_front() else {
            return Ok(None);
        };
        self.sequence += 1;
        Ok(Some(Frame {
            sequence: self.sequence,
            data: line.into_bytes(),
        }))
    }
}

impl Drop for WedgeStream {
    fn drop(&mut self) {
        self.scanner.feed.open.store(false, Ordering::SeqCst);
        self.scanner.lines().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_become_frames_while_open() {
        let mut scanner = WedgeScanner::new();
        assert!(!scanner.feed_line("too early"));

        let mut stream = scanner.acquire(WEDGE_DEVICE_ID).unwrap();
        assert!(scanner.is_open());
        assert!(scanner.feed_line("BUS123"));

        let frame = stream.grab_frame().unwrap().unwrap();
        assert_eq!(frame.data, b"BUS123");
        assert_eq!(frame.sequence, 1);
        assert!(stream.grab_frame().unwrap().is_none());
    }

    #[test]
    fn test_single_stream_at_a_time() {
        let mut scanner = WedgeScanner::new();
        let first = scanner.acquire(WEDGE_DEVICE_ID).unwrap();
        assert!(scanner.acquire(WEDGE_DEVICE_ID).is_err());

        drop(first);
        assert!(!scanner.is_open());
        assert!(scanner.acquire(WEDGE_DEVICE_ID).is_ok());
    }

    #[test]
    fn test_release_discards_pending_lines() {
        let mut scanner = WedgeScanner::new();
        let stream = scanner.acquire(WEDGE_DEVICE_ID).unwrap();
        scanner.feed_line("BUS1");
        drop(stream);

        let mut stream = scanner.acquire(WEDGE_DEVICE_ID).unwrap();
        assert!(stream.grab_frame().unwrap().is_none());
    }

    #[test]
    fn test_unknown_device_is_unavailable() {
        let mut scanner = WedgeScanner::new();
        assert!(matches!(
            scanner.acquire("video0"),
            Err(CameraError::Unavailable { .. })
        ));
    }
}
