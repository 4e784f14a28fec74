//! Decoder capability and the continuous decode loop.
//!
//! A [`Decoder`] turns one frame into at most one text payload. The
//! [`DecoderLoop`] runs a background task that pulls frames from the active
//! stream at a fixed rate and forwards every payload as a [`DecodeEvent`].
//!
//! Each started loop gets a new generation number. Events are tagged with it,
//! and [`DecoderLoop::is_current`] tells the consumer whether an event belongs
//! to the loop that is running now. After [`DecoderLoop::stop`] no event is
//! current, so payloads already queued by a stopped loop are never delivered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::camera::{lock_stream, CameraError, Frame, SharedStream};

/// Turns frames into text payloads.
pub trait Decoder: Send + Sync {
    /// Decode one frame. `None` means no code is visible.
    fn decode(&self, frame: &Frame) -> Option<String>;
}

/// Decoder for sources whose frames already carry the decoded text.
///
/// Keyboard-wedge scanners and hardware decoders deliver text directly; this
/// decoder returns it with line terminators removed. Invalid UTF-8 counts as
/// no code.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    fn decode(&self, frame: &Frame) -> Option<String> {
        let text = std::str::from_utf8(&frame.data).ok()?;
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Message from a decode loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A payload was decoded (possibly empty).
    Decoded {
        /// Loop that produced the payload.
        generation: u64,
        /// Decoded text.
        payload: String,
    },
    /// The stream failed; the loop has ended.
    StreamFailed {
        /// Loop that observed the failure.
        generation: u64,
        /// Error text.
        message: String,
    },
}

impl DecodeEvent {
    /// Generation of the loop that produced this event.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Decoded { generation, .. } | Self::StreamFailed { generation, .. } => *generation,
        }
    }
}

/// Run the decoder once on the newest frame of `stream`.
///
/// Returns `Ok(None)` when the camera is released, no frame is available, or
/// no code is visible.
///
/// # Errors
///
/// Returns the stream's error if grabbing a frame fails.
pub fn decode_once(
    stream: &SharedStream,
    decoder: &dyn Decoder,
) -> Result<Option<String>, CameraError> {
    let frame = match lock_stream(stream).as_mut() {
        Some(stream) => stream.grab_frame()?,
        None => return Ok(None),
    };
    Ok(frame.and_then(|frame| decoder.decode(&frame)))
}

/// Owner of the single decode task.
pub struct DecoderLoop {
    decoder: Arc<dyn Decoder>,
    interval: Duration,
    tx: mpsc::UnboundedSender<DecodeEvent>,
    task: Option<JoinHandle<()>>,
    generation: u64,
    active: Option<u64>,
}

impl DecoderLoop {
    /// Create an idle loop and the receiver its events are delivered on.
    #[must_use]
    pub fn new(
        decoder: Arc<dyn Decoder>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DecodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                decoder,
                interval,
                tx,
                task: None,
                generation: 0,
                active: None,
            },
            rx,
        )
    }

    /// Start decoding `stream`, stopping any loop already running.
    ///
    /// Must be called from within a tokio runtime. Returns the new generation.
    pub fn start(&mut self, stream: SharedStream) -> u64 {
        self.stop();

        self.generation += 1;
        let generation = self.generation;
        let decoder = Arc::clone(&self.decoder);
        let tx = self.tx.clone();
        let interval = self.interval;

        self.task = Some(tokio::spawn(async move {
            run_loop(generation, stream, decoder, interval, tx).await;
        }));
        self.active = Some(generation);
        debug!(generation, "decode loop started");
        generation
    }

    /// Stop the running loop, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(generation) = self.active.take() {
            debug!(generation, "decode loop stopped");
        }
    }

    /// Whether a loop is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Whether `event` was produced by the running loop.
    #[must_use]
    pub fn is_current(&self, event: &DecodeEvent) -> bool {
        self.active == Some(event.generation())
    }

    /// Force one decode attempt on the current frame of `stream`.
    ///
    /// # Errors
    ///
    /// Returns the stream's error if grabbing a frame fails.
    pub fn force_decode(&self, stream: &SharedStream) -> Result<Option<String>, CameraError> {
        decode_once(stream, self.decoder.as_ref())
    }
}

impl Drop for DecoderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    generation: u64,
    stream: SharedStream,
    decoder: Arc<dyn Decoder>,
    interval: Duration,
    tx: mpsc::UnboundedSender<DecodeEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let grabbed = {
            let mut guard = lock_stream(&stream);
            guard.as_mut().map(|stream| stream.grab_frame())
        };
        let Some(grabbed) = grabbed else {
            trace!(generation, "stream released, decode loop exiting");
            return;
        };

        let event = match grabbed {
            Ok(Some(frame)) => match decoder.decode(&frame) {
                Some(payload) => DecodeEvent::Decoded {
                    generation,
                    payload,
                },
                None => continue,
            },
            Ok(None) => continue,
            Err(e) => {
                warn!(generation, error = %e, "camera stream failed");
                let _ = tx.send(DecodeEvent::StreamFailed {
                    generation,
                    message: e.to_string(),
                });
                return;
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    }
}
