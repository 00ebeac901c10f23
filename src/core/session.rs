use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use image::RgbImage;
use tokio::sync::watch;

use crate::models::CaptureResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Showing the camera feed, waiting for a trigger.
    #[default]
    Live,
    /// Showing the last capture, waiting for the acknowledging trigger.
    Result,
}

/// State shared by the camera loop, the trigger loop and any display.
///
/// Write ownership is split by field:
/// - `live_frame` is written only by the camera loop, and only in `Live` mode.
/// - `mode`, `last_result` and the payment flag are written only by the
///   trigger state machine.
///
/// Each field has its own lock and no lock is held while inference runs, so
/// the camera loop never waits on a capture.
#[derive(Debug)]
pub struct CaptureSession {
    live_frame: RwLock<Option<Arc<RgbImage>>>,
    mode: watch::Sender<Mode>,
    last_result: RwLock<Option<Arc<CaptureResult>>>,
    payment_requested: AtomicBool,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        let (mode, _) = watch::channel(Mode::Live);
        Self {
            live_frame: RwLock::new(None),
            mode,
            last_result: RwLock::new(None),
            payment_requested: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> Mode {
        *self.mode.borrow()
    }

    /// Receive every mode change, e.g. to redraw a display.
    pub fn subscribe(&self) -> watch::Receiver<Mode> {
        self.mode.subscribe()
    }

    pub fn live_frame(&self) -> Option<Arc<RgbImage>> {
        self.live_frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Present only while the session is in `Result` mode.
    pub fn last_result(&self) -> Option<Arc<CaptureResult>> {
        self.last_result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store the newest camera frame. Ignored outside `Live` mode so the
    /// frozen capture stays on screen. Returns whether the frame was kept.
    pub fn refresh_live_frame(&self, frame: RgbImage) -> bool {
        if self.mode() != Mode::Live {
            return false;
        }
        *self.live_frame.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
        true
    }

    /// UI intent to show the payment QR code. Only meaningful while a
    /// result is on screen.
    pub fn request_payment_display(&self) -> bool {
        if self.mode() != Mode::Result {
            return false;
        }
        self.payment_requested.store(true, Ordering::SeqCst);
        true
    }

    pub fn payment_display_requested(&self) -> bool {
        self.payment_requested.load(Ordering::SeqCst)
    }

    /// Take the current live frame as the capture's working copy.
    pub(crate) fn freeze(&self) -> Option<Arc<RgbImage>> {
        self.live_frame()
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.mode.send_replace(mode);
    }

    pub(crate) fn publish_result(&self, result: Arc<CaptureResult>) {
        *self.last_result.write().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    /// Drop the shown result and go back to the live feed.
    pub(crate) fn return_to_live(&self) {
        self.last_result
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.payment_requested.store(false, Ordering::SeqCst);
        self.set_mode(Mode::Live);
    }
}
