//! The two polling loops that keep the kiosk running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::session::CaptureSession;
use crate::core::trigger::{Transition, TriggerStateMachine};
use crate::hardware::{FrameSource, FrameSourceFactory, TriggerLink, split_signals};
use crate::inference::preprocessing::zoom_center;

/// Poll periods for the two loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    pub camera: Duration,
    pub trigger: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            camera: Duration::from_millis(10),
            trigger: Duration::from_millis(50),
        }
    }
}

/// Camera side: pulls frames and keeps the session's live frame fresh.
///
/// Runs on a blocking thread until `cancel` fires. Grab errors are logged
/// and the loop keeps going; a camera that comes back resumes the feed.
pub fn camera_loop(
    source: &mut dyn FrameSource,
    session: &CaptureSession,
    zoom: f32,
    interval: Duration,
    cancel: &CancellationToken,
) {
    let mut failures = 0usize;
    while !cancel.is_cancelled() {
        match source.next_frame() {
            Ok(Some(frame)) => {
                if failures > 0 {
                    info!("Camera recovered after {} failed grabs", failures);
                    failures = 0;
                }
                session.refresh_live_frame(zoom_center(&frame, zoom));
            }
            Ok(None) => {}
            Err(err) => {
                failures += 1;
                if failures == 1 {
                    warn!("Camera frame grab failed: {err:#}");
                }
            }
        }
        std::thread::sleep(interval);
    }
    debug!("Camera loop stopped");
}

/// Trigger side: drains the link every tick and feeds each line to the
/// machine. Returns the machine once `cancel` fires.
///
/// Inference runs inside `block_in_place`, so this needs the multi-thread
/// runtime.
pub async fn trigger_loop(
    mut machine: TriggerStateMachine,
    mut link: Box<dyn TriggerLink>,
    interval: Duration,
    cancel: CancellationToken,
) -> TriggerStateMachine {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::task::block_in_place(|| poll_link(&mut machine, link.as_mut()));
            }
            _ = cancel.cancelled() => {
                debug!("Trigger loop stopped");
                break;
            }
        }
    }
    machine
}

fn poll_link(machine: &mut TriggerStateMachine, link: &mut dyn TriggerLink) {
    let bytes = match link.drain() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Trigger link read failed: {err:#}");
            return;
        }
    };
    for line in split_signals(&bytes) {
        if let Err(err) = machine.on_signal(&line) {
            warn!("Trigger dropped: {err:#}");
        }
    }
}

/// Camera, trigger link and state machine wired together.
pub struct Kiosk {
    machine: TriggerStateMachine,
    link: Box<dyn TriggerLink>,
    frames: FrameSourceFactory,
    zoom: f32,
    timings: LoopTimings,
}

impl Kiosk {
    pub fn new(
        machine: TriggerStateMachine,
        link: Box<dyn TriggerLink>,
        frames: FrameSourceFactory,
    ) -> Self {
        Self {
            machine,
            link,
            frames,
            zoom: 1.5,
            timings: LoopTimings::default(),
        }
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_timings(mut self, timings: LoopTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn session(&self) -> &Arc<CaptureSession> {
        self.machine.session()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.machine.subscribe()
    }

    /// Run both loops until `cancel` fires. Fails early if the frame source
    /// cannot be opened. Returns the machine so callers can inspect the
    /// final state.
    pub async fn run(self, cancel: CancellationToken) -> Result<TriggerStateMachine> {
        let Kiosk {
            machine,
            link,
            frames,
            zoom,
            timings,
        } = self;

        let session = machine.session().clone();
        let camera_cancel = cancel.clone();
        let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();

        let camera = tokio::task::spawn_blocking(move || {
            let mut source = match frames() {
                Ok(source) => {
                    let _ = opened_tx.send(Ok(()));
                    source
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                    return;
                }
            };
            camera_loop(source.as_mut(), &session, zoom, timings.camera, &camera_cancel);
        });

        opened_rx
            .await
            .context("camera thread exited before opening its source")?
            .context("failed to open frame source")?;
        info!("Kiosk running, waiting for trigger");

        let machine = trigger_loop(machine, link, timings.trigger, cancel.clone()).await;

        // The trigger loop only returns on cancellation; make sure the
        // camera side sees it too.
        cancel.cancel();
        camera.await.context("camera loop panicked")?;
        info!("Kiosk stopped");
        Ok(machine)
    }
}
