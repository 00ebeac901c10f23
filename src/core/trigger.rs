use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::core::ledger::Ledger;
use crate::core::menu::MenuCatalog;
use crate::core::session::{CaptureSession, Mode};
use crate::models::CaptureResult;
use crate::pipeline::InferencePipeline;

/// The only line the button controller sends.
pub const TRIGGER_SIGNAL: &str = "1";

pub fn is_trigger(line: &str) -> bool {
    line.trim() == TRIGGER_SIGNAL
}

/// A state change the machine actually performed.
#[derive(Debug, Clone)]
pub enum Transition {
    Captured(Arc<CaptureResult>),
    Reset,
}

/// Alternates capture and reset on a single button.
///
/// In `Live` a trigger freezes the current frame, runs the pipeline and
/// records the bill. In `Result` the next trigger acknowledges it and goes
/// back to the live feed. Every other input is ignored.
pub struct TriggerStateMachine {
    session: Arc<CaptureSession>,
    pipeline: InferencePipeline,
    catalog: Arc<MenuCatalog>,
    ledger: Ledger,
    events: broadcast::Sender<Transition>,
}

impl TriggerStateMachine {
    pub fn new(
        session: Arc<CaptureSession>,
        pipeline: InferencePipeline,
        catalog: Arc<MenuCatalog>,
        ledger: Ledger,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session,
            pipeline,
            catalog,
            ledger,
            events,
        }
    }

    pub fn state(&self) -> Mode {
        self.session.mode()
    }

    pub fn session(&self) -> &Arc<CaptureSession> {
        &self.session
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Receive every transition, e.g. to print a receipt.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    /// Feed one line from the trigger link.
    pub fn on_signal(&mut self, line: &str) -> Result<Option<Transition>> {
        if !is_trigger(line) {
            debug!("Ignoring signal {:?}", line);
            return Ok(None);
        }
        match self.state() {
            Mode::Live => self.trigger_capture(),
            Mode::Result => Ok(self.trigger_reset()),
        }
    }

    /// `Live -> Result`. Does nothing outside `Live` or before the camera
    /// has produced a frame. On failure the session goes back to `Live`.
    pub fn trigger_capture(&mut self) -> Result<Option<Transition>> {
        if self.state() != Mode::Live {
            return Ok(None);
        }
        let Some(frame) = self.session.freeze() else {
            warn!("Trigger received before the first camera frame, ignoring");
            return Ok(None);
        };

        self.session.set_mode(Mode::Result);

        let result = match self.capture(&frame) {
            Ok(result) => Arc::new(result),
            Err(err) => {
                error!("Capture failed, back to live feed: {err:#}");
                self.session.return_to_live();
                return Err(err);
            }
        };

        info!(
            "Transaction #{}: {} items, amount {}, running total {}",
            result.transaction.sequence,
            result.items.len(),
            result.amount,
            result.transaction.running_total
        );
        self.session.publish_result(result.clone());

        let transition = Transition::Captured(result);
        let _ = self.events.send(transition.clone());
        Ok(Some(transition))
    }

    /// `Result -> Live`. No pipeline or ledger work.
    pub fn trigger_reset(&mut self) -> Option<Transition> {
        if self.state() != Mode::Result {
            return None;
        }
        self.session.return_to_live();
        debug!("Result acknowledged, back to live feed");

        let _ = self.events.send(Transition::Reset);
        Some(Transition::Reset)
    }

    fn capture(&mut self, frame: &image::RgbImage) -> Result<CaptureResult> {
        let output = self.pipeline.process(frame, &self.catalog)?;
        let labels: Vec<String> = output.items.iter().map(|i| i.label.clone()).collect();
        let transaction = self.ledger.append(&labels, output.amount)?;

        Ok(CaptureResult {
            transaction,
            annotated: output.annotated,
            items: output.items,
            amount: output.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_only_the_trigger_line() {
        assert!(is_trigger("1"));
        assert!(is_trigger(" 1\r"));
        assert!(!is_trigger("0"));
        assert!(!is_trigger("11"));
        assert!(!is_trigger(""));
        assert!(!is_trigger("1 1"));
    }
}
