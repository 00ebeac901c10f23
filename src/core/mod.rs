pub mod ledger;
pub mod menu;
pub mod session;
pub mod trigger;

pub use ledger::{Ledger, LedgerMode};
pub use menu::{MenuCatalog, MenuItem, canonical_label};
pub use session::{CaptureSession, Mode};
pub use trigger::{TRIGGER_SIGNAL, Transition, TriggerStateMachine, is_trigger};
