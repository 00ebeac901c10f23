mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from traybill for tests
pub use traybill::core::{CaptureSession, Ledger, LedgerMode, MenuCatalog, Mode, Transition, TriggerStateMachine};
pub use traybill::models::{BoundingBox, CaptureResult, ClassifiedItem, DetectedRegion, Transaction};
pub use traybill::pipeline::InferencePipeline;
