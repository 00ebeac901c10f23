pub mod config;
pub mod core;
pub mod error;
pub mod hardware;
pub mod inference;
pub mod kiosk;
pub mod models;
pub mod pipeline;
pub mod receipt;

pub use config::{DeviceConfig, KioskConfig};
pub use crate::core::{CaptureSession, Ledger, LedgerMode, MenuCatalog, Mode, Transition, TriggerStateMachine};
pub use error::ConfigError;
pub use inference::{Classifier, Detector, LabelMap, PipelineSettings, build_standard_pipeline};
pub use kiosk::{Kiosk, LoopTimings};
pub use models::{
    BoundingBox, CaptureResult, Classification, ClassifiedItem, DetectedRegion, Transaction,
};
pub use pipeline::{InferencePipeline, PipelineContext, PipelineOutput, RegionData, RegionStep};
