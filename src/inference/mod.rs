pub mod classifier;
pub mod preprocessing;
pub mod steps;
pub mod yolo;

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::models::{Classification, DetectedRegion};
use crate::pipeline::InferencePipeline;

pub use classifier::CnnClassifier;
pub use yolo::{YoloDetector, YoloParams};

/// Locates candidate dishes in a frame.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectedRegion>>;
}

/// Assigns a class index to one region, already cropped and resized to the
/// classifier's input size.
pub trait Classifier: Send + Sync {
    fn classify(&self, region: &RgbImage) -> Result<Classification>;
}

impl<F> Detector for F
where
    F: Fn(&RgbImage) -> Result<Vec<DetectedRegion>> + Send + Sync,
{
    fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectedRegion>> {
        self(frame)
    }
}

impl<F> Classifier for F
where
    F: Fn(&RgbImage) -> Result<Classification> + Send + Sync,
{
    fn classify(&self, region: &RgbImage) -> Result<Classification> {
        self(region)
    }
}

/// Classifier output order of the bundled dish model.
pub const FOOD_LABELS: [&str; 10] = [
    "CAHUKHO",
    "CANHCAI",
    "CANHCHUA",
    "COM",
    "DAUHUSOTCA",
    "GACHIEN",
    "RAUMUONGXAO",
    "THITKHOTIEU",
    "THITKHOTRUNG",
    "TRUNGCHIEN",
];

/// Class index to canonical label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn label_of(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::new(FOOD_LABELS)
    }
}

/// Knobs for the standard per-region steps.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Size every crop is resized to before classification
    pub classifier_input: (u32, u32),
    /// Drop classifications scoring below this. `None` accepts all.
    pub min_confidence: Option<f32>,
    pub labels: LabelMap,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            classifier_input: (224, 224),
            min_confidence: None,
            labels: LabelMap::default(),
        }
    }
}

/// Build the standard capture pipeline: crop, resize, classify, label.
pub fn build_standard_pipeline(
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    settings: PipelineSettings,
) -> InferencePipeline {
    use steps::*;

    let (width, height) = settings.classifier_input;
    InferencePipeline::new(detector)
        .add_step(Arc::new(CropStep))
        .add_step(Arc::new(ResizeStep { width, height }))
        .add_step(Arc::new(ClassifyStep {
            classifier,
            min_confidence: settings.min_confidence,
        }))
        .add_step(Arc::new(LabelStep {
            labels: settings.labels,
        }))
}
