use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use crate::inference::preprocessing::{crop_region, resize_exact};
use crate::inference::{Classifier, LabelMap};
use crate::pipeline::{PipelineContext, RegionData, RegionStep};

/// Cut each region out of the frozen frame
pub struct CropStep;

impl RegionStep for CropStep {
    fn process(&self, data: Vec<RegionData>, _context: &PipelineContext) -> Result<Vec<RegionData>> {
        let mut result = Vec::new();
        for mut item in data {
            match crop_region(&item.original, &item.region.bbox) {
                Some(crop) => {
                    item.image = crop;
                    result.push(item);
                }
                None => warn!("Skipping degenerate region {:?}", item.region.bbox),
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Crop"
    }
}

/// Resize crops to the classifier input size
pub struct ResizeStep {
    pub width: u32,
    pub height: u32,
}

impl RegionStep for ResizeStep {
    fn process(&self, data: Vec<RegionData>, _context: &PipelineContext) -> Result<Vec<RegionData>> {
        let mut result = Vec::new();
        for mut item in data {
            if item.image.width() == 0 || item.image.height() == 0 {
                warn!("Skipping region {:?} with nothing to resize", item.region.bbox);
                continue;
            }
            item.image = resize_exact(&item.image, self.width, self.height);
            result.push(item);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Resize"
    }
}

/// Run the classifier on every region
pub struct ClassifyStep {
    pub classifier: Arc<dyn Classifier>,
    pub min_confidence: Option<f32>,
}

impl RegionStep for ClassifyStep {
    fn process(&self, data: Vec<RegionData>, _context: &PipelineContext) -> Result<Vec<RegionData>> {
        let mut result = Vec::new();
        let total = data.len();

        for (i, mut item) in data.into_iter().enumerate() {
            let classification = match self.classifier.classify(&item.image) {
                Ok(c) => c,
                Err(err) => {
                    warn!("Classifier failed on region {} of {}: {err:#}", i + 1, total);
                    continue;
                }
            };

            if let Some(min) = self.min_confidence {
                if classification.confidence < min {
                    debug!(
                        "Dropping class {} at confidence {:.2} (< {:.2})",
                        classification.class_index, classification.confidence, min
                    );
                    continue;
                }
            }

            item.classification = Some(classification);
            result.push(item);
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "Classify"
    }
}

/// Map class indices to canonical labels; unknown indices are background noise
pub struct LabelStep {
    pub labels: LabelMap,
}

impl RegionStep for LabelStep {
    fn process(&self, data: Vec<RegionData>, _context: &PipelineContext) -> Result<Vec<RegionData>> {
        let mut result = Vec::new();
        for mut item in data {
            let Some(classification) = item.classification else {
                continue;
            };
            match self.labels.label_of(classification.class_index) {
                Some(label) => {
                    item.label = Some(label.to_string());
                    result.push(item);
                }
                None => debug!("No label for class {}", classification.class_index),
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Label"
    }
}
