use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use image::RgbImage;
use log::{debug, warn};

use crate::core::menu::MenuCatalog;
use crate::inference::Detector;
use crate::inference::preprocessing::draw_regions;
use crate::models::{Classification, ClassifiedItem, DetectedRegion};

/// Data that flows through the region steps.
/// Each RegionData is one detector hit on the frozen frame.
#[derive(Clone)]
pub struct RegionData {
    /// Working image for this region: empty until cropped, then the crop,
    /// then whatever later steps turn it into
    pub image: RgbImage,

    /// The frozen frame the region was detected on (shared via Arc)
    pub original: Arc<RgbImage>,

    /// Detector output for this region
    pub region: DetectedRegion,

    pub classification: Option<Classification>,

    /// Canonical label, set once the class index maps to a known dish
    pub label: Option<String>,
}

impl RegionData {
    pub fn from_region(original: Arc<RgbImage>, region: DetectedRegion) -> Self {
        Self {
            image: RgbImage::new(0, 0),
            original,
            region,
            classification: None,
            label: None,
        }
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
    /// Whether debug mode is enabled
    pub enabled: bool,
}

/// Context available to all region steps
#[derive(Clone, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
}

/// Trait that all region steps must implement.
///
/// Steps drop regions they cannot handle rather than failing; an `Err`
/// aborts the whole capture and is reserved for problems that would hit
/// every region alike.
pub trait RegionStep: Send + Sync {
    fn process(&self, data: Vec<RegionData>, context: &PipelineContext) -> Result<Vec<RegionData>>;

    /// Human-readable name for this step (used in logs and debug dirs)
    fn name(&self) -> &str;
}

/// Result of running the pipeline over one frame.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Frame copy with every detector box drawn on it
    pub annotated: RgbImage,
    /// Accepted dishes in order of first appearance, one per label
    pub items: Vec<ClassifiedItem>,
    /// Sum of all resolved prices
    pub amount: u64,
}

/// Detector followed by composable per-region steps, then dedup and pricing.
pub struct InferencePipeline {
    detector: Arc<dyn Detector>,
    steps: Vec<Arc<dyn RegionStep>>,
    context: PipelineContext,
    captures: AtomicUsize,
}

impl InferencePipeline {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            steps: Vec::new(),
            context: PipelineContext::default(),
            captures: AtomicUsize::new(0),
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig {
            output_dir,
            enabled: true,
        });

        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn RegionStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Helper method to add a step from a Box (for convenience)
    pub fn add_step_boxed(mut self, step: Box<dyn RegionStep>) -> Self {
        self.steps.push(Arc::from(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Detect, annotate, run the region steps, then dedup and price.
    ///
    /// Only a detector failure (or a step failing as a whole) is an error.
    /// Regions that cannot be cropped or classified are simply absent from
    /// the result.
    pub fn process(&self, frame: &RgbImage, catalog: &MenuCatalog) -> Result<PipelineOutput> {
        let capture_idx = self.captures.fetch_add(1, Ordering::SeqCst) + 1;

        let regions = self.detector.detect(frame)?;
        debug!("Detector returned {} regions", regions.len());

        let annotated = draw_regions(frame, &regions);
        self.save_debug_frames(capture_idx, frame, &annotated)?;

        let original = Arc::new(frame.clone());
        let mut data: Vec<RegionData> = regions
            .into_iter()
            .map(|region| RegionData::from_region(original.clone(), region))
            .collect();

        for (step_idx, step) in self.steps.iter().enumerate() {
            debug!("Running step: {} (processing {} regions)", step.name(), data.len());
            data = step.process(data, &self.context)?;
            self.save_debug_step(capture_idx, step_idx, step.name(), &data)?;
            debug!("  → {} regions", data.len());
        }

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for label in data.into_iter().filter_map(|d| d.label) {
            if !seen.insert(label.clone()) {
                debug!("Skipping repeated {}", label);
                continue;
            }
            let price = catalog.price_of(&label);
            if price.is_none() {
                warn!("{} is not on the menu, showing it unpriced", label);
            }
            items.push(ClassifiedItem { label, price });
        }

        let amount = items
            .iter()
            .filter_map(|item| item.price)
            .try_fold(0u64, u64::checked_add)
            .context("capture amount overflows")?;
        Ok(PipelineOutput {
            annotated,
            items,
            amount,
        })
    }

    fn capture_dir(&self, capture_idx: usize) -> Option<PathBuf> {
        match &self.context.debug {
            Some(debug) if debug.enabled => {
                Some(debug.output_dir.join(format!("capture_{:04}", capture_idx)))
            }
            _ => None,
        }
    }

    fn save_debug_frames(&self, capture_idx: usize, frame: &RgbImage, annotated: &RgbImage) -> Result<()> {
        let Some(dir) = self.capture_dir(capture_idx) else {
            return Ok(());
        };
        let input_dir = dir.join("00_input");
        std::fs::create_dir_all(&input_dir)?;
        frame
            .save(input_dir.join("frame.png"))
            .map_err(|e| anyhow::anyhow!("Failed to save debug input: {}", e))?;
        annotated
            .save(input_dir.join("annotated.png"))
            .map_err(|e| anyhow::anyhow!("Failed to save debug input: {}", e))?;
        debug!("  Debug: saved {}/00_input", dir.display());
        Ok(())
    }

    fn save_debug_step(
        &self,
        capture_idx: usize,
        step_idx: usize,
        step_name: &str,
        data: &[RegionData],
    ) -> Result<()> {
        let Some(dir) = self.capture_dir(capture_idx) else {
            return Ok(());
        };
        let step_dir = dir.join(format!(
            "{:02}_{}",
            step_idx + 1,
            step_name.to_lowercase().replace(' ', "_")
        ));
        std::fs::create_dir_all(&step_dir)?;

        for (idx, item) in data.iter().enumerate() {
            if item.image.width() == 0 || item.image.height() == 0 {
                continue;
            }
            let filename = match &item.label {
                Some(label) => format!("{:02}_{}.png", idx + 1, label),
                None => format!("{:02}.png", idx + 1),
            };
            item.image
                .save(step_dir.join(&filename))
                .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))?;
        }
        debug!("  Debug: saved {} images to {}", data.len(), step_dir.display());
        Ok(())
    }
}
