use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use image::{Rgb, RgbImage};
use traybill::core::{CaptureSession, Ledger, LedgerMode, MenuCatalog, TriggerStateMachine};
use traybill::inference::{Classifier, Detector, LabelMap, PipelineSettings, build_standard_pipeline};
use traybill::models::{BoundingBox, Classification, DetectedRegion};
use traybill::pipeline::InferencePipeline;

/// Labels used by the test classifier, in class-index order.
/// GA_NUONG is deliberately absent from `test_menu()`.
pub const TEST_LABELS: [&str; 3] = ["CANHCHUA", "COM", "GA_NUONG"];

pub const CANHCHUA: usize = 0;
pub const COM: usize = 1;
pub const GA_NUONG: usize = 2;
/// Index with no label in `TEST_LABELS`.
pub const UNMAPPED: usize = 7;

pub const FRAME_SIZE: (u32, u32) = (240, 120);

/// Two-dish menu: CANHCHUA 15000, COM 5000.
pub fn test_menu() -> MenuCatalog {
    MenuCatalog::from_entries([("CANHCHUA", 15000), ("COM", 5000)])
}

/// Detector that returns a fixed list of regions and counts its calls.
pub struct ScriptedDetector {
    regions: Vec<DetectedRegion>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(regions: Vec<DetectedRegion>) -> Self {
        Self {
            regions,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Shared call counter, readable after the detector moved into a pipeline.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<DetectedRegion>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("detector offline");
        }
        Ok(self.regions.clone())
    }
}

/// Reads the class index out of the region colour.
///
/// The red channel encodes the class as `20 * index + 10`, the green channel
/// is the confidence scaled to 0..=255. Any other red value is a classifier
/// error.
pub struct ColorClassifier;

impl Classifier for ColorClassifier {
    fn classify(&self, region: &RgbImage) -> Result<Classification> {
        let Rgb([r, g, _]) = *region.get_pixel(region.width() / 2, region.height() / 2);
        if r % 20 != 10 {
            bail!("unreadable region (red = {r})");
        }
        Ok(Classification {
            class_index: ((r - 10) / 20) as usize,
            confidence: g as f32 / 255.0,
        })
    }
}

/// Colour the classifier reads back as `class_index` with `confidence`.
pub fn class_color(class_index: usize, confidence: f32) -> Rgb<u8> {
    Rgb([(20 * class_index + 10) as u8, (confidence * 255.0).round() as u8, 0])
}

/// Colour the classifier refuses.
pub const UNREADABLE: Rgb<u8> = Rgb([255, 255, 255]);

/// Tray item for `paint_tray`: a box and the colour to fill it with.
pub struct Dish {
    pub bbox: BoundingBox,
    pub color: Rgb<u8>,
}

pub fn dish(x: i32, class_index: usize) -> Dish {
    Dish {
        bbox: BoundingBox::new(x, 20, x + 40, 60),
        color: class_color(class_index, 0.9),
    }
}

/// Grey frame with every dish painted as a solid rectangle.
pub fn paint_tray(dishes: &[Dish]) -> RgbImage {
    let (w, h) = FRAME_SIZE;
    let mut frame = RgbImage::from_pixel(w, h, Rgb([90, 90, 90]));
    for dish in dishes {
        let Some((x, y, dw, dh)) = dish.bbox.clamp_to(w, h) else {
            continue;
        };
        for py in y..y + dh {
            for px in x..x + dw {
                frame.put_pixel(px, py, dish.color);
            }
        }
    }
    frame
}

/// Detector regions matching the painted dishes, in the same order.
pub fn regions_for(dishes: &[Dish]) -> Vec<DetectedRegion> {
    dishes
        .iter()
        .map(|d| DetectedRegion {
            bbox: d.bbox,
            class_index: 0,
            confidence: 0.8,
        })
        .collect()
}

pub fn test_settings(min_confidence: Option<f32>) -> PipelineSettings {
    PipelineSettings {
        classifier_input: (32, 32),
        min_confidence,
        labels: LabelMap::new(TEST_LABELS),
    }
}

pub fn make_pipeline(detector: ScriptedDetector, min_confidence: Option<f32>) -> InferencePipeline {
    build_standard_pipeline(
        Arc::new(detector),
        Arc::new(ColorClassifier),
        test_settings(min_confidence),
    )
}

/// State machine over a fresh ledger in `dir`, with the test menu.
pub fn make_machine(dir: &Path, detector: ScriptedDetector) -> TriggerStateMachine {
    let ledger = Ledger::open(dir.join("history.csv"), LedgerMode::Fresh).expect("Failed to open test ledger");
    TriggerStateMachine::new(
        Arc::new(CaptureSession::new()),
        make_pipeline(detector, None),
        Arc::new(test_menu()),
        ledger,
    )
}

/// Writes a menu document in the kiosk's JSON format.
pub fn write_menu_file(dir: &Path, entries: &[(&str, u64)]) -> std::path::PathBuf {
    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|(name, price)| serde_json::json!({ "MON": name, "GIA": price }))
        .collect();
    let path = dir.join("MENU.json");
    std::fs::write(&path, serde_json::json!({ "MENU": items }).to_string())
        .expect("Failed to write test menu");
    path
}
