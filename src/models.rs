use image::RgbImage;
use time::PrimitiveDateTime;

/// Number of item columns a ledger row carries.
pub const LEDGER_ITEM_SLOTS: usize = 6;

/// Detector box in frame pixel coordinates, corners inclusive-exclusive.
/// A detector may hand back coordinates outside the frame; they are only
/// clamped when the region is cropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Clamp to a `width x height` frame and return `(x, y, w, h)`.
    /// Returns `None` when nothing of the box is left inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let w = width as i64;
        let h = height as i64;
        let x1 = (self.x1 as i64).clamp(0, w);
        let y1 = (self.y1 as i64).clamp(0, h);
        let x2 = (self.x2 as i64).clamp(0, w);
        let y2 = (self.y2 as i64).clamp(0, h);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }

    /// Intersection over union, used for non-maximum suppression.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = ((ix2 - ix1).max(0) as f32) * ((iy2 - iy1).max(0) as f32);
        let area_a = (self.width().max(0) * self.height().max(0)) as f32;
        let area_b = (other.width().max(0) * other.height().max(0)) as f32;
        let union = area_a + area_b - inter;

        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// A candidate item region reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedRegion {
    pub bbox: BoundingBox,
    pub class_index: usize,
    pub confidence: f32,
}

/// Classifier output for one cropped region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub class_index: usize,
    pub confidence: f32,
}

/// One dish accepted from a capture. `price` is `None` when the menu has
/// no entry for the label; such items are shown but billed at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedItem {
    pub label: String,
    pub price: Option<u64>,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sequence: u64,
    pub timestamp: PrimitiveDateTime,
    /// At most [`LEDGER_ITEM_SLOTS`] labels.
    pub items: Vec<String>,
    pub amount: u64,
    pub running_total: u64,
}

/// What a capture produced: the recorded transaction plus everything a
/// display needs to render it.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub transaction: Transaction,
    pub annotated: RgbImage,
    pub items: Vec<ClassifiedItem>,
    pub amount: u64,
}
