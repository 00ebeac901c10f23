use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use log::debug;
use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::NdTensor;

use crate::inference::Detector;
use crate::inference::preprocessing::to_nchw;
use crate::models::{BoundingBox, DetectedRegion};

#[derive(Debug, Clone)]
pub struct YoloParams {
    /// Square model input, 640 typical
    pub input_size: u32,
    /// Minimum class score, 0..1
    pub conf_threshold: f32,
    /// Overlap above which the weaker box is suppressed, 0..1
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Tray detector running an exported YOLO model on rten.
///
/// Expects a single `[1, 4 + classes, anchors]` output where the first four
/// rows are box centre and size in input pixels and the rest are class scores.
pub struct YoloDetector {
    model: Model,
    params: YoloParams,
}

impl YoloDetector {
    pub fn load<P: AsRef<Path>>(path: P, params: YoloParams) -> Result<Self> {
        let path = path.as_ref();
        let model = Model::load_file(path)
            .with_context(|| format!("failed to load detector model {}", path.display()))?;
        Ok(Self { model, params })
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectedRegion>> {
        let input = to_nchw(frame, self.params.input_size);
        let output: NdTensor<f32, 3> = self
            .model
            .run_one(input.view().into(), None)
            .context("detector inference failed")?
            .try_into()
            .context("unexpected detector output")?;

        let [_, attrs, anchors] = output.shape();
        let scale_x = frame.width() as f32 / self.params.input_size as f32;
        let scale_y = frame.height() as f32 / self.params.input_size as f32;

        let regions = decode_predictions(
            &output.to_vec(),
            attrs,
            anchors,
            (scale_x, scale_y),
            &self.params,
        );
        debug!("YOLO kept {} of {} anchors", regions.len(), anchors);
        Ok(regions)
    }
}

/// Decode a row-major `[attrs, anchors]` prediction block into frame-space
/// regions, then suppress overlaps.
pub fn decode_predictions(
    data: &[f32],
    attrs: usize,
    anchors: usize,
    scale: (f32, f32),
    params: &YoloParams,
) -> Vec<DetectedRegion> {
    if attrs <= 4 || data.len() < attrs * anchors {
        return Vec::new();
    }
    let at = |row: usize, col: usize| data[row * anchors + col];

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_index, confidence) = (4..attrs)
            .map(|row| (row - 4, at(row, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < params.conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale.0).round() as i32,
            ((cy - h / 2.0) * scale.1).round() as i32,
            ((cx + w / 2.0) * scale.0).round() as i32,
            ((cy + h / 2.0) * scale.1).round() as i32,
        );
        candidates.push(DetectedRegion {
            bbox,
            class_index,
            confidence,
        });
    }

    non_max_suppression(candidates, params.iou_threshold, params.max_detections)
}

/// Per-class NMS. Output is sorted by confidence, strongest first.
pub fn non_max_suppression(
    mut candidates: Vec<DetectedRegion>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<DetectedRegion> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectedRegion> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept.iter().any(|k| {
            k.class_index == candidate.class_index && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x1: i32, y1: i32, x2: i32, y2: i32, class_index: usize, confidence: f32) -> DetectedRegion {
        DetectedRegion {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            class_index,
            confidence,
        }
    }

    #[test]
    fn nms_keeps_strongest_overlap() {
        let kept = non_max_suppression(
            vec![
                region(0, 0, 10, 10, 0, 0.6),
                region(1, 1, 11, 11, 0, 0.9),
                region(50, 50, 60, 60, 0, 0.5),
            ],
            0.45,
            100,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].bbox, BoundingBox::new(50, 50, 60, 60));
    }

    #[test]
    fn nms_is_per_class() {
        let kept = non_max_suppression(
            vec![region(0, 0, 10, 10, 0, 0.9), region(0, 0, 10, 10, 1, 0.8)],
            0.45,
            100,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn decodes_and_scales_boxes() {
        // 2 classes, 3 anchors; layout [attr][anchor]
        let data = vec![
            // cx
            50.0, 10.0, 30.0,
            // cy
            40.0, 10.0, 30.0,
            // w
            20.0, 4.0, 10.0,
            // h
            10.0, 4.0, 10.0,
            // class 0
            0.1, 0.05, 0.7,
            // class 1
            0.8, 0.1, 0.2,
        ];
        let params = YoloParams::default();
        let regions = decode_predictions(&data, 6, 3, (2.0, 1.0), &params);

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].class_index, 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(80, 35, 120, 45));
        assert_eq!(regions[1].class_index, 0);
        assert_eq!(regions[1].bbox, BoundingBox::new(50, 25, 70, 35));
    }
}
