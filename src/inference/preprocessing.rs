use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rten_tensor::NdTensor;

use crate::models::{BoundingBox, DetectedRegion};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// Crop a region out of the frame, clamped to the frame bounds.
/// `None` when the clamped box is empty.
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.clamp_to(frame.width(), frame.height())?;
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Resize to exactly `width x height`, ignoring aspect ratio.
pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Enlarge the centre of the frame by `zoom`, keeping the frame size.
/// Compensates for the fixed distance between camera and tray.
pub fn zoom_center(frame: &RgbImage, zoom: f32) -> RgbImage {
    let (w, h) = frame.dimensions();
    if zoom <= 1.0 || w == 0 || h == 0 {
        return frame.clone();
    }

    let cw = ((w as f32 / zoom) as u32).max(1);
    let ch = ((h as f32 / zoom) as u32).max(1);
    let x = (w - cw) / 2;
    let y = (h - ch) / 2;

    let crop = imageops::crop_imm(frame, x, y, cw, ch).to_image();
    imageops::resize(&crop, w, h, FilterType::Triangle)
}

/// Copy of `frame` with a box drawn around every region.
pub fn draw_regions(frame: &RgbImage, regions: &[DetectedRegion]) -> RgbImage {
    let mut canvas = frame.clone();
    for region in regions {
        let Some((x, y, w, h)) = region.bbox.clamp_to(frame.width(), frame.height()) else {
            continue;
        };
        for inset in 0..BOX_THICKNESS {
            if w <= 2 * inset || h <= 2 * inset {
                break;
            }
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32)
                .of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        }
    }
    canvas
}

/// `[1, 3, size, size]` tensor scaled to `[0, 1]`, frame stretched to a square.
pub fn to_nchw(frame: &RgbImage, size: u32) -> NdTensor<f32, 4> {
    let resized = resize_exact(frame, size, size);
    let s = size as usize;
    let mut data = vec![0.0f32; 3 * s * s];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = y as usize * s + x as usize;
        for c in 0..3 {
            data[c * s * s + offset] = pixel[c] as f32 / 255.0;
        }
    }
    NdTensor::from_data([1, 3, s, s], data)
}

/// `[1, height, width, 3]` tensor scaled to `[0, 1]`.
pub fn to_nhwc(img: &RgbImage) -> NdTensor<f32, 4> {
    let (w, h) = img.dimensions();
    let data: Vec<f32> = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
    NdTensor::from_data([1, h as usize, w as usize, 3], data)
}
