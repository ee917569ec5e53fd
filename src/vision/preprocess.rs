//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, cropping and tensor conversion for
//! the PaddleOCR detection and recognition models.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use ndarray::Array4;

use crate::vision::geometry::Extents;
use crate::vision::Point;

/// ImageNet statistics used by the detection model [R, G, B]
pub const DETECTION_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DETECTION_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Recognition maps [0, 255] to [-1, 1]
pub const RECOGNITION_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const RECOGNITION_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Input side lengths must be multiples of this
const DETECTION_STRIDE: u32 = 32;

/// Crops at least this much taller than wide are treated as vertical text
const VERTICAL_RATIO: f32 = 1.5;

/// Detection tensor plus the factors mapping it back to the source image
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    /// Resized width over source width
    pub ratio_w: f32,
    /// Resized height over source height
    pub ratio_h: f32,
    pub source_width: u32,
    pub source_height: u32,
}

/// Detection input size: long side limited to `target_size`, both sides
/// rounded to a multiple of 32 and never below 32
pub fn detection_size(width: u32, height: u32, target_size: u32) -> (u32, u32) {
    let long_side = width.max(height).max(1) as f32;
    let ratio = if long_side > target_size as f32 {
        target_size as f32 / long_side
    } else {
        1.0
    };

    let round = |side: u32| {
        let scaled = (side as f32 * ratio / DETECTION_STRIDE as f32).round() as u32;
        scaled.max(1) * DETECTION_STRIDE
    };
    (round(width), round(height))
}

/// Convert an RGB image to a normalized NCHW tensor (batch size 1)
pub fn to_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        let value = image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - mean[c]) / std[c]
    })
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &RgbImage, target_size: u32) -> DetectionInput {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = detection_size(width, height, target_size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    DetectionInput {
        tensor: to_nchw(&resized, &DETECTION_MEAN, &DETECTION_STD),
        ratio_w: new_w as f32 / width.max(1) as f32,
        ratio_h: new_h as f32 / height.max(1) as f32,
        source_width: width,
        source_height: height,
    }
}

/// Recognition input width for a crop scaled to `target_height`
pub fn recognition_width(width: u32, height: u32, target_height: u32, max_width: u32) -> u32 {
    if height == 0 {
        return 1;
    }
    let scaled = (target_height as f32 * width as f32 / height as f32).ceil() as u32;
    scaled.clamp(1, max_width.max(1))
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(
    crop: &RgbImage,
    target_height: u32,
    max_width: u32,
) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let new_w = recognition_width(w, h, target_height, max_width);
    let resized = imageops::resize(crop, new_w, target_height, FilterType::Triangle);
    to_nchw(&resized, &RECOGNITION_MEAN, &RECOGNITION_STD)
}

/// Cut a detected quadrilateral out of the image as an upright rectangle.
///
/// Corners are expected in TL, TR, BR, BL order. The quad is warped to a
/// rectangle sized by its longer opposite sides, so tilted text reaches the
/// recognizer straightened. Vertical crops are turned a quarter
/// counterclockwise so the text runs left to right. Returns `None` when the
/// quad misses the image.
pub fn crop_region(image: &RgbImage, corners: &[Point; 4]) -> Option<RgbImage> {
    let bounds = Extents::of(corners);
    let (img_w, img_h) = image.dimensions();

    if bounds.max_x <= 0.0
        || bounds.max_y <= 0.0
        || bounds.min_x >= img_w as f32
        || bounds.min_y >= img_h as f32
    {
        return None;
    }

    let [tl, tr, br, bl] = *corners;
    let width = distance(tl, tr).max(distance(bl, br)).round() as u32;
    let height = distance(tl, bl).max(distance(tr, br)).round() as u32;
    if width == 0 || height == 0 {
        return None;
    }

    let crop = rectify(image, corners, width, height)?;
    if height as f32 >= width as f32 * VERTICAL_RATIO {
        Some(imageops::rotate270(&crop))
    } else {
        Some(crop)
    }
}

fn distance(a: Point, b: Point) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Perspective-warp `corners` onto a `width` x `height` canvas
fn rectify(image: &RgbImage, corners: &[Point; 4], width: u32, height: u32) -> Option<RgbImage> {
    let (w, h) = (width as f32, height as f32);
    let from = corners.map(|p| (p.x, p.y));
    let to = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

    let projection = Projection::from_control_points(from, to)?;
    let mut out = RgbImage::new(width, height);
    warp_into(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    Some(out)
}
