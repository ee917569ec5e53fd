//! Vision/OCR Layer
//!
//! Recognized text regions, the geometry over them, and the recognition
//! engine behind a lifecycle controller. The concrete engine runs PaddleOCR
//! detection and recognition models through ONNX Runtime.

pub mod engine;
pub mod geometry;
pub mod language;
pub mod models;
pub mod ocr;
pub mod postprocess;
pub mod preprocess;

use serde::{Deserialize, Serialize};

pub use engine::{EngineConfig, EngineController, EngineError, EngineState, RecognitionEngine};
pub use geometry::{Extents, Point, ScreenTransform};
pub use language::{LanguageConfig, OcrLanguage};
pub use models::{ModelAssets, ModelManager, ModelResolver};
pub use ocr::PaddleOcrEngine;

/// One recognized span of text.
///
/// Corners are image-space pixels in whatever winding the detector produced.
/// Equality is structural over text, corners and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    /// Recognized text content
    pub text: String,
    /// Quadrilateral corners
    pub corners: [Point; 4],
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TextRegion {
    pub fn new(text: impl Into<String>, corners: [Point; 4], confidence: f32) -> Self {
        Self {
            text: text.into(),
            corners,
            confidence,
        }
    }

    /// Build an axis-aligned region from its extents
    pub fn from_extents(
        text: impl Into<String>,
        min_x: f32,
        min_y: f32,
        max_x: f32,
        max_y: f32,
        confidence: f32,
    ) -> Self {
        Self::new(
            text,
            [
                Point::new(min_x, min_y),
                Point::new(max_x, min_y),
                Point::new(max_x, max_y),
                Point::new(min_x, max_y),
            ],
            confidence,
        )
    }

    /// Bounding extents, recomputed from the corners on every call
    pub fn extents(&self) -> Extents {
        geometry::extents(self)
    }
}
