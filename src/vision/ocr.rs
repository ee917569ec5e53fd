//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime for text detection and recognition.

use anyhow::{Context, Result};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::layout::LayoutParams;
use crate::vision::engine::RecognitionEngine;
use crate::vision::models::{ModelAssets, OnnxSession};
use crate::vision::{postprocess, preprocess, TextRegion};

/// Sessions and dictionary for one loaded language
struct LoadedModels {
    detection: OnnxSession,
    recognition: OnnxSession,
    dictionary: Vec<String>,
}

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct PaddleOcrEngine {
    settings: EngineSettings,
    layout: LayoutParams,
    models: Option<LoadedModels>,
}

impl PaddleOcrEngine {
    pub fn new(settings: EngineSettings, layout: LayoutParams) -> Self {
        Self {
            settings,
            layout,
            models: None,
        }
    }

    /// Run detection and return boxes in source image coordinates
    fn detect(models: &mut LoadedModels, settings: &EngineSettings, image: &RgbImage) -> Result<Vec<postprocess::DetectedBox>> {
        let input = preprocess::preprocess_for_detection(image, settings.detection_target_size);
        let (ratio_w, ratio_h) = (input.ratio_w, input.ratio_h);
        let (source_width, source_height) = (input.source_width, input.source_height);

        let (dims, prob) = models
            .detection
            .run(input.tensor)
            .context("Text detection failed")?;

        // [1, 1, H, W]
        if dims.len() != 4 {
            anyhow::bail!("Unexpected detection output shape: {:?}", dims);
        }
        let (map_h, map_w) = (dims[2], dims[3]);

        let boxes = postprocess::extract_boxes(&prob, map_w, map_h, &settings.db_params())
            .into_iter()
            .map(|detected| postprocess::DetectedBox {
                corners: postprocess::scale_to_source(
                    &detected.corners,
                    ratio_w,
                    ratio_h,
                    source_width,
                    source_height,
                ),
                score: detected.score,
            })
            .collect();

        Ok(boxes)
    }

    /// Recognize the text inside one crop
    fn read_crop(models: &mut LoadedModels, settings: &EngineSettings, crop: &RgbImage) -> Result<(String, f32)> {
        let tensor = preprocess::preprocess_for_recognition(
            crop,
            settings.recognition_height,
            settings.recognition_max_width,
        );

        let (dims, probs) = models
            .recognition
            .run(tensor)
            .context("Text recognition failed")?;

        // [1, T, C]
        let (steps, classes) = match dims.as_slice() {
            [1, steps, classes] => (*steps, *classes),
            [steps, classes] => (*steps, *classes),
            _ => anyhow::bail!("Unexpected recognition output shape: {:?}", dims),
        };

        Ok(postprocess::ctc_decode(&probs, steps, classes, &models.dictionary))
    }
}

/// Crop and read every detected box.
///
/// Boxes that cannot be cropped, read to nothing, or fail to read are
/// skipped; the rest of the page is kept.
fn read_boxes<F>(image: &RgbImage, boxes: Vec<postprocess::DetectedBox>, mut read: F) -> Vec<TextRegion>
where
    F: FnMut(&RgbImage) -> Result<(String, f32)>,
{
    let mut regions = Vec::with_capacity(boxes.len());
    for detected in boxes {
        let Some(crop) = preprocess::crop_region(image, &detected.corners) else {
            continue;
        };

        let (text, confidence) = match read(&crop) {
            Ok(read) => read,
            Err(e) => {
                warn!("Skipping text box at {:?}: {:#}", detected.corners[0], e);
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }
        regions.push(TextRegion::new(text, detected.corners, confidence));
    }
    regions
}

impl RecognitionEngine for PaddleOcrEngine {
    fn load(&mut self, assets: &ModelAssets, use_acceleration: bool) -> Result<()> {
        self.models = None;

        let dictionary = postprocess::load_dictionary(&assets.dictionary)?;
        let detection = OnnxSession::new(&assets.detection, use_acceleration)?;
        let recognition = OnnxSession::new(&assets.recognition, use_acceleration)?;

        info!("Loaded dictionary with {} entries", dictionary.len());
        self.models = Some(LoadedModels {
            detection,
            recognition,
            dictionary,
        });
        Ok(())
    }

    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<TextRegion>> {
        let models = self
            .models
            .as_mut()
            .context("OCR models are not loaded")?;

        let start = Instant::now();
        let boxes = Self::detect(models, &self.settings, image)?;
        debug!("Detected {} text boxes in {:?}", boxes.len(), start.elapsed());

        let settings = &self.settings;
        let mut regions = read_boxes(image, boxes, |crop| Self::read_crop(models, settings, crop));

        if self.settings.merge_detached_periods {
            regions = postprocess::merge_detached_periods(regions, self.layout.line_threshold_factor);
        }

        debug!("Recognized {} regions in {:?}", regions.len(), start.elapsed());
        Ok(regions)
    }

    fn release(&mut self) {
        if self.models.take().is_some() {
            debug!("Dropped ONNX sessions");
        }
    }
}
