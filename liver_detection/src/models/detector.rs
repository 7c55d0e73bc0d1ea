use super::{session_pool::SessionPool, Detector, ModelError};
use crate::{
    config::{DetectorConfig, DetectorOutputNames},
    detection::RawDetection,
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Ix3};
use ort::value::TensorRef;
use std::{path::Path, sync::Arc};

/// Resized BGR tensor plus what is needed to map boxes back onto the original image.
#[derive(Debug)]
pub struct DetectorInput {
    pub tensor: Array<f32, Ix3>,
    pub original_width: u32,
    pub original_height: u32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl DetectorInput {
    /// Resizes so the shortest edge is `min_size` unless that pushes the longest
    /// edge past `max_size`, then lays the pixels out as CHW BGR in 0..255.
    pub fn prepare(image: &RgbImage, min_size: u32, max_size: u32) -> Self {
        let (width, height) = image.dimensions();
        let short = width.min(height).max(1) as f32;
        let long = width.max(height).max(1) as f32;

        let mut scale = min_size as f32 / short;
        if long * scale > max_size as f32 {
            scale = max_size as f32 / long;
        }
        let new_width = ((width as f32 * scale).round() as u32).max(1);
        let new_height = ((height as f32 * scale).round() as u32).max(1);

        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let mut tensor = Array::zeros((3, new_height as usize, new_width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            tensor[[0, y, x]] = b as f32;
            tensor[[1, y, x]] = g as f32;
            tensor[[2, y, x]] = r as f32;
        }

        Self {
            tensor,
            original_width: width,
            original_height: height,
            scale_x: width as f32 / new_width as f32,
            scale_y: height as f32 / new_height as f32,
        }
    }
}

pub struct OrtDetector {
    pool: Arc<SessionPool>,
    outputs: DetectorOutputNames,
    min_size: u32,
    max_size: u32,
    score_threshold: f32,
}

impl OrtDetector {
    pub fn new(model_path: &Path, config: &DetectorConfig) -> Result<Self, ModelError> {
        let pool = SessionPool::from_file(model_path, config.num_instances)?;
        Ok(Self {
            pool: Arc::new(pool),
            outputs: config.outputs.clone(),
            min_size: config.min_size,
            max_size: config.max_size,
            score_threshold: config.score_threshold,
        })
    }

    pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    async fn run_inference(&self, image: RgbImage) -> Result<Vec<RawDetection>, ModelError> {
        let pool = Arc::clone(&self.pool);
        let outputs = self.outputs.clone();
        let (min_size, max_size) = (self.min_size, self.max_size);
        let score_threshold = self.score_threshold;

        tokio::task::spawn_blocking(move || {
            let input = DetectorInput::prepare(&image, min_size, max_size);
            pool.run(|session| {
                let tensor = TensorRef::from_array_view(input.tensor.view())?;
                let session_outputs = session.run(ort::inputs![tensor])?;

                let (_, boxes) =
                    session_outputs[outputs.boxes.as_str()].try_extract_tensor::<f32>()?;
                let (_, classes) =
                    session_outputs[outputs.classes.as_str()].try_extract_tensor::<i64>()?;
                let (_, scores) =
                    session_outputs[outputs.scores.as_str()].try_extract_tensor::<f32>()?;

                postprocess_detections(boxes, classes, scores, &input, score_threshold)
            })
        })
        .await?
    }
}

/// Rescales boxes to the original image, clamps them inside it, drops anything
/// under `score_threshold` and returns the rest by descending score.
pub fn postprocess_detections(
    boxes: &[f32],
    classes: &[i64],
    scores: &[f32],
    input: &DetectorInput,
    score_threshold: f32,
) -> Result<Vec<RawDetection>, ModelError> {
    if boxes.len() != scores.len() * 4 || classes.len() != scores.len() {
        return Err(ModelError::Shape(format!(
            "expected 4 box values per score, got {} boxes, {} classes, {} scores",
            boxes.len(),
            classes.len(),
            scores.len()
        )));
    }

    let max_x = input.original_width as f32;
    let max_y = input.original_height as f32;

    let mut detections: Vec<RawDetection> = boxes
        .chunks_exact(4)
        .zip(classes.iter().zip(scores))
        .filter(|(_, (_, score))| **score >= score_threshold)
        .map(|(bbox, (class_id, score))| {
            let x1 = (bbox[0] * input.scale_x).clamp(0., max_x);
            let y1 = (bbox[1] * input.scale_y).clamp(0., max_y);
            let x2 = (bbox[2] * input.scale_x).clamp(0., max_x);
            let y2 = (bbox[3] * input.scale_y).clamp(0., max_y);
            RawDetection {
                class_id: *class_id,
                score: *score,
                bbox: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
            }
        })
        .collect();

    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(detections)
}

#[async_trait]
impl Detector for OrtDetector {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
        let detections = self.run_inference(image.clone()).await?;

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, score={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.score,
                detection.bbox[0],
                detection.bbox[1],
                detection.bbox[2],
                detection.bbox[3]
            );
        }

        Ok(detections)
    }
}
