use super::{session_pool::SessionPool, ModelError, SpeciesClassifier};
use crate::{
    config::ClassifierConfig,
    species::{ClassificationResult, Species, SpeciesLabel},
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Ix4};
use ort::value::TensorRef;
use std::sync::Arc;

pub struct OrtSpeciesClassifier {
    pool: Arc<SessionPool>,
    output_name: String,
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    threshold: f32,
}

impl OrtSpeciesClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ModelError> {
        let pool = SessionPool::from_file(&config.get_path(), config.num_instances)?;
        Ok(Self {
            pool: Arc::new(pool),
            output_name: config.output_name.clone(),
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
            threshold: config.threshold,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    fn preprocess(&self, image: &RgbImage) -> Array<f32, Ix4> {
        to_normalized_tensor(image, self.input_size, self.mean, self.std)
    }

    async fn run_inference(&self, input: Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
        let pool = Arc::clone(&self.pool);
        let output_name = self.output_name.clone();
        tokio::task::spawn_blocking(move || {
            pool.run(|session| {
                let tensor = TensorRef::from_array_view(input.view())?;
                let outputs = session.run(ort::inputs![tensor])?;
                let (_, logits) = outputs[output_name.as_str()].try_extract_tensor::<f32>()?;
                Ok(logits.to_vec())
            })
        })
        .await?
    }
}

/// Resizes to `size`x`size`, scales to [0, 1] and normalizes each channel.
fn to_normalized_tensor(
    image: &RgbImage,
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> Array<f32, Ix4> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

    let side = size as usize;
    let mut input = Array::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y, x]] = (value - mean[channel]) / std[channel];
        }
    }
    input
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Picks the most probable class; anything below `threshold` is reported as unknown
/// with its confidence preserved.
pub fn decide_species(
    probabilities: &[f32],
    threshold: f32,
) -> Result<ClassificationResult, ModelError> {
    if !probabilities.is_empty() && probabilities.len() != Species::ALL.len() {
        return Err(ModelError::Output(format!(
            "classifier returned {} classes, expected {}",
            probabilities.len(),
            Species::ALL.len()
        )));
    }

    let (index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, current| if current.1 > best.1 { current } else { best })
        .ok_or_else(|| ModelError::Output("classifier returned no logits".into()))?;

    let species = Species::from_class_index(index)
        .ok_or_else(|| ModelError::Output(format!("unexpected class index {}", index)))?;

    let label = if confidence < threshold {
        SpeciesLabel::Unknown
    } else {
        SpeciesLabel::Known(species)
    };

    Ok(ClassificationResult { label, confidence })
}

#[async_trait]
impl SpeciesClassifier for OrtSpeciesClassifier {
    async fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, ModelError> {
        let input = self.preprocess(image);
        let logits = self.run_inference(input).await?;
        let probabilities = softmax(&logits);
        let result = decide_species(&probabilities, self.threshold)?;

        tracing::debug!(
            "Classified image as {:?} with confidence {:.3}",
            result.label,
            result.confidence
        );
        Ok(result)
    }
}
