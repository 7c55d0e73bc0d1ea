mod classifier;
mod detector;
mod session_pool;

pub use classifier::{decide_species, softmax, OrtSpeciesClassifier};
pub use detector::{postprocess_detections, DetectorInput, OrtDetector};

use crate::{detection::RawDetection, species::ClassificationResult};
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("invalid tensor shape: {0}")]
    Shape(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("inference task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait SpeciesClassifier: Send + Sync + 'static {
    async fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, ModelError>;
}

#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError>;
}
