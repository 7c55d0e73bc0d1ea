use crate::{
    annotator::{AnnotateError, Annotator},
    detection::DetectionInstance,
    imaging::{decode_rgb, ImageDecodeError},
    models::{Detector, ModelError, SpeciesClassifier},
    prediction_log::{PredictionLog, PredictionLogError, PredictionRecord},
    response::{PredictionResponse, RejectionReason},
    species::{PerSpecies, Species, SpeciesProfile},
    validation::validate_instances,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Image decoding failed: {0}")]
    Decode(#[from] ImageDecodeError),
    #[error("Model inference failed: {0}")]
    Model(#[from] ModelError),
    #[error("Annotation failed: {0}")]
    Annotate(#[from] AnnotateError),
    #[error("Prediction logging failed: {0}")]
    Log(#[from] PredictionLogError),
    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub response: PredictionResponse,
    pub rejection: Option<RejectionReason>,
}

/// Decode, classify, detect, validate, annotate and log one uploaded image.
/// Every entry point goes through [`Pipeline::run`].
pub struct Pipeline {
    classifier: Arc<dyn SpeciesClassifier>,
    detectors: PerSpecies<Arc<dyn Detector>>,
    profiles: PerSpecies<SpeciesProfile>,
    annotator: Arc<Annotator>,
    prediction_log: Arc<PredictionLog>,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn SpeciesClassifier>,
        detectors: PerSpecies<Arc<dyn Detector>>,
        profiles: PerSpecies<SpeciesProfile>,
        annotator: Annotator,
        prediction_log: PredictionLog,
    ) -> Self {
        Self {
            classifier,
            detectors,
            profiles,
            annotator: Arc::new(annotator),
            prediction_log: Arc::new(prediction_log),
        }
    }

    pub fn species(&self) -> Vec<Species> {
        self.detectors.iter().map(|(species, _)| species).collect()
    }

    #[instrument(skip(self, image_data), fields(bytes = image_data.len()))]
    pub async fn run(&self, image_data: &[u8]) -> Result<PipelineOutcome, PipelineError> {
        let owned_data = image_data.to_vec();
        let image = tokio::task::spawn_blocking(move || decode_rgb(&owned_data)).await??;

        let classification = self.classifier.classify(&image).await?;
        let confidence = classification.confidence;
        let Some(species) = classification.species() else {
            tracing::info!("Rejected image with species confidence {:.3}", confidence);
            return self
                .finish(
                    PredictionResponse::rejected(RejectionReason::LowConfidence, Some(confidence)),
                    Some(RejectionReason::LowConfidence),
                    None,
                    confidence,
                )
                .await;
        };

        let profile = self.profiles.get(species);
        let detections = self.detectors.get(species).detect(&image).await?;
        let instances: Vec<DetectionInstance> = detections
            .iter()
            .map(|raw| DetectionInstance::from_raw(raw, profile))
            .collect();

        if let Err(reason) = validate_instances(profile, &instances) {
            tracing::info!(
                "Rejected {} image with {} instances: {}",
                species,
                instances.len(),
                reason.message()
            );
            return self
                .finish(
                    PredictionResponse::rejected(reason, None),
                    Some(reason),
                    Some(species),
                    confidence,
                )
                .await;
        }

        let annotator = Arc::clone(&self.annotator);
        let to_draw = instances.clone();
        let annotated_path =
            tokio::task::spawn_blocking(move || annotator.save(&image, species, &to_draw))
                .await??;
        let response = PredictionResponse::accepted(
            species,
            confidence,
            &instances,
            annotated_path.display().to_string(),
        );
        tracing::info!("Accepted {} image with {} instances", species, instances.len());

        self.finish(response, None, Some(species), confidence).await
    }

    async fn finish(
        &self,
        response: PredictionResponse,
        rejection: Option<RejectionReason>,
        species: Option<Species>,
        confidence: f32,
    ) -> Result<PipelineOutcome, PipelineError> {
        let record = PredictionRecord::from_response(&response, species, confidence);
        let prediction_log = Arc::clone(&self.prediction_log);
        let logged = response.clone();
        tokio::task::spawn_blocking(move || prediction_log.append(&logged, &record)).await??;
        Ok(PipelineOutcome {
            response,
            rejection,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::AnnotationConfig,
        detection::RawDetection,
        imaging::encode_png,
        prediction_log::LogEntry,
        response::{DetectionEntry, PredictionStatus},
        species::{ClassificationResult, SpeciesLabel},
    };
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::{fs, path::Path};

    pub(crate) struct MockClassifier {
        pub result: ClassificationResult,
    }

    #[async_trait]
    impl SpeciesClassifier for MockClassifier {
        async fn classify(&self, _image: &RgbImage) -> Result<ClassificationResult, ModelError> {
            Ok(self.result)
        }
    }

    pub(crate) struct MockDetector {
        pub detections: Vec<RawDetection>,
    }

    #[async_trait]
    impl Detector for MockDetector {
        async fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
            Ok(self.detections.clone())
        }
    }

    struct PanickingDetector;

    #[async_trait]
    impl Detector for PanickingDetector {
        async fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
            panic!("detector for the other species must not be called");
        }
    }

    pub(crate) fn profiles() -> PerSpecies<SpeciesProfile> {
        PerSpecies {
            canino: SpeciesProfile::new(
                vec!["figado_cao".into(), "processo_papilar_canino".into(), "vesicula".into()],
                vec!["figado_cao".to_string(), "processo_papilar_canino".to_string()],
            ),
            felino: SpeciesProfile::new(
                vec!["figado_felino".into(), "processo_papilar_felino".into()],
                vec!["figado_felino".to_string(), "processo_papilar_felino".to_string()],
            ),
        }
    }

    pub(crate) fn build_pipeline(
        workdir: &Path,
        classification: ClassificationResult,
        canine_detections: Vec<RawDetection>,
    ) -> Pipeline {
        let annotator = Annotator::new(&AnnotationConfig {
            output_dir: workdir.join("outputs"),
            font_file: None,
            jpeg_quality: 90,
        })
        .unwrap();
        let prediction_log = PredictionLog::in_dir(&workdir.join("logs")).unwrap();

        Pipeline::new(
            Arc::new(MockClassifier {
                result: classification,
            }),
            PerSpecies {
                canino: Arc::new(MockDetector {
                    detections: canine_detections,
                }),
                felino: Arc::new(PanickingDetector),
            },
            profiles(),
            annotator,
            prediction_log,
        )
    }

    pub(crate) fn canine(confidence: f32) -> ClassificationResult {
        ClassificationResult {
            label: SpeciesLabel::Known(Species::Canine),
            confidence,
        }
    }

    pub(crate) fn synthetic_image() -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(100, 100, Rgb([120, 60, 60])))
    }

    fn log_lines(workdir: &Path) -> (Vec<String>, Vec<csv::StringRecord>) {
        let jsonl = fs::read_to_string(workdir.join("logs/predictions.jsonl")).unwrap_or_default();
        let jsonl = jsonl.lines().map(String::from).collect();
        let rows = csv::Reader::from_path(workdir.join("logs/predictions.csv"))
            .map(|mut reader| reader.records().map(|r| r.unwrap()).collect())
            .unwrap_or_default();
        (jsonl, rows)
    }

    #[tokio::test]
    async fn test_accepted_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(
            dir.path(),
            canine(0.9),
            vec![RawDetection {
                class_id: 0,
                score: 0.8,
                bbox: [10., 10., 50., 50.],
            }],
        );

        let outcome = pipeline.run(&synthetic_image()).await.unwrap();

        assert!(outcome.rejection.is_none());
        let PredictionResponse::Accepted {
            especie,
            confidence_especie,
            num_instancias,
            deteccoes,
            imagem_anotada,
        } = outcome.response
        else {
            panic!("expected an accepted response");
        };
        assert_eq!(especie, Species::Canine);
        assert_eq!(confidence_especie, 0.9);
        assert_eq!(num_instancias, deteccoes.len());
        assert_eq!(
            deteccoes,
            vec![DetectionEntry {
                classe: "figado_cao".into(),
                score: 0.8,
                bbox: [10, 10, 50, 50],
            }]
        );
        assert!(Path::new(&imagem_anotada).exists());
        assert!(Path::new(&imagem_anotada).starts_with(dir.path().join("outputs/canino")));

        let (jsonl, rows) = log_lines(dir.path());
        assert_eq!(jsonl.len(), 1);
        assert_eq!(rows.len(), 1);
        let entry: LogEntry = serde_json::from_str(&jsonl[0]).unwrap();
        assert_eq!(entry.response.status(), PredictionStatus::Ok);
        match entry.response {
            PredictionResponse::Accepted {
                especie, deteccoes, ..
            } => {
                assert_eq!(especie, Species::Canine);
                assert_eq!(deteccoes.len(), 1);
                assert_eq!(deteccoes[0].classe, "figado_cao");
                assert_eq!(deteccoes[0].bbox, [10, 10, 50, 50]);
            }
            other => panic!("unexpected log entry {:?}", other),
        }
        assert_eq!(&rows[0][1], "ok");
        assert_eq!(&rows[0][2], "canino");
    }

    #[tokio::test]
    async fn test_low_confidence_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let classification = ClassificationResult {
            label: SpeciesLabel::Unknown,
            confidence: 0.55,
        };
        let pipeline = build_pipeline(dir.path(), classification, vec![]);

        let outcome = pipeline.run(&synthetic_image()).await.unwrap();

        assert_eq!(outcome.rejection, Some(RejectionReason::LowConfidence));
        match outcome.response {
            PredictionResponse::Rejected { motivo, confidence } => {
                assert_eq!(motivo, "Imagem não parece ser fígado de cão ou gato");
                assert!(confidence.unwrap() < 0.7);
            }
            other => panic!("unexpected response {:?}", other),
        }

        let (jsonl, rows) = log_lines(dir.path());
        assert_eq!(jsonl.len(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "rejeitado");
    }

    #[tokio::test]
    async fn test_no_instances_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(dir.path(), canine(0.95), vec![]);

        let outcome = pipeline.run(&synthetic_image()).await.unwrap();

        assert_eq!(
            outcome.response,
            PredictionResponse::Rejected {
                motivo: "Nenhuma estrutura hepática detectada".into(),
                confidence: None,
            }
        );
        assert!(!dir.path().join("outputs/canino").exists());
    }

    #[tokio::test]
    async fn test_disjoint_classes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let detections = (0..3)
            .map(|i| RawDetection {
                class_id: 2,
                score: 0.9 - i as f32 * 0.1,
                bbox: [0., 0., 20., 20.],
            })
            .collect();
        let pipeline = build_pipeline(dir.path(), canine(0.95), detections);

        let outcome = pipeline.run(&synthetic_image()).await.unwrap();

        assert_eq!(outcome.rejection, Some(RejectionReason::NoLiverClass));
        assert_eq!(
            outcome.response,
            PredictionResponse::Rejected {
                motivo: "Imagem não contém fígado".into(),
                confidence: None,
            }
        );

        let (jsonl, rows) = log_lines(dir.path());
        let entry: LogEntry = serde_json::from_str(&jsonl[0]).unwrap();
        assert_eq!(entry.response, outcome.response);
        assert_eq!(&rows[0][2], "canino");
    }

    #[tokio::test]
    async fn test_every_request_appends_one_log_entry() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(
            dir.path(),
            canine(0.9),
            vec![RawDetection {
                class_id: 1,
                score: 0.7,
                bbox: [5., 5., 30., 40.],
            }],
        );

        for expected in 1..=3 {
            pipeline.run(&synthetic_image()).await.unwrap();
            let (jsonl, rows) = log_lines(dir.path());
            assert_eq!(jsonl.len(), expected);
            assert_eq!(rows.len(), expected);
        }
    }

    #[tokio::test]
    async fn test_undecodable_upload_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(dir.path(), canine(0.9), vec![]);

        let result = pipeline.run(b"definitely not an image").await;

        assert!(matches!(result, Err(PipelineError::Decode(_))));
        let (jsonl, _) = log_lines(dir.path());
        assert!(jsonl.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_on_spawned_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(build_pipeline(
            dir.path(),
            canine(0.9),
            vec![RawDetection {
                class_id: 0,
                score: 0.8,
                bbox: [10., 10., 50., 50.],
            }],
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { pipeline.run(&synthetic_image()).await })
            })
            .collect();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.rejection.is_none());
        }

        let (jsonl, rows) = log_lines(dir.path());
        assert_eq!(jsonl.len(), 8);
        assert_eq!(rows.len(), 8);
        let saved = fs::read_dir(dir.path().join("outputs/canino")).unwrap().count();
        assert_eq!(saved, 8);
    }

    #[test]
    fn test_species_lists_configured_detectors() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(dir.path(), canine(0.9), vec![]);
        assert_eq!(pipeline.species(), vec![Species::Canine, Species::Feline]);
    }
}
