use crate::{
    cli::{ClassifierArgs, DatasetFormat, DetectorArgs, PredictArgs},
    dataset::{self, GroundTruthImage},
    metrics::{ClassAp, ClassificationReport, DetectionReport, ScoredBox},
};
use anyhow::{anyhow, Context};
use image::RgbImage;
use liver_detection::{
    annotator::Annotator,
    config::{Config, Validatable},
    detection::DetectionInstance,
    models::{Detector, OrtDetector, OrtSpeciesClassifier, SpeciesClassifier},
    species::{Species, SpeciesLabel},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Label written for predictions under the classifier threshold.
const UNKNOWN_PREDICTION: &str = "desconhecido";

fn load_image(path: &Path) -> anyhow::Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("Failed to open image {:?}", path))?
        .to_rgb8())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {:?}", path))
}

fn image_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn load_detector(
    config: &Config,
    species: Species,
    score_threshold: f32,
) -> anyhow::Result<OrtDetector> {
    config.detector.validate().map_err(|e| anyhow!(e))?;
    let path = config.detector_path(species);
    Ok(OrtDetector::new(&path, &config.detector)
        .with_context(|| format!("Failed to load detector {:?}", path))?
        .with_score_threshold(score_threshold))
}

pub async fn evaluate_classifier(
    config: &Config,
    args: &ClassifierArgs,
) -> anyhow::Result<ClassificationReport> {
    config.classifier.validate().map_err(|e| anyhow!(e))?;
    let classifier = OrtSpeciesClassifier::new(&config.classifier)?.with_threshold(args.threshold);

    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    for species in Species::ALL {
        let dir = args.dataset.join(species.as_str());
        for path in image_files(&dir)? {
            let image = match load_image(&path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {:#}", path, e);
                    continue;
                }
            };
            let result = classifier.classify(&image).await?;
            let predicted = match result.label {
                SpeciesLabel::Known(s) => s.as_str(),
                SpeciesLabel::Unknown => UNKNOWN_PREDICTION,
            };
            tracing::debug!(?path, predicted, confidence = result.confidence);
            y_true.push(species.as_str());
            y_pred.push(predicted);
        }
    }

    if y_true.is_empty() {
        return Err(anyhow!("No images found under {:?}", args.dataset));
    }

    let labels: Vec<&str> = Species::ALL.iter().map(Species::as_str).collect();
    let report = ClassificationReport::new(&labels, &y_true, &y_pred);
    write_json(&args.output, &report)?;
    tracing::info!("Classification report saved to {:?}", args.output);

    Ok(report)
}

/// Runs `detector` over every image and groups predictions and ground truth per class.
pub async fn evaluate_detector<D: Detector + ?Sized>(
    detector: &D,
    class_names: &[String],
    species: Species,
    images: &[GroundTruthImage],
) -> anyhow::Result<DetectionReport> {
    let num_classes = class_names.len();
    let mut detections: Vec<Vec<ScoredBox>> = vec![Vec::new(); num_classes];
    let mut ground_truth: Vec<Vec<Vec<[f32; 4]>>> =
        vec![vec![Vec::new(); images.len()]; num_classes];

    for (image_index, sample) in images.iter().enumerate() {
        for gt in &sample.boxes {
            ground_truth[gt.class_id][image_index].push(gt.bbox);
        }

        let image = load_image(&sample.path)?;
        for raw in detector.detect(&image).await? {
            let Some(class_detections) = usize::try_from(raw.class_id)
                .ok()
                .and_then(|c| detections.get_mut(c))
            else {
                continue;
            };
            class_detections.push(ScoredBox {
                image_index,
                score: raw.score,
                bbox: raw.bbox,
            });
        }
    }

    let per_class: Vec<ClassAp> = class_names
        .iter()
        .enumerate()
        .filter_map(|(class_id, name)| {
            let evaluation =
                ClassAp::evaluate(name, &detections[class_id], &ground_truth[class_id]);
            if evaluation.is_none() {
                tracing::warn!("Class `{}` has no ground truth in this split", name);
            }
            evaluation
        })
        .collect();

    Ok(DetectionReport::new(species.as_str(), images.len(), per_class))
}

pub async fn run_detector_evaluation(
    config: &Config,
    args: &DetectorArgs,
) -> anyhow::Result<DetectionReport> {
    let species_config = config.species.get(args.species);
    species_config.validate().map_err(|e| anyhow!(e))?;
    let profile = species_config.profile();

    let images = match args.format {
        DatasetFormat::Coco => dataset::load_coco(&args.dataset, &profile)?,
        DatasetFormat::Labelme => dataset::load_labelme(&args.dataset, &profile)?,
    };
    if images.is_empty() {
        return Err(anyhow!("No annotated images found under {:?}", args.dataset));
    }
    tracing::info!("Evaluating {} on {} images", args.species, images.len());

    let detector = load_detector(config, args.species, args.score_threshold)?;
    let report = evaluate_detector(&detector, profile.class_names(), args.species, &images).await?;

    let output = args.output_dir.join(format!("metrics_{}.json", args.species));
    write_json(&output, &report)?;
    tracing::info!("Detection metrics saved to {:?}", output);

    Ok(report)
}

pub async fn predict(
    config: &Config,
    args: &PredictArgs,
) -> anyhow::Result<Vec<DetectionInstance>> {
    let profile = config.species.get(args.species).profile();
    let detector = load_detector(config, args.species, config.detector.score_threshold)?;
    let annotator = Annotator::new(&config.annotation)?;

    let mut image = load_image(&args.image)?;
    let instances: Vec<DetectionInstance> = detector
        .detect(&image)
        .await?
        .iter()
        .map(|raw| DetectionInstance::from_raw(raw, &profile))
        .collect();

    annotator.annotate(&mut image, &instances);
    if let Some(parent) = args.output.parent() {
        fs::create_dir_all(parent)?;
    }
    image
        .save(&args.output)
        .with_context(|| format!("Failed to save {:?}", args.output))?;
    tracing::info!("Annotated image saved to {:?}", args.output);

    Ok(instances)
}
