use clap::{Args, Parser, Subcommand, ValueEnum};
use liver_detection::species::Species;
use std::path::PathBuf;

/// Offline evaluation and single-image prediction for the liver detection models.
#[derive(Debug, Parser)]
#[command(name = "liver_eval", version)]
pub struct Cli {
    /// Directory holding base.yaml and the environment files.
    #[arg(long, default_value = "configuration", global = true)]
    pub config_dir: PathBuf,

    /// Configuration environment layered on top of base.yaml.
    #[arg(long, env = "APP_ENVIRONMENT", default_value = "local", global = true)]
    pub environment: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Score the species classifier on a folder-per-species dataset.
    Classifier(ClassifierArgs),
    /// Compute COCO-style average precision for one species detector.
    Detector(DetectorArgs),
    /// Run one species detector on a single image and save the annotated result.
    Predict(PredictArgs),
}

#[derive(Debug, Args)]
pub struct ClassifierArgs {
    /// Dataset root containing `canino/` and `felino/` image folders.
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long, default_value = "results/metrics_classifier.json")]
    pub output: PathBuf,

    /// Confidence threshold; predictions below it count as `desconhecido`.
    #[arg(long, default_value_t = 0.0)]
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetFormat {
    Coco,
    Labelme,
}

#[derive(Debug, Args)]
pub struct DetectorArgs {
    #[arg(long, value_parser = parse_species)]
    pub species: Species,

    /// Dataset split directory, e.g. `dataset_detectron/canino/val`.
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long, value_enum, default_value_t = DatasetFormat::Coco)]
    pub format: DatasetFormat,

    #[arg(long, default_value = "results/eval")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 0.05)]
    pub score_threshold: f32,
}

#[derive(Debug, Args)]
pub struct PredictArgs {
    #[arg(long, value_parser = parse_species)]
    pub species: Species,

    #[arg(long)]
    pub image: PathBuf,

    #[arg(long, default_value = "output/predicao.jpg")]
    pub output: PathBuf,
}

fn parse_species(s: &str) -> Result<Species, String> {
    s.parse()
}
