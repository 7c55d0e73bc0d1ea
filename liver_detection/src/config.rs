use crate::species::{PerSpecies, Species, SpeciesProfile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub classifier: ClassifierConfig,
    pub detector: DetectorConfig,
    pub species: PerSpecies<SpeciesConfig>,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub prediction_log: PredictionLogConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn detector_path(&self, species: Species) -> PathBuf {
        self.detector
            .model_dir
            .join(&self.species.get(species).onnx_file)
    }

    pub fn profiles(&self) -> PerSpecies<SpeciesProfile> {
        PerSpecies {
            canino: self.species.canino.profile(),
            felino: self.species.felino.profile(),
        }
    }
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), String> {
        self.classifier.validate()?;
        self.detector.validate()?;
        for (species, species_config) in self.species.iter() {
            species_config
                .validate()
                .map_err(|e| format!("species `{}`: {}", species, e))?;
            let path = self.detector_path(species);
            if !path.exists() {
                return Err(format!("Detector model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_classifier_output")]
    pub output_name: String,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_classifier_output() -> String {
    "logits".into()
}

fn default_threshold() -> f32 {
    0.7
}

fn default_input_size() -> u32 {
    224
}

fn default_mean() -> [f32; 3] {
    [0.485, 0.456, 0.406]
}

fn default_std() -> [f32; 3] {
    [0.229, 0.224, 0.225]
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

impl ClassifierConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

impl Validatable for ClassifierConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!(
                "Classifier model file not found: {:?}",
                self.get_path()
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "Classifier threshold must be within [0, 1], got {}",
                self.threshold
            ));
        }
        if self.input_size == 0 || self.num_instances == 0 {
            return Err("Classifier input_size and num_instances must be positive".into());
        }
        if self.std.iter().any(|s| *s <= 0.0) {
            return Err(format!("Classifier std must be positive, got {:?}", self.std));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    pub model_dir: PathBuf,
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default)]
    pub outputs: DetectorOutputNames,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorOutputNames {
    pub boxes: String,
    pub classes: String,
    pub scores: String,
}

impl Default for DetectorOutputNames {
    fn default() -> Self {
        Self {
            boxes: "boxes".into(),
            classes: "classes".into(),
            scores: "scores".into(),
        }
    }
}

fn default_min_size() -> u32 {
    800
}

fn default_max_size() -> u32 {
    1333
}

fn default_score_threshold() -> f32 {
    0.5
}

impl Validatable for DetectorConfig {
    fn validate(&self) -> Result<(), String> {
        if self.min_size == 0 || self.min_size > self.max_size {
            return Err(format!(
                "Detector sizes must satisfy 0 < min_size <= max_size, got {} and {}",
                self.min_size, self.max_size
            ));
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(format!(
                "Detector score_threshold must be within [0, 1], got {}",
                self.score_threshold
            ));
        }
        if self.num_instances == 0 {
            return Err("Detector num_instances must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeciesConfig {
    pub onnx_file: String,
    pub class_names: Vec<String>,
    pub liver_classes: Vec<String>,
}

impl SpeciesConfig {
    pub fn profile(&self) -> SpeciesProfile {
        SpeciesProfile::new(self.class_names.clone(), self.liver_classes.iter().cloned())
    }
}

impl Validatable for SpeciesConfig {
    fn validate(&self) -> Result<(), String> {
        if self.class_names.is_empty() {
            return Err("class_names must not be empty".into());
        }
        if self.liver_classes.is_empty() {
            return Err("liver_classes must not be empty".into());
        }
        let unknown: Vec<&str> = self
            .liver_classes
            .iter()
            .filter(|c| !self.class_names.contains(c))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(format!(
                "liver_classes {:?} are not listed in class_names {:?}",
                unknown, self.class_names
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnnotationConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub font_file: Option<PathBuf>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            font_file: None,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_jpeg_quality() -> u8 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionLogConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PredictionLogConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_validated_configuration(&base_path.join("configuration"), &environment)
}

/// Like [`load_configuration`], then rejects configurations that fail [`Validatable::validate`].
/// Runs before logging is installed, so failures are only reported through the error.
pub fn load_validated_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let config = load_configuration(configuration_directory, environment)?;
    config.validate().map_err(|e| {
        config::ConfigError::Message(format!("Configuration validation failed: {}", e))
    })?;
    Ok(config)
}

/// Layers `base.yaml`, the environment file and `LIVER_*` variables without validating paths.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("LIVER")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}
