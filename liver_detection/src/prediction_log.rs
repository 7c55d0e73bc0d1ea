use crate::{
    config::PredictionLogConfig,
    response::{PredictionResponse, PredictionStatus},
    species::Species,
};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const JSONL_FILE: &str = "predictions.jsonl";
pub const CSV_FILE: &str = "predictions.csv";

#[derive(Error, Debug)]
pub enum PredictionLogError {
    #[error("Prediction log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize JSON record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to write CSV record: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: DateTime<Local>,
    pub status: PredictionStatus,
    pub especie: Option<Species>,
    pub confidence_especie: Option<f32>,
    pub num_instancias: Option<usize>,
    pub motivo: Option<String>,
    pub imagem_anotada: Option<String>,
}

impl PredictionRecord {
    /// Summarizes a response. `confidence` is the classifier's confidence for the request.
    pub fn from_response(
        response: &PredictionResponse,
        species: Option<Species>,
        confidence: f32,
    ) -> Self {
        let timestamp = Local::now();
        match response {
            PredictionResponse::Accepted {
                especie,
                confidence_especie,
                num_instancias,
                imagem_anotada,
                ..
            } => Self {
                timestamp,
                status: PredictionStatus::Ok,
                especie: Some(*especie),
                confidence_especie: Some(*confidence_especie),
                num_instancias: Some(*num_instancias),
                motivo: None,
                imagem_anotada: Some(imagem_anotada.clone()),
            },
            PredictionResponse::Rejected { motivo, .. } => Self {
                timestamp,
                status: PredictionStatus::Rejected,
                especie: species,
                confidence_especie: Some(crate::response::round3(confidence)),
                num_instancias: None,
                motivo: Some(motivo.clone()),
                imagem_anotada: None,
            },
        }
    }
}

/// One JSON line: the full response body, detections included, stamped with its time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub response: PredictionResponse,
}

/// Append-only JSON-lines log plus a CSV summary. Appends are serialized so
/// concurrent requests never interleave partial lines.
pub struct PredictionLog {
    jsonl_path: PathBuf,
    csv_path: PathBuf,
    lock: Mutex<()>,
}

impl PredictionLog {
    pub fn new(config: &PredictionLogConfig) -> Result<Self, PredictionLogError> {
        Self::in_dir(&config.log_dir)
    }

    pub fn in_dir(log_dir: &Path) -> Result<Self, PredictionLogError> {
        fs::create_dir_all(log_dir)?;
        Ok(Self {
            jsonl_path: log_dir.join(JSONL_FILE),
            csv_path: log_dir.join(CSV_FILE),
            lock: Mutex::new(()),
        })
    }

    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Writes `response` to the JSON-lines log and `record` to the CSV summary.
    pub fn append(
        &self,
        response: &PredictionResponse,
        record: &PredictionRecord,
    ) -> Result<(), PredictionLogError> {
        let entry = LogEntry {
            timestamp: record.timestamp,
            response: response.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock();

        let mut jsonl = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.jsonl_path)?;
        jsonl.write_all(&line)?;

        let csv_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)?;
        let write_header = csv_file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(csv_file);
        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }
}
