use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub struct Metrics {
    request_counter: IntCounterVec,
    prediction_duration: HistogramVec,
    prediction_outcomes: IntCounterVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new_custom(Some("liver_detection".into()), None)?;

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &["route"],
        )?;

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));
        let prediction_duration = HistogramVec::new(
            HistogramOpts::new(
                "prediction_duration_ms",
                "Duration of prediction pipeline runs in milliseconds",
            )
            .buckets(boundaries),
            &["route"],
        )?;

        let prediction_outcomes = IntCounterVec::new(
            Opts::new("prediction_outcomes_total", "Pipeline outcomes by status and reason"),
            &["status", "reason"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(prediction_duration.clone()))?;
        registry.register(Box::new(prediction_outcomes.clone()))?;

        Ok(Metrics {
            request_counter,
            prediction_duration,
            prediction_outcomes,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.request_counter.with_label_values(&[route]).inc();
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        self.prediction_duration
            .with_label_values(&[route])
            .observe(duration_ms as f64);
    }

    pub fn record_outcome(&self, status: &str, reason: &str) {
        self.prediction_outcomes
            .with_label_values(&[status, reason])
            .inc();
    }

    pub fn render(&self) -> Result<String, TelemetryError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
