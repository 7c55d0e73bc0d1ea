use crate::{
    annotator::Annotator,
    config::Config,
    models::{Detector, OrtDetector, OrtSpeciesClassifier},
    pipeline::Pipeline,
    prediction_log::PredictionLog,
    server::HttpServer,
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

/// Loads every model once and wires them into a single pipeline.
pub fn build_pipeline(config: &Config) -> Result<Pipeline, Box<dyn Error>> {
    let classifier = OrtSpeciesClassifier::new(&config.classifier)?;
    tracing::info!("Loaded species classifier from {:?}", config.classifier.get_path());

    let detectors = config.species.try_map(|species, _| {
        let path = config.detector_path(species);
        let detector = OrtDetector::new(&path, &config.detector)?;
        tracing::info!("Loaded {} detector from {:?}", species, path);
        Ok::<Arc<dyn Detector>, crate::models::ModelError>(Arc::new(detector))
    })?;

    let annotator = Annotator::new(&config.annotation)?;
    let prediction_log = PredictionLog::new(&config.prediction_log)?;

    Ok(Pipeline::new(
        Arc::new(classifier),
        detectors,
        config.profiles(),
        annotator,
        prediction_log,
    ))
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let pipeline = match build_pipeline(&config) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            tracing::error!("Failed to initialize prediction pipeline: {:?}", e);
            return Err(e);
        }
    };
    let metrics = Arc::new(Metrics::new()?);

    let server = HttpServer::new(pipeline, metrics, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server_handle.await {
        tracing::error!("Server stopped with error: {:?}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
