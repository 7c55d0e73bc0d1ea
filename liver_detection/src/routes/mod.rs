mod health;
mod metrics;
mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use health::{healthcheck, models};
use metrics::metrics_handler;
use predict::{predict, predict_auto};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(models))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/predict", post(predict))
        .route("/detectron/predict_auto", post(predict_auto))
}
