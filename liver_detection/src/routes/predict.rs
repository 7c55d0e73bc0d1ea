use crate::{
    pipeline::PipelineError,
    response::{PredictionResponse, PredictionStatus},
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Invalid multipart upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Missing multipart field `file`")]
    MissingFile,
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match self {
            PredictError::Multipart(_) | PredictError::MissingFile => StatusCode::BAD_REQUEST,
            PredictError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Prediction failed: {}", self);
        }
        (status, format!("Something went wrong: {}", self)).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictError> {
    handle_upload(&state, "/predict", multipart).await
}

#[instrument(skip(state, multipart))]
pub async fn predict_auto(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictError> {
    handle_upload(&state, "/detectron/predict_auto", multipart).await
}

async fn handle_upload(
    state: &SharedState,
    route: &str,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictError> {
    state.metrics.record_request(route);

    let mut image_data = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            image_data = Some(field.bytes().await?);
            break;
        }
    }
    let image_data = image_data.ok_or(PredictError::MissingFile)?;

    let started = Instant::now();
    let outcome = state.pipeline.run(&image_data).await?;
    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, route);

    let reason = outcome.rejection.map(|r| r.as_str()).unwrap_or("none");
    let status: PredictionStatus = outcome.response.status();
    state.metrics.record_outcome(status.as_str(), reason);

    Ok(Json(outcome.response))
}

#[cfg(test)]
mod tests {
    use crate::{
        detection::RawDetection,
        pipeline::tests::{build_pipeline, canine, synthetic_image},
        server::{build_router, SharedState},
        telemetry::Metrics,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::{path::Path, sync::Arc};
    use tower::ServiceExt;

    const BOUNDARY: &str = "liver-boundary";

    fn router(workdir: &Path, detections: Vec<RawDetection>) -> Router {
        let pipeline = build_pipeline(workdir, canine(0.9), detections);
        build_router(SharedState {
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(Metrics::new().unwrap()),
        })
    }

    fn multipart_request(uri: &str, field: &str, payload: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"figado.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn liver_detection() -> Vec<RawDetection> {
        vec![RawDetection {
            class_id: 0,
            score: 0.8,
            bbox: [10., 10., 50., 50.],
        }]
    }

    #[tokio::test]
    async fn test_predict_accepts_liver_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), liver_detection());

        let response = app
            .oneshot(multipart_request("/predict", "file", &synthetic_image()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["especie"], "canino");
        assert_eq!(body["num_instancias"], 1);
        assert_eq!(
            body["deteccoes"],
            json!([{"classe": "figado_cao", "score": 0.8, "bbox": [10, 10, 50, 50]}])
        );
        assert!(body["imagem_anotada"].as_str().unwrap().ends_with(".jpg"));
    }

    #[tokio::test]
    async fn test_predict_auto_shares_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![]);

        let response = app
            .oneshot(multipart_request(
                "/detectron/predict_auto",
                "file",
                &synthetic_image(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body,
            json!({"status": "rejeitado", "motivo": "Nenhuma estrutura hepática detectada"})
        );
    }

    #[tokio::test]
    async fn test_missing_file_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), liver_detection());

        let response = app
            .oneshot(multipart_request("/predict", "image", &synthetic_image()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_undecodable_upload_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), liver_detection());

        let response = app
            .oneshot(multipart_request("/predict", "file", b"not an image"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_root_lists_models_and_metrics_count_requests() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), liver_detection());

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await,
            json!({"status": "ok", "models": ["canino", "felino"]})
        );

        app.clone()
            .oneshot(multipart_request("/predict", "file", &synthetic_image()))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("liver_detection_requests_total{route=\"/predict\"} 1"));
        assert!(text.contains("status=\"ok\""));
    }
}
