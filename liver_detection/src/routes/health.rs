use crate::{server::SharedState, species::Species};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

#[derive(Serialize, Deserialize)]
pub struct ModelsStatus {
    status: String,
    models: Vec<Species>,
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
    })
}

pub async fn models(State(state): State<SharedState>) -> impl IntoResponse {
    Json(ModelsStatus {
        status: "ok".into(),
        models: state.pipeline.species(),
    })
}
