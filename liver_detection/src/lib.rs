mod routes;

pub mod annotator;
pub mod app;
pub mod config;
pub mod detection;
pub mod imaging;
pub mod models;
pub mod pipeline;
pub mod prediction_log;
pub mod response;
pub mod server;
pub mod species;
pub mod telemetry;
pub mod validation;

pub use app::start_app;
