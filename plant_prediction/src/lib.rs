mod routes;
mod server;

pub mod artifact;
pub mod config;
pub mod error;
pub mod labels;
pub mod model_service;
pub mod ort_service;
pub mod preprocess;

pub use routes::{classify_bytes, Health, Prediction, IMAGE_FIELD};
pub use server::{build_router, start_server, HttpServer, SharedState};
