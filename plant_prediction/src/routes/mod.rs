mod classify;
mod health;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub use classify::{classify_bytes, classify_image, Prediction, IMAGE_FIELD};
pub use health::{healthcheck, Health};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", post(classify_image::<M>))
        .route("/health", get(healthcheck::<M>))
}
