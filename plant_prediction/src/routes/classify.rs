use crate::{
    error::ClassifyError, labels::ClassLabels, model_service::ModelService, preprocess,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "imagefile";

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Prediction {
    pub result: String,
}

#[instrument(skip_all)]
pub async fn classify_image<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ClassifyError> {
    let image_data = match multipart {
        Ok(multipart) => read_image_field(multipart).await?,
        Err(rejection) => {
            tracing::debug!("Request is not a usable multipart form: {}", rejection);
            None
        }
    }
    .ok_or(ClassifyError::MissingImage)?;

    let label = classify_bytes(state.model_service.as_ref(), &state.labels, &image_data).await?;
    Ok(Json(Prediction { result: label }))
}

/// Returns the first file part named `imagefile`, or `None` when the form has no such part.
/// Plain text fields with that name do not count as an upload.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<Bytes>, ClassifyError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() == Some(IMAGE_FIELD) && field.file_name().is_some() {
            let bytes = field.bytes().await.map_err(upload_error)?;
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

fn upload_error(err: MultipartError) -> ClassifyError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ClassifyError::PayloadTooLarge(err.body_text())
    } else {
        ClassifyError::Upload(err.body_text())
    }
}

/// Decode, preprocess, infer and map the index back to a label.
pub async fn classify_bytes<M: ModelService>(
    model_service: &M,
    labels: &ClassLabels,
    image_data: &[u8],
) -> Result<String, ClassifyError> {
    let input = preprocess::transform_image(image_data)?;
    let index = model_service.predict(input).await?;

    let label = labels.get(index).ok_or(ClassifyError::UnknownClass {
        index,
        num_classes: labels.len(),
    })?;
    tracing::debug!(index, label, "Predicted class");

    Ok(label.to_string())
}
