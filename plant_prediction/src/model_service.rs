use crate::error::ClassifyError;
use async_trait::async_trait;
use ndarray::Array4;

/// Maps one preprocessed `[1, 3, H, W]` batch to the index of the winning class.
#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn predict(&self, input: Array4<f32>) -> Result<usize, ClassifyError>;
}
