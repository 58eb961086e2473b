use crate::{
    config::ModelConfig, error::ClassifyError, model_service::ModelService,
    preprocess::INPUT_SHAPE,
};
use async_trait::async_trait;
use ndarray::Array4;
use ort::{
    execution_providers::CPUExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Model file not found: {0:?}")]
    MissingArtifact(PathBuf),
    #[error("Failed to load model: {0}")]
    Ort(#[from] ort::Error),
    #[error("Model {0:?} declares no outputs")]
    NoOutputs(PathBuf),
}

/// Index of the highest score. Ties go to the lowest index and NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (index, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((index, score)),
        })
        .map(|(index, _)| index)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: Arc<str>,
    num_classes: usize,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ClassifierError> {
        let model_path = model_config.get_path();
        if !model_path.exists() {
            return Err(ClassifierError::MissingArtifact(model_path));
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| build_session(&model_path))
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let output_name: Arc<str> = sessions
            .first()
            .and_then(|session| session.outputs.first())
            .map(|output| Arc::from(output.name.as_str()))
            .ok_or_else(|| ClassifierError::NoOutputs(model_path.clone()))?;

        tracing::info!(
            "Created {} ONNX sessions from {:?} (output `{}`)",
            num_instances,
            model_path,
            output_name
        );

        Ok(Self {
            sessions: Arc::new(
                sessions
                    .into_iter()
                    .map(|session| Arc::new(Mutex::new(session)))
                    .collect(),
            ),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
            num_classes: model_config.num_classes,
        })
    }

    /// Runs one forward pass on the next session in the pool and returns the raw scores.
    pub fn run_inference(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifyError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ClassifyError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifyError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;

        let (_, scores) = outputs[self.output_name.as_ref()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifyError::Inference(format!("failed to extract tensor: {}", e)))?;

        Ok(scores.to_vec())
    }
}

fn build_session(model_path: &Path) -> Result<Session, ort::Error> {
    let session = Session::builder()?
        .with_execution_providers([CPUExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model_path)?;
    Ok(session)
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, input: Array4<f32>) -> Result<usize, ClassifyError> {
        if input.shape() != &INPUT_SHAPE[..] {
            return Err(ClassifyError::ShapeMismatch {
                expected: INPUT_SHAPE.to_vec(),
                actual: input.shape().to_vec(),
            });
        }

        let service = self.clone();
        let scores = tokio::task::spawn_blocking(move || service.run_inference(&input))
            .await
            .map_err(|e| ClassifyError::Inference(format!("inference task failed: {}", e)))??;

        if scores.len() != self.num_classes {
            return Err(ClassifyError::ShapeMismatch {
                expected: vec![1, self.num_classes],
                actual: vec![1, scores.len()],
            });
        }

        argmax(&scores)
            .ok_or_else(|| ClassifyError::Inference("model produced no finite scores".to_string()))
    }
}
