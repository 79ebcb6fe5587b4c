use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::types::EngineConfig;

/// File names tried, in order, when a model directory is given.
const MODEL_FILE_NAMES: [&str; 2] = ["inference.onnx", "model.onnx"];

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("failed to load model from {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Invalid input shape")]
    InvalidInputShape,

    #[error("Preprocess error: {0}")]
    Preprocess(String),

    #[error("invalid text region: {0}")]
    InvalidRegion(String),

    #[error("{stage} returned {actual} results for a batch of {expected}")]
    BatchSizeMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::ImageError(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// A loaded ONNX model bound to its execution device.
///
/// The session reuses its tensor buffers between calls, so `run` holds an
/// exclusive lock for the whole inference. Dropping the value (or calling
/// [`OrtSession::close`]) releases the model and device resources.
pub struct OrtSession {
    session: Mutex<Session>,
    input_name: String,
    model_path: PathBuf,
}

impl std::fmt::Debug for OrtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtSession")
            .field("input_name", &self.input_name)
            .field("model_path", &self.model_path)
            .finish_non_exhaustive()
    }
}

impl OrtSession {
    /// Load the model found at `model_dir` (a directory holding
    /// `inference.onnx` / `model.onnx`, or the `.onnx` file itself).
    pub fn load_model<P: AsRef<Path>>(model_dir: P, cfg: &EngineConfig) -> Result<Self, EngineError> {
        let model_path = resolve_model_path(model_dir.as_ref())?;
        info!(
            "Loading model {} (gpu: {}, threads: {}, mkldnn: {})",
            model_path.display(),
            cfg.use_gpu,
            cfg.num_threads,
            cfg.use_mkldnn
        );

        let providers = execution_providers(cfg)?;
        let session = build_session(&model_path, cfg, providers).map_err(|e| EngineError::ModelLoad {
            path: model_path.clone(),
            reason: e.to_string(),
        })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());
        debug!("Model {} input tensor: {}", model_path.display(), input_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            model_path,
        })
    }

    pub fn run(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, EngineError> {
        let input_value = Value::from_array(input)?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![&self.input_name => input_value])?;
        let tensor = outputs[0].try_extract_array::<f32>()?;
        Ok(tensor.to_owned())
    }

    pub fn get_character_list(&self, key: &str) -> Option<Vec<String>> {
        let session = self.session.lock();
        let meta = session.metadata().ok()?;
        let value = meta.custom(key).ok()??;
        Some(value.lines().map(|l| l.to_string()).collect())
    }

    pub fn have_key(&self, key: &str) -> bool {
        let session = self.session.lock();
        session
            .metadata()
            .ok()
            .and_then(|m| m.custom(key).ok())
            .flatten()
            .is_some()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Release the model. Equivalent to dropping the session.
    pub fn close(self) {
        debug!("Closing model {}", self.model_path.display());
    }
}

fn resolve_model_path(model_dir: &Path) -> Result<PathBuf, EngineError> {
    if model_dir.as_os_str().is_empty() {
        return Err(EngineError::ModelLoad {
            path: model_dir.to_path_buf(),
            reason: "no model path configured".to_string(),
        });
    }
    if model_dir.is_file() {
        return Ok(model_dir.to_path_buf());
    }
    if model_dir.is_dir() {
        if let Some(found) = MODEL_FILE_NAMES
            .iter()
            .map(|name| model_dir.join(name))
            .find(|p| p.is_file())
        {
            return Ok(found);
        }
        return Err(EngineError::ModelLoad {
            path: model_dir.to_path_buf(),
            reason: format!("directory contains none of {MODEL_FILE_NAMES:?}"),
        });
    }
    Err(EngineError::ModelLoad {
        path: model_dir.to_path_buf(),
        reason: "no such file or directory".to_string(),
    })
}

fn build_session(
    model_path: &Path,
    cfg: &EngineConfig,
    providers: Vec<ExecutionProviderDispatch>,
) -> Result<Session, ort::Error> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(true)?
        .with_execution_providers(providers)?;

    if !cfg.use_gpu && cfg.num_threads > 0 {
        builder = builder.with_intra_threads(cfg.num_threads)?;
    }

    builder.commit_from_file(model_path)
}

fn execution_providers(cfg: &EngineConfig) -> Result<Vec<ExecutionProviderDispatch>, EngineError> {
    let mut providers = Vec::with_capacity(2);
    if cfg.use_gpu {
        providers.push(gpu_provider(cfg)?);
    } else if cfg.use_mkldnn {
        providers.push(onednn_provider()?);
    }
    providers.push(CPUExecutionProvider::default().build());
    Ok(providers)
}

#[cfg(feature = "cuda")]
fn gpu_provider(cfg: &EngineConfig) -> Result<ExecutionProviderDispatch, EngineError> {
    Ok(ort::execution_providers::CUDAExecutionProvider::default()
        .with_device_id(cfg.gpu_id)
        .with_memory_limit(cfg.gpu_mem_bytes())
        .build())
}

#[cfg(not(feature = "cuda"))]
fn gpu_provider(_cfg: &EngineConfig) -> Result<ExecutionProviderDispatch, EngineError> {
    Err(EngineError::Config(
        "use_gpu is set but this build has no `cuda` feature".to_string(),
    ))
}

#[cfg(feature = "onednn")]
fn onednn_provider() -> Result<ExecutionProviderDispatch, EngineError> {
    Ok(ort::execution_providers::OneDNNExecutionProvider::default().build())
}

#[cfg(not(feature = "onednn"))]
fn onednn_provider() -> Result<ExecutionProviderDispatch, EngineError> {
    Err(EngineError::Config(
        "use_mkldnn is set but this build has no `onednn` feature".to_string(),
    ))
}
