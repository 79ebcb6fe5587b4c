use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// Execution options shared by every model session.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub use_gpu: bool,
    pub gpu_id: i32,
    /// GPU memory budget in MB.
    pub gpu_mem: usize,
    pub num_threads: usize,
    pub use_mkldnn: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_gpu: false,
            gpu_id: 0,
            gpu_mem: 1000,
            num_threads: 6,
            use_mkldnn: false,
        }
    }
}

impl EngineConfig {
    pub fn gpu_mem_bytes(&self) -> usize {
        self.gpu_mem * 1024 * 1024
    }
}

#[derive(Clone, Debug)]
pub struct DetConfig {
    pub model_path: PathBuf,
    pub limit_side_len: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub thresh: f32,
    pub box_thresh: f32,
    pub max_candidates: usize,
    pub unclip_ratio: f32,
    pub use_dilation: bool,
    pub engine_cfg: EngineConfig,
}

impl DetConfig {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            limit_side_len: 960,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            thresh: 0.3,
            box_thresh: 0.6,
            max_candidates: 1000,
            unclip_ratio: 1.5,
            use_dilation: false,
            engine_cfg: EngineConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClsConfig {
    pub model_path: PathBuf,
    /// `[channels, height, width]` of the classifier input.
    pub cls_image_shape: [usize; 3],
    pub cls_batch_num: usize,
    pub cls_thresh: f32,
    pub label_list: Vec<String>,
    pub engine_cfg: EngineConfig,
}

impl ClsConfig {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            cls_image_shape: [3, 48, 192],
            cls_batch_num: 6,
            cls_thresh: 0.9,
            label_list: vec!["0".to_string(), "180".to_string()],
            engine_cfg: EngineConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecConfig {
    pub model_path: PathBuf,
    pub rec_keys_path: Option<PathBuf>,
    pub use_space_char: bool,
    /// `[channels, height, width]`; width is the minimum batch width.
    pub rec_img_shape: [usize; 3],
    pub rec_batch_num: usize,
    pub engine_cfg: EngineConfig,
}

impl RecConfig {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            rec_keys_path: None,
            use_space_char: true,
            rec_img_shape: [3, 48, 320],
            rec_batch_num: 6,
            engine_cfg: EngineConfig::default(),
        }
    }
}

/// Flat, named option table for the whole text system.
///
/// Missing keys take their defaults and unknown keys are ignored, so a
/// configuration written for a larger deployment loads unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrArgs {
    pub use_gpu: bool,
    pub gpu_id: i32,
    pub gpu_mem: usize,
    pub num_threads: usize,
    pub use_mkldnn: bool,

    pub det_model_dir: PathBuf,
    pub cls_model_dir: PathBuf,
    pub rec_model_dir: PathBuf,
    pub use_angle_cls: bool,
    pub rec_char_dict_path: PathBuf,
    pub use_space_char: bool,

    pub det_limit_side_len: u32,
    pub det_db_thresh: f32,
    pub det_db_box_thresh: f32,
    pub det_db_unclip_ratio: f32,
    pub use_dilation: bool,

    pub cls_thresh: f32,
    pub cls_batch_num: usize,
    pub rec_batch_num: usize,
    pub drop_score: f32,
}

impl Default for OcrArgs {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            use_gpu: engine.use_gpu,
            gpu_id: engine.gpu_id,
            gpu_mem: engine.gpu_mem,
            num_threads: engine.num_threads,
            use_mkldnn: engine.use_mkldnn,
            det_model_dir: PathBuf::new(),
            cls_model_dir: PathBuf::new(),
            rec_model_dir: PathBuf::new(),
            use_angle_cls: false,
            rec_char_dict_path: PathBuf::new(),
            use_space_char: true,
            det_limit_side_len: 960,
            det_db_thresh: 0.3,
            det_db_box_thresh: 0.6,
            det_db_unclip_ratio: 1.5,
            use_dilation: false,
            cls_thresh: 0.9,
            cls_batch_num: 6,
            rec_batch_num: 6,
            drop_score: 0.0,
        }
    }
}

impl OcrArgs {
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, EngineError> {
        Ok(serde_json::from_value(serde_json::Value::Object(map))?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            use_gpu: self.use_gpu,
            gpu_id: self.gpu_id,
            gpu_mem: self.gpu_mem,
            num_threads: self.num_threads,
            use_mkldnn: self.use_mkldnn,
        }
    }

    pub fn det_config(&self) -> DetConfig {
        DetConfig {
            limit_side_len: self.det_limit_side_len,
            thresh: self.det_db_thresh,
            box_thresh: self.det_db_box_thresh,
            unclip_ratio: self.det_db_unclip_ratio,
            use_dilation: self.use_dilation,
            engine_cfg: self.engine_config(),
            ..DetConfig::new(self.det_model_dir.clone())
        }
    }

    /// Classifier settings, or `None` when angle classification is off.
    pub fn cls_config(&self) -> Option<ClsConfig> {
        if !self.use_angle_cls {
            return None;
        }
        Some(ClsConfig {
            cls_batch_num: self.cls_batch_num,
            cls_thresh: self.cls_thresh,
            engine_cfg: self.engine_config(),
            ..ClsConfig::new(self.cls_model_dir.clone())
        })
    }

    pub fn rec_config(&self) -> RecConfig {
        let keys = if self.rec_char_dict_path.as_os_str().is_empty() {
            None
        } else {
            Some(self.rec_char_dict_path.clone())
        };
        RecConfig {
            rec_keys_path: keys,
            use_space_char: self.use_space_char,
            rec_batch_num: self.rec_batch_num,
            engine_cfg: self.engine_config(),
            ..RecConfig::new(self.rec_model_dir.clone())
        }
    }
}
