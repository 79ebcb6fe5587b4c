use std::time::Instant;

use ndarray::{Array2, ArrayD, Axis, Ix2};
use tracing::debug;

use crate::engine::{EngineError, OrtSession};
use crate::geometry::Quad;
use crate::image_impl::Mat;
use crate::postprocess::DBPostProcess;
use crate::preprocess::DetPreProcess;
use crate::system::Detector;
use crate::types::DetConfig;

/// DB text detector backed by an ONNX session.
pub struct TextDetector {
    pub cfg: DetConfig,
    session: OrtSession,
    preprocess: DetPreProcess,
    postprocess: DBPostProcess,
}

impl TextDetector {
    pub fn new(cfg: DetConfig) -> Result<Self, EngineError> {
        let session = OrtSession::load_model(&cfg.model_path, &cfg.engine_cfg)?;
        let preprocess = DetPreProcess::new(cfg.limit_side_len, cfg.mean, cfg.std);
        let postprocess = DBPostProcess::from_config(&cfg);
        Ok(Self {
            cfg,
            session,
            preprocess,
            postprocess,
        })
    }

    /// Detect text regions together with their box scores.
    pub fn detect(&self, img: &Mat) -> Result<Vec<(Quad, f32)>, EngineError> {
        let start = Instant::now();

        let input = self.preprocess.run(img)?;
        let preds = self.session.run(input.into_dyn())?;
        let prob_map = probability_map(preds)?;
        let regions = self.postprocess.process(prob_map.view(), img.rows(), img.cols());

        debug!(
            "Detected {} regions in {:.3}s",
            regions.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(regions)
    }

    pub fn close(self) {
        self.session.close();
    }
}

impl Detector for TextDetector {
    fn run(&self, img: &mut Mat) -> Result<Vec<Quad>, EngineError> {
        Ok(self.detect(img)?.into_iter().map(|(quad, _)| quad).collect())
    }
}

/// Collapse a `[1, 1, H, W]` (or `[1, H, W]`) model output to `H x W`.
fn probability_map(preds: ArrayD<f32>) -> Result<Array2<f32>, EngineError> {
    let mut preds = preds;
    while preds.ndim() > 2 {
        if preds.shape()[0] != 1 {
            return Err(EngineError::InvalidInputShape);
        }
        preds = preds.index_axis_move(Axis(0), 0);
    }
    preds
        .into_dimensionality::<Ix2>()
        .map_err(|_| EngineError::InvalidInputShape)
}
