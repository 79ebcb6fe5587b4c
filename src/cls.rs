use std::time::Instant;

use ndarray::{s, Array4, ArrayView2, Ix2};
use tracing::debug;

use crate::engine::{EngineError, OrtSession};
use crate::image_impl::{self, Mat};
use crate::preprocess::resize_norm_img;
use crate::system::Classifier;
use crate::types::ClsConfig;

/// 0/180 degree orientation classifier for rectified text lines.
pub struct TextClassifier {
    pub cfg: ClsConfig,
    session: OrtSession,
}

impl TextClassifier {
    pub fn new(cfg: ClsConfig) -> Result<Self, EngineError> {
        let session = OrtSession::load_model(&cfg.model_path, &cfg.engine_cfg)?;
        Ok(Self { cfg, session })
    }

    /// Label and confidence for every crop, in input order.
    pub fn classify(&self, imgs: &[Mat]) -> Result<Vec<(String, f32)>, EngineError> {
        let [img_c, img_h, img_w] = self.cfg.cls_image_shape;
        let batch_num = self.cfg.cls_batch_num.max(1);
        let mut labels = Vec::with_capacity(imgs.len());

        for chunk in imgs.chunks(batch_num) {
            let mut batch = Array4::<f32>::zeros((chunk.len(), img_c, img_h, img_w));
            for (i, img) in chunk.iter().enumerate() {
                let norm = resize_norm_img(img, img_h, img_w)?;
                batch.slice_mut(s![i, .., .., ..]).assign(&norm);
            }

            let preds = self
                .session
                .run(batch.into_dyn())?
                .into_dimensionality::<Ix2>()
                .map_err(|_| EngineError::InvalidInputShape)?;
            if preds.nrows() != chunk.len() {
                return Err(EngineError::BatchSizeMismatch {
                    stage: "classifier model",
                    expected: chunk.len(),
                    actual: preds.nrows(),
                });
            }
            labels.extend(decode_labels(preds.view(), &self.cfg.label_list));
        }

        Ok(labels)
    }

    pub fn close(self) {
        self.session.close();
    }
}

impl Classifier for TextClassifier {
    fn run(&self, imgs: Vec<Mat>) -> Result<Vec<Mat>, EngineError> {
        let start = Instant::now();
        let labels = self.classify(&imgs)?;
        let out = apply_orientation(imgs, &labels, self.cfg.cls_thresh);
        debug!("Classified {} crops in {:.3}s", out.len(), start.elapsed().as_secs_f64());
        Ok(out)
    }
}

/// Argmax label and its probability per row.
fn decode_labels(preds: ArrayView2<f32>, label_list: &[String]) -> Vec<(String, f32)> {
    preds
        .rows()
        .into_iter()
        .map(|row| {
            let (idx, score) = row
                .iter()
                .copied()
                .enumerate()
                .fold((0usize, f32::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best });
            let label = label_list.get(idx).cloned().unwrap_or_else(|| idx.to_string());
            (label, score)
        })
        .collect()
}

/// Rotate every crop confidently labelled upside down.
fn apply_orientation(imgs: Vec<Mat>, labels: &[(String, f32)], thresh: f32) -> Vec<Mat> {
    imgs.into_iter()
        .zip(labels)
        .map(|(img, (label, score))| {
            if label.contains("180") && *score > thresh {
                let mut rotated = Mat::zeros(1, 1);
                image_impl::rotate_180(&img, &mut rotated);
                rotated
            } else {
                img
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::array;

    fn labels() -> Vec<String> {
        vec!["0".to_string(), "180".to_string()]
    }

    fn marked(width: u32, height: u32) -> Mat {
        Mat::from_rgb_image(ImageBuffer::from_fn(width, height, |x, y| {
            if x == 0 && y == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    #[test]
    fn test_decode_labels_takes_argmax() {
        let preds = array![[0.97f32, 0.03], [0.2, 0.8]];
        let out = decode_labels(preds.view(), &labels());
        assert_eq!(out[0].0, "0");
        assert_eq!(out[1].0, "180");
        assert!((out[1].1 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_confident_180_is_rotated() {
        let imgs = vec![marked(8, 4), marked(8, 4), marked(8, 4)];
        let decided = vec![
            ("180".to_string(), 0.95),
            ("180".to_string(), 0.85),
            ("0".to_string(), 0.99),
        ];
        let out = apply_orientation(imgs, &decided, 0.9);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_pixel(7, 3), [255, 0, 0]);
        assert_eq!(out[0].get_pixel(0, 0), [0, 0, 0]);
        // Below threshold and upright crops are untouched.
        assert_eq!(out[1].get_pixel(0, 0), [255, 0, 0]);
        assert_eq!(out[2].get_pixel(0, 0), [255, 0, 0]);
    }

    #[test]
    fn test_missing_model_fails_construction() {
        let cfg = ClsConfig::new("/nonexistent/cls".into());
        assert!(matches!(
            TextClassifier::new(cfg),
            Err(EngineError::ModelLoad { .. })
        ));
    }
}
