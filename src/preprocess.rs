use ndarray::{Array3, Array4};

use crate::engine::EngineError;
use crate::image_impl::{self, Mat, Size};

/// Resize and normalize a page for the DB detector.
pub struct DetPreProcess {
    pub limit_side_len: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl DetPreProcess {
    pub fn new(limit_side_len: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            limit_side_len,
            mean,
            std,
        }
    }

    pub fn run(&self, img: &Mat) -> Result<Array4<f32>, EngineError> {
        let resized = self.resize(img)?;
        Ok(self.normalize_and_permute(&resized))
    }

    /// Target size: the longer side capped at `limit_side_len`, then both
    /// sides rounded to a multiple of 32 (at least 32).
    pub fn target_size(&self, h: i32, w: i32) -> Result<Size, EngineError> {
        if h <= 0 || w <= 0 {
            return Err(EngineError::Preprocess(format!("cannot resize a {w}x{h} image")));
        }
        let max_side = h.max(w) as f32;
        let limit = self.limit_side_len as f32;
        let ratio = if max_side > limit { limit / max_side } else { 1.0 };

        let round32 = |v: f32| (((v / 32.0).round() * 32.0) as i32).max(32);
        Ok(Size::new(round32(w as f32 * ratio), round32(h as f32 * ratio)))
    }

    fn resize(&self, img: &Mat) -> Result<Mat, EngineError> {
        let size = self.target_size(img.rows(), img.cols())?;
        let mut dst = Mat::zeros(1, 1);
        image_impl::resize(img, &mut dst, size)?;
        Ok(dst)
    }

    fn normalize_and_permute(&self, img: &Mat) -> Array4<f32> {
        let h = img.rows() as usize;
        let w = img.cols() as usize;
        let mut out = Array4::<f32>::zeros((1, 3, h, w));
        let scale = 1.0 / 255.0;

        for (x, y, pix) in img.as_rgb8().enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            // Models take BGR planes.
            let bgr = [pix[2], pix[1], pix[0]];
            for c in 0..3 {
                out[[0, c, y, x]] = (bgr[c] as f32 * scale - self.mean[c]) / self.std[c];
            }
        }

        out
    }
}

/// Resize a text crop to height `img_h`, keep its aspect ratio up to
/// `img_width`, and right-pad with zeros to a `[3, img_h, img_width]` tensor
/// normalized to `[-1, 1]`.
pub fn resize_norm_img(img: &Mat, img_h: usize, img_width: usize) -> Result<Array3<f32>, EngineError> {
    let h = img.rows();
    let w = img.cols();
    if h <= 0 || w <= 0 || img_h == 0 || img_width == 0 {
        return Err(EngineError::Preprocess(format!(
            "cannot normalize a {w}x{h} crop into {img_width}x{img_h}"
        )));
    }

    let ratio = w as f32 / h as f32;
    let resized_w = ((img_h as f32 * ratio).ceil() as usize).clamp(1, img_width);

    let mut resized = Mat::zeros(1, 1);
    image_impl::resize(img, &mut resized, Size::new(resized_w as i32, img_h as i32))?;

    let mut out = Array3::<f32>::zeros((3, img_h, img_width));
    for (x, y, pix) in resized.as_rgb8().enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let bgr = [pix[2], pix[1], pix[0]];
        for c in 0..3 {
            out[[c, y, x]] = (bgr[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }

    Ok(out)
}
