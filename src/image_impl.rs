//! Image buffer and the pixel-level primitives used by rectification and
//! model pre-processing.
//!
//! `Mat` owns an 8-bit RGB buffer. Region views borrow from it without
//! copying; every transform materializes a new `Mat`, so ownership of each
//! intermediate buffer is always with exactly one stage.

use std::path::Path;

use image::{imageops, DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage, SubImage};

use crate::engine::EngineError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2f {
    pub x: f32,
    pub y: f32,
}

impl Default for Point2f {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

impl Point2f {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Non-copying rectangular view into a [`Mat`].
pub type MatView<'a> = SubImage<&'a RgbImage>;

#[derive(Clone, Debug, PartialEq)]
pub struct Mat {
    image: RgbImage,
}

impl Mat {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: image.into_rgb8(),
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let img = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data).ok_or_else(|| {
            EngineError::ImageError(format!(
                "buffer too small for a {width}x{height} RGB image"
            ))
        })?;
        Ok(Self { image: img })
    }

    /// Black image of the given size.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn filled(width: u32, height: u32, pixel: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(pixel)),
        }
    }

    pub fn rows(&self) -> i32 {
        self.image.height() as i32
    }

    pub fn cols(&self) -> i32 {
        self.image.width() as i32
    }

    pub fn channels(&self) -> u32 {
        3
    }

    pub fn size(&self) -> Size {
        Size::new(self.cols(), self.rows())
    }

    pub fn empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    /// Borrow the sub-rectangle `[x, x + width) x [y, y + height)`.
    ///
    /// The caller is responsible for keeping the rectangle inside the image.
    pub fn roi(&self, x: u32, y: u32, width: u32, height: u32) -> MatView<'_> {
        imageops::crop_imm(&self.image, x, y, width, height)
    }

    pub fn as_rgb8(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_rgb8_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_rgb8(self) -> RgbImage {
        self.image
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }
}

pub fn imread<P: AsRef<Path>>(path: P) -> Result<Mat> {
    let img = image::open(path)?;
    Ok(Mat::new(img))
}

/// Bilinear resize to exactly `dsize`.
pub fn resize(src: &Mat, dst: &mut Mat, dsize: Size) -> Result<()> {
    if dsize.width <= 0 || dsize.height <= 0 {
        return Err(EngineError::ImageError(format!(
            "invalid resize target {}x{}",
            dsize.width, dsize.height
        )));
    }
    let resized = imageops::resize(
        &src.image,
        dsize.width as u32,
        dsize.height as u32,
        imageops::FilterType::Triangle,
    );
    *dst = Mat::from_rgb_image(resized);
    Ok(())
}

/// Swap rows and columns: `dst(x, y) = src(y, x)`.
pub fn transpose(src: &Mat, dst: &mut Mat) {
    let (w, h) = src.image.dimensions();
    let out = ImageBuffer::from_fn(h, w, |x, y| *src.image.get_pixel(y, x));
    *dst = Mat::from_rgb_image(out);
}

/// Mirror across the horizontal axis (row order reversed).
pub fn flip_vertical(src: &Mat, dst: &mut Mat) {
    *dst = Mat::from_rgb_image(imageops::flip_vertical(&src.image));
}

pub fn rotate_180(src: &Mat, dst: &mut Mat) {
    *dst = Mat::from_rgb_image(imageops::rotate180(&src.image));
}

/// Warp `src` through the forward homography `matrix` into a new
/// `dsize` image.
///
/// Each destination pixel is mapped back through the inverse transform and
/// sampled bilinearly; samples falling outside `src` read as black.
pub fn warp_perspective<V>(src: &V, dst: &mut Mat, matrix: &[[f64; 3]; 3], dsize: Size) -> Result<()>
where
    V: GenericImageView<Pixel = Rgb<u8>>,
{
    if dsize.width <= 0 || dsize.height <= 0 {
        return Err(EngineError::ImageError(format!(
            "invalid warp target {}x{}",
            dsize.width, dsize.height
        )));
    }

    let m_inv = invert_matrix_3x3(matrix)?;
    let (m00, m01, m02) = (m_inv[0][0], m_inv[0][1], m_inv[0][2]);
    let (m10, m11, m12) = (m_inv[1][0], m_inv[1][1], m_inv[1][2]);
    let (m20, m21, m22) = (m_inv[2][0], m_inv[2][1], m_inv[2][2]);

    let (src_w, src_h) = src.dimensions();
    let (src_w, src_h) = (src_w as i64, src_h as i64);
    let sample = |x: i64, y: i64| -> [f64; 3] {
        if x < 0 || y < 0 || x >= src_w || y >= src_h {
            return [0.0; 3];
        }
        let p = src.get_pixel(x as u32, y as u32).0;
        [p[0] as f64, p[1] as f64, p[2] as f64]
    };

    let mut out = RgbImage::new(dsize.width as u32, dsize.height as u32);
    for y in 0..dsize.height as u32 {
        let y_f = y as f64;
        let m01y = m01 * y_f;
        let m11y = m11 * y_f;
        let m21y = m21 * y_f;

        for x in 0..dsize.width as u32 {
            let x_f = x as f64;
            let w = m20 * x_f + m21y + m22;
            if w.abs() < f64::EPSILON {
                continue;
            }
            let sx = (m00 * x_f + m01y + m02) / w;
            let sy = (m10 * x_f + m11y + m12) / w;

            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);
            if x0 < -1 || y0 < -1 || x0 >= src_w || y0 >= src_h {
                continue;
            }

            let p00 = sample(x0, y0);
            let p10 = sample(x0 + 1, y0);
            let p01 = sample(x0, y0 + 1);
            let p11 = sample(x0 + 1, y0 + 1);

            let mut px = [0u8; 3];
            for c in 0..3 {
                let v = (1.0 - fx) * (1.0 - fy) * p00[c]
                    + fx * (1.0 - fy) * p10[c]
                    + (1.0 - fx) * fy * p01[c]
                    + fx * fy * p11[c];
                px[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, y, Rgb(px));
        }
    }

    *dst = Mat::from_rgb_image(out);
    Ok(())
}

/// Homography mapping the four `src_pts` onto the four `dst_pts`.
pub fn get_perspective_transform(
    src_pts: &[Point2f; 4],
    dst_pts: &[Point2f; 4],
) -> Result<[[f64; 3]; 3]> {
    use nalgebra::{DMatrix, SMatrix, SVector};

    // Eight unknowns with h22 fixed to 1.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src_pts[i].x as f64, src_pts[i].y as f64);
        let (u, v) = (dst_pts[i].x as f64, dst_pts[i].y as f64);

        a[(i, 0)] = x;
        a[(i, 1)] = y;
        a[(i, 2)] = 1.0;
        a[(i, 6)] = -u * x;
        a[(i, 7)] = -u * y;
        b[i] = u;

        a[(i + 4, 3)] = x;
        a[(i + 4, 4)] = y;
        a[(i + 4, 5)] = 1.0;
        a[(i + 4, 6)] = -v * x;
        a[(i + 4, 7)] = -v * y;
        b[i + 4] = v;
    }

    if let Some(h) = a.lu().solve(&b) {
        if (a * h - b).norm() < 1e-6 {
            return Ok([
                [h[0], h[1], h[2]],
                [h[3], h[4], h[5]],
                [h[6], h[7], 1.0],
            ]);
        }
    }

    // Near-singular system: take the null vector of the full 9-parameter
    // system instead.
    let mut a9 = DMatrix::<f64>::zeros(8, 9);
    for i in 0..4 {
        let (x, y) = (src_pts[i].x as f64, src_pts[i].y as f64);
        let (u, v) = (dst_pts[i].x as f64, dst_pts[i].y as f64);

        a9[(i, 0)] = x;
        a9[(i, 1)] = y;
        a9[(i, 2)] = 1.0;
        a9[(i, 6)] = -u * x;
        a9[(i, 7)] = -u * y;
        a9[(i, 8)] = -u;

        a9[(i + 4, 3)] = x;
        a9[(i + 4, 4)] = y;
        a9[(i + 4, 5)] = 1.0;
        a9[(i + 4, 6)] = -v * x;
        a9[(i + 4, 7)] = -v * y;
        a9[(i + 4, 8)] = -v;
    }

    let ata = a9.transpose() * &a9;
    let svd = ata.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| EngineError::ImageError("SVD failed".to_string()))?;

    // Singular values come back sorted descending.
    let h = u.column(8);
    Ok([[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]])
}

fn invert_matrix_3x3(m: &[[f64; 3]; 3]) -> Result<[[f64; 3]; 3]> {
    use nalgebra::Matrix3;

    let mat = Matrix3::new(
        m[0][0], m[0][1], m[0][2],
        m[1][0], m[1][1], m[1][2],
        m[2][0], m[2][1], m[2][2],
    );
    let inv = mat
        .try_inverse()
        .ok_or_else(|| EngineError::ImageError("perspective matrix is not invertible".to_string()))?;

    Ok([
        [inv[(0, 0)], inv[(0, 1)], inv[(0, 2)]],
        [inv[(1, 0)], inv[(1, 1)], inv[(1, 2)]],
        [inv[(2, 0)], inv[(2, 1)], inv[(2, 2)]],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Mat {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 5 % 256) as u8, (y * 7 % 256) as u8, ((x + y) % 256) as u8])
        });
        Mat::from_rgb_image(img)
    }

    fn square(side: f32) -> [Point2f; 4] {
        [
            Point2f::new(0.0, 0.0),
            Point2f::new(side, 0.0),
            Point2f::new(side, side),
            Point2f::new(0.0, side),
        ]
    }

    #[test]
    fn test_identity_perspective_transform() {
        let m = get_perspective_transform(&square(50.0), &square(50.0)).unwrap();
        for (r, row) in m.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                let expected = if r == c { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-9, "m[{r}][{c}] = {v}");
            }
        }
    }

    #[test]
    fn test_scaling_perspective_transform_maps_corners() {
        let src = square(10.0);
        let dst = square(20.0);
        let m = get_perspective_transform(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let (x, y) = (s.x as f64, s.y as f64);
            let w = m[2][0] * x + m[2][1] * y + m[2][2];
            let u = (m[0][0] * x + m[0][1] * y + m[0][2]) / w;
            let v = (m[1][0] * x + m[1][1] * y + m[1][2]) / w;
            assert!((u - d.x as f64).abs() < 1e-6);
            assert!((v - d.y as f64).abs() < 1e-6);
        }
    }

    #[test]
    fn test_identity_warp_copies_pixels() {
        let src = gradient(30, 20);
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let mut dst = Mat::zeros(1, 1);
        warp_perspective(src.as_rgb8(), &mut dst, &identity, src.size()).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_warp_outside_source_is_black() {
        let src = Mat::filled(4, 4, [200, 200, 200]);
        let shift = [[1.0, 0.0, 10.0], [0.0, 1.0, 10.0], [0.0, 0.0, 1.0]];
        let mut dst = Mat::zeros(1, 1);
        warp_perspective(src.as_rgb8(), &mut dst, &shift, Size::new(4, 4)).unwrap();
        assert_eq!(dst.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(dst.get_pixel(3, 3), [0, 0, 0]);
    }

    #[test]
    fn test_warp_rejects_empty_target() {
        let src = gradient(4, 4);
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let mut dst = Mat::zeros(1, 1);
        assert!(warp_perspective(src.as_rgb8(), &mut dst, &identity, Size::new(0, 4)).is_err());
    }

    #[test]
    fn test_roi_views_without_copying() {
        let src = gradient(40, 30);
        let view = src.roi(10, 5, 8, 6);
        assert_eq!(view.dimensions(), (8, 6));
        assert_eq!(view.get_pixel(0, 0).0, src.get_pixel(10, 5));
        assert_eq!(view.get_pixel(7, 5).0, src.get_pixel(17, 10));
    }

    #[test]
    fn test_warp_reads_through_roi_view() {
        let src = gradient(40, 30);
        let view = src.roi(10, 5, 8, 6);
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let mut dst = Mat::zeros(1, 1);
        warp_perspective(&*view, &mut dst, &identity, Size::new(8, 6)).unwrap();
        assert_eq!(dst.size(), Size::new(8, 6));
        assert_eq!(dst.get_pixel(0, 0), src.get_pixel(10, 5));
        assert_eq!(dst.get_pixel(7, 5), src.get_pixel(17, 10));
    }

    #[test]
    fn test_transpose_swaps_axes() {
        let src = gradient(7, 3);
        let mut dst = Mat::zeros(1, 1);
        transpose(&src, &mut dst);
        assert_eq!(dst.size(), Size::new(3, 7));
        assert_eq!(dst.get_pixel(2, 6), src.get_pixel(6, 2));
        assert_eq!(dst.get_pixel(0, 4), src.get_pixel(4, 0));
    }

    #[test]
    fn test_flip_vertical_reverses_rows() {
        let src = gradient(5, 4);
        let mut dst = Mat::zeros(1, 1);
        flip_vertical(&src, &mut dst);
        assert_eq!(dst.size(), src.size());
        assert_eq!(dst.get_pixel(1, 0), src.get_pixel(1, 3));
        assert_eq!(dst.get_pixel(4, 3), src.get_pixel(4, 0));
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let src = gradient(64, 16);
        let mut dst = Mat::zeros(1, 1);
        resize(&src, &mut dst, Size::new(32, 48)).unwrap();
        assert_eq!(dst.size(), Size::new(32, 48));
        assert!(resize(&src, &mut dst, Size::new(0, 48)).is_err());
    }

    #[test]
    fn test_from_rgb8_rejects_short_buffer() {
        assert!(Mat::from_rgb8(4, 4, vec![0; 10]).is_err());
        let mat = Mat::from_rgb8(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(mat.get_pixel(1, 0), [4, 5, 6]);
        assert_eq!(mat.channels(), 3);
    }
}
