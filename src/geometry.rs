use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::image_impl::{self, Mat, Point2f, Size};

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        dx.hypot(dy)
    }
}

/// Four corners of a detected text region, clockwise from top-left:
/// `[top-left, top-right, bottom-right, bottom-left]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub points: [Point; 4],
}

impl Quad {
    pub const fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle `[left, right) x [top, bottom)` as a quad.
    pub const fn from_rect(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new([
            Point::new(left, top),
            Point::new(right, top),
            Point::new(right, bottom),
            Point::new(left, bottom),
        ])
    }

    /// First corner, the anchor used for reading order.
    pub fn first(&self) -> Point {
        self.points[0]
    }

    pub fn xs(&self) -> [i32; 4] {
        self.points.map(|p| p.x)
    }

    pub fn ys(&self) -> [i32; 4] {
        self.points.map(|p| p.y)
    }

    /// `(left, top, right, bottom)` of the enclosing axis-aligned box.
    pub fn bounding_rect(&self) -> (i32, i32, i32, i32) {
        let xs = self.xs();
        let ys = self.ys();
        (min_of(&xs), min_of(&ys), max_of(&xs), max_of(&ys))
    }

    /// Copy of this quad shifted by `(dx, dy)`, saturating at the `i32` range.
    pub fn translate(&self, dx: i32, dy: i32) -> Quad {
        Quad::new(
            self.points
                .map(|p| Point::new(p.x.saturating_add(dx), p.y.saturating_add(dy))),
        )
    }

    /// True when any two adjacent corners coincide.
    pub fn is_degenerate(&self) -> bool {
        (0..4).any(|i| self.points[i] == self.points[(i + 1) % 4])
    }

    pub fn to_f32(&self) -> [Point2f; 4] {
        self.points.map(|p| Point2f::new(p.x as f32, p.y as f32))
    }
}

impl From<[[i32; 2]; 4]> for Quad {
    fn from(pts: [[i32; 2]; 4]) -> Self {
        Quad::new(pts.map(|[x, y]| Point::new(x, y)))
    }
}

impl TryFrom<&[Point]> for Quad {
    type Error = EngineError;

    fn try_from(points: &[Point]) -> Result<Self, Self::Error> {
        let points: [Point; 4] = points.try_into().map_err(|_| {
            EngineError::InvalidRegion(format!(
                "expected 4 corners, got {}",
                points.len()
            ))
        })?;
        Ok(Quad::new(points))
    }
}

pub fn min_of(values: &[i32]) -> i32 {
    values.iter().copied().min().unwrap_or(0)
}

pub fn max_of(values: &[i32]) -> i32 {
    values.iter().copied().max().unwrap_or(0)
}

/// Crop `quad` out of `img` and straighten it into an upright rectangle.
///
/// The region is cropped to its bounding box, its corners are moved into
/// crop-local coordinates and the crop is perspective-warped onto a
/// `|c0 c1| x |c0 c3|` rectangle. Results at least 1.5 times taller than
/// wide are treated as vertical text and turned into a horizontal line by a
/// transpose followed by a vertical flip.
///
/// Neither `img` nor `quad` is modified.
pub fn get_rotate_crop_image(img: &Mat, quad: &Quad) -> Result<Mat, EngineError> {
    if quad.is_degenerate() {
        return Err(EngineError::InvalidRegion(format!(
            "coincident adjacent corners in {:?}",
            quad.points
        )));
    }

    let (left, top, right, bottom) = quad.bounding_rect();
    let x0 = left.clamp(0, img.cols());
    let y0 = top.clamp(0, img.rows());
    let x1 = right.clamp(0, img.cols());
    let y1 = bottom.clamp(0, img.rows());
    if x1 <= x0 || y1 <= y0 {
        return Err(EngineError::InvalidRegion(format!(
            "empty crop [{left},{right}) x [{top},{bottom}) in a {}x{} image",
            img.cols(),
            img.rows()
        )));
    }

    let crop = img.roi(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32);
    let local = quad.translate(-x0, -y0);
    let p = &local.points;

    // No straightened edge can be longer than the image diagonal.
    let max_side = (img.cols() as f64).hypot(img.rows() as f64).ceil();
    let crop_w = p[0].distance(&p[1]).round().clamp(1.0, max_side) as i32;
    let crop_h = p[0].distance(&p[3]).round().clamp(1.0, max_side) as i32;

    let pts_dst = [
        Point2f::new(0.0, 0.0),
        Point2f::new(crop_w as f32, 0.0),
        Point2f::new(crop_w as f32, crop_h as f32),
        Point2f::new(0.0, crop_h as f32),
    ];
    let m = image_impl::get_perspective_transform(&local.to_f32(), &pts_dst)?;

    let mut dst = Mat::zeros(1, 1);
    image_impl::warp_perspective(&*crop, &mut dst, &m, Size::new(crop_w, crop_h))?;

    if dst.rows() as f64 >= dst.cols() as f64 * 1.5 {
        let mut transposed = Mat::zeros(1, 1);
        image_impl::transpose(&dst, &mut transposed);
        let mut flipped = Mat::zeros(1, 1);
        image_impl::flip_vertical(&transposed, &mut flipped);
        return Ok(flipped);
    }

    Ok(dst)
}
