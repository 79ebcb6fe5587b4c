//! Contour extraction and the minimum-area rectangles fitted around them.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

use crate::image_impl::Point2f;

/// Outer borders of the foreground (non-zero) components in `mask`.
///
/// Hole borders are dropped; a text region is described by its outline only.
/// Components touching the image edge are kept.
pub fn find_outer_contours(mask: &GrayImage) -> Vec<Vec<Point2f>> {
    // imageproc labels a component touching the frame as a hole, so trace
    // on a copy with a 1px background border and shift the points back.
    let mut padded = GrayImage::new(mask.width() + 2, mask.height() + 2);
    image::imageops::replace(&mut padded, mask, 1, 1);

    find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| {
            c.points
                .into_iter()
                .map(|p| Point2f::new((p.x - 1) as f32, (p.y - 1) as f32))
                .collect()
        })
        .collect()
}

/// Absolute area enclosed by `points` (shoelace formula).
pub fn polygon_area(points: &[Point2f]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64
        })
        .sum();
    (twice * 0.5).abs()
}

pub fn polygon_perimeter(points: &[Point2f]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            ((a.x - b.x) as f64).hypot((a.y - b.y) as f64)
        })
        .sum()
}

fn cross(o: Point2f, a: Point2f, b: Point2f) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull (monotone chain), counter-clockwise in a y-up frame,
/// without collinear points.
pub fn convex_hull(points: &[Point2f]) -> Vec<Point2f> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2f> = Vec::with_capacity(pts.len() + 1);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    // The upper chain may never pop into the lower one.
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Smallest rotated rectangle enclosing a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinAreaRect {
    pub corners: [Point2f; 4],
    pub width: f32,
    pub height: f32,
}

impl MinAreaRect {
    pub fn short_side(&self) -> f32 {
        self.width.min(self.height)
    }

    /// Corners as `[top-left, top-right, bottom-right, bottom-left]`.
    ///
    /// The two left-most corners become the left edge, each pair is then
    /// ordered by y.
    pub fn ordered_corners(&self) -> [Point2f; 4] {
        order_points_clockwise(self.corners)
    }
}

/// Fit a [`MinAreaRect`] with rotating calipers over the convex hull.
///
/// Collinear or near-empty inputs produce an axis-aligned rectangle with a
/// zero side.
pub fn min_area_rect(points: &[Point2f]) -> MinAreaRect {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return axis_aligned_rect(&hull);
    }

    let n = hull.len();
    let mut best: Option<(f32, MinAreaRect)> = None;
    for i in 0..n {
        let origin = hull[i];
        let next = hull[(i + 1) % n];
        let (ex, ey) = (next.x - origin.x, next.y - origin.y);
        let len = ex.hypot(ey);
        if len < f32::EPSILON {
            continue;
        }
        let (ux, uy) = (ex / len, ey / len);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u) = (f32::MAX, f32::MIN);
        let (mut min_v, mut max_v) = (f32::MAX, f32::MIN);
        for p in &hull {
            let (dx, dy) = (p.x - origin.x, p.y - origin.y);
            let pu = dx * ux + dy * uy;
            let pv = dx * vx + dy * vy;
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }

        let area = (max_u - min_u) * (max_v - min_v);
        if best.as_ref().map_or(true, |(a, _)| area < *a) {
            let at = |u: f32, v: f32| Point2f::new(origin.x + u * ux + v * vx, origin.y + u * uy + v * vy);
            best = Some((
                area,
                MinAreaRect {
                    corners: [at(min_u, min_v), at(max_u, min_v), at(max_u, max_v), at(min_u, max_v)],
                    width: max_u - min_u,
                    height: max_v - min_v,
                },
            ));
        }
    }

    match best {
        Some((_, rect)) => rect,
        None => axis_aligned_rect(&hull),
    }
}

fn axis_aligned_rect(points: &[Point2f]) -> MinAreaRect {
    if points.is_empty() {
        return MinAreaRect {
            corners: [Point2f::default(); 4],
            width: 0.0,
            height: 0.0,
        };
    }
    let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    MinAreaRect {
        corners: [
            Point2f::new(min_x, min_y),
            Point2f::new(max_x, min_y),
            Point2f::new(max_x, max_y),
            Point2f::new(min_x, max_y),
        ],
        width: max_x - min_x,
        height: max_y - min_y,
    }
}

/// Order four corners as `[top-left, top-right, bottom-right, bottom-left]`.
pub fn order_points_clockwise(pts: [Point2f; 4]) -> [Point2f; 4] {
    let mut sorted = pts;
    sorted.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));

    let (mut tl, mut bl) = (sorted[0], sorted[1]);
    if tl.y > bl.y {
        std::mem::swap(&mut tl, &mut bl);
    }
    let (mut tr, mut br) = (sorted[2], sorted[3]);
    if tr.y > br.y {
        std::mem::swap(&mut tr, &mut br);
    }

    [tl, tr, br, bl]
}

/// Even-odd point-in-polygon test.
pub fn point_in_polygon(x: f32, y: f32, polygon: &[Point2f]) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > y) != (pj.y > y) && x < (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}
