use geo_clipper::{Clipper, EndType, JoinType};
use geo_types::{Coord, LineString, Polygon};
use image::{GrayImage, Luma};
use ndarray::ArrayView2;

use crate::contours::{
    find_outer_contours, min_area_rect, order_points_clockwise, point_in_polygon, polygon_area,
    polygon_perimeter,
};
use crate::geometry::{Point, Quad};
use crate::image_impl::Point2f;
use crate::types::DetConfig;

/// Turns a DB probability map into text region quads.
#[derive(Debug, Clone)]
pub struct DBPostProcess {
    pub thresh: f32,
    pub box_thresh: f32,
    pub max_candidates: usize,
    pub unclip_ratio: f64,
    pub min_size: f32,
    pub use_dilation: bool,
}

impl DBPostProcess {
    pub fn new(
        thresh: f32,
        box_thresh: f32,
        max_candidates: usize,
        unclip_ratio: f32,
        use_dilation: bool,
    ) -> Self {
        Self {
            thresh,
            box_thresh,
            max_candidates,
            unclip_ratio: unclip_ratio as f64,
            min_size: 3.0,
            use_dilation,
        }
    }

    pub fn from_config(cfg: &DetConfig) -> Self {
        Self::new(
            cfg.thresh,
            cfg.box_thresh,
            cfg.max_candidates,
            cfg.unclip_ratio,
            cfg.use_dilation,
        )
    }

    /// Extract regions from `pred` (probability map, `H x W`) and scale them
    /// to a `src_w x src_h` source image. Returns quads with their box
    /// scores, in contour discovery order.
    pub fn process(&self, pred: ArrayView2<f32>, src_h: i32, src_w: i32) -> Vec<(Quad, f32)> {
        let (h, w) = pred.dim();
        if h == 0 || w == 0 || src_h <= 0 || src_w <= 0 {
            return Vec::new();
        }

        let mut bitmap = GrayImage::new(w as u32, h as u32);
        for ((y, x), &v) in pred.indexed_iter() {
            if v > self.thresh {
                bitmap.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
        if self.use_dilation {
            bitmap = dilate_2x2(&bitmap);
        }

        let scale_x = src_w as f32 / w as f32;
        let scale_y = src_h as f32 / h as f32;

        let mut regions = Vec::new();
        for contour in find_outer_contours(&bitmap).iter().take(self.max_candidates) {
            let rect = min_area_rect(contour);
            if rect.short_side() < self.min_size {
                continue;
            }
            let box_pts = rect.ordered_corners();

            let score = box_score_fast(pred, &box_pts);
            if score < self.box_thresh {
                continue;
            }

            let expanded = self.unclip(&box_pts);
            if expanded.len() < 3 {
                continue;
            }
            let rect = min_area_rect(&expanded);
            if rect.short_side() < self.min_size + 2.0 {
                continue;
            }

            let scaled = rect.ordered_corners().map(|p| {
                Point2f::new(
                    (p.x * scale_x).round().clamp(0.0, src_w as f32),
                    (p.y * scale_y).round().clamp(0.0, src_h as f32),
                )
            });

            if let Some(quad) = filter_det_res(scaled, src_h, src_w) {
                regions.push((quad, score));
            }
        }

        regions
    }

    /// Grow a box outward by `area * unclip_ratio / perimeter`.
    fn unclip(&self, box_pts: &[Point2f; 4]) -> Vec<Point2f> {
        let area = polygon_area(box_pts);
        let length = polygon_perimeter(box_pts);
        if area <= 0.0 || length <= 0.0 {
            return Vec::new();
        }
        let distance = area * self.unclip_ratio / length;

        let mut ring: Vec<Coord<f64>> = box_pts
            .iter()
            .map(|p| Coord { x: p.x as f64, y: p.y as f64 })
            .collect();
        ring.push(ring[0]);
        let poly = Polygon::new(LineString::from(ring), vec![]);

        let expanded = poly.offset(distance, JoinType::Round(1.0), EndType::ClosedPolygon, 1.0);
        let Some(first) = expanded.0.first() else {
            return Vec::new();
        };

        let mut points: Vec<Point2f> = first
            .exterior()
            .0
            .iter()
            .map(|c| Point2f::new(c.x as f32, c.y as f32))
            .collect();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        points
    }
}

/// Mean probability inside the box polygon.
fn box_score_fast(pred: ArrayView2<f32>, box_pts: &[Point2f; 4]) -> f32 {
    let (h, w) = pred.dim();
    let clamp_x = |v: f32| (v as i32).clamp(0, w as i32 - 1);
    let clamp_y = |v: f32| (v as i32).clamp(0, h as i32 - 1);

    let xmin = clamp_x(box_pts.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor());
    let xmax = clamp_x(box_pts.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil());
    let ymin = clamp_y(box_pts.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor());
    let ymax = clamp_y(box_pts.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil());
    if xmin >= xmax || ymin >= ymax {
        return 0.0;
    }

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for y in ymin..=ymax {
        for x in xmin..=xmax {
            if point_in_polygon(x as f32 + 0.5, y as f32 + 0.5, box_pts) {
                sum += pred[[y as usize, x as usize]];
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Order, clip to the image and drop boxes with a side of 3px or less.
fn filter_det_res(pts: [Point2f; 4], img_height: i32, img_width: i32) -> Option<Quad> {
    let mut pts = order_points_clockwise(pts);
    for p in &mut pts {
        p.x = p.x.clamp(0.0, (img_width - 1) as f32);
        p.y = p.y.clamp(0.0, (img_height - 1) as f32);
    }

    let rect_width = ((pts[0].x - pts[1].x).hypot(pts[0].y - pts[1].y)) as i32;
    let rect_height = ((pts[0].x - pts[3].x).hypot(pts[0].y - pts[3].y)) as i32;
    if rect_width <= 3 || rect_height <= 3 {
        return None;
    }

    Some(Quad::new(
        pts.map(|p| Point::new(p.x.round() as i32, p.y.round() as i32)),
    ))
}

/// 2x2 max filter anchored at the top-left pixel.
///
/// PaddleOCR dilates with a 2x2 kernel; `imageproc::morphology::dilate` only
/// offers odd-sized norms (`Norm::LInf, 1` is already 3x3).
fn dilate_2x2(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let x1 = (x + 1).min(width - 1);
        let y1 = (y + 1).min(height - 1);
        let v = img.get_pixel(x, y)[0]
            .max(img.get_pixel(x1, y)[0])
            .max(img.get_pixel(x, y1)[0])
            .max(img.get_pixel(x1, y1)[0]);
        Luma([v])
    })
}
