use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cls::TextClassifier;
use crate::det::TextDetector;
use crate::engine::EngineError;
use crate::geometry::{get_rotate_crop_image, Quad};
use crate::image_impl::{self, Mat};
use crate::reading_order::sorted_boxes;
use crate::rec::{TextLine, TextRecognizer};
use crate::types::OcrArgs;

/// Finds text regions in a page. The image may be modified.
pub trait Detector: Send + Sync {
    fn run(&self, img: &mut Mat) -> Result<Vec<Quad>, EngineError>;
}

/// Corrects crop orientation. Must return one image per input, in order.
pub trait Classifier: Send + Sync {
    fn run(&self, imgs: Vec<Mat>) -> Result<Vec<Mat>, EngineError>;
}

/// Reads text from crops. Must return one line per input, in order.
pub trait Recognizer: Send + Sync {
    fn run(&self, imgs: &[Mat]) -> Result<Vec<TextLine>, EngineError>;
}

/// A straightened crop and the detected quad it came from.
#[derive(Clone, Debug)]
pub struct RectifiedRegion {
    pub image: Mat,
    pub provenance: Quad,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Confidence in `[0, 1]`.
    pub score: f64,
    /// Source-image corners: `[top-left, top-right, bottom-right, bottom-left]`.
    pub bbox: Quad,
}

/// Per-stage timings (seconds) and region counts of one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OcrStats {
    pub elapse_det: f64,
    pub elapse_cls: f64,
    pub elapse_rec: f64,
    pub regions_detected: usize,
    pub regions_rectified: usize,
}

/// Detection, reading order, rectification, optional orientation
/// classification and recognition over one page.
pub struct TextSystem {
    detector: Box<dyn Detector>,
    classifier: Option<Box<dyn Classifier>>,
    recognizer: Box<dyn Recognizer>,
    drop_score: f32,
}

impl TextSystem {
    /// Load every model named in `args`. Fails if any of them fails to load.
    pub fn new(args: &OcrArgs) -> Result<Self, EngineError> {
        let detector = TextDetector::new(args.det_config())?;
        let classifier = match args.cls_config() {
            Some(cfg) => Some(Box::new(TextClassifier::new(cfg)?) as Box<dyn Classifier>),
            None => None,
        };
        let recognizer = TextRecognizer::new(args.rec_config())?;

        Ok(Self::from_parts(Box::new(detector), classifier, Box::new(recognizer))
            .with_drop_score(args.drop_score))
    }

    pub fn from_parts(
        detector: Box<dyn Detector>,
        classifier: Option<Box<dyn Classifier>>,
        recognizer: Box<dyn Recognizer>,
    ) -> Self {
        Self {
            detector,
            classifier,
            recognizer,
            drop_score: OcrArgs::default().drop_score,
        }
    }

    /// Results scoring below `drop_score` are discarded. The default `0.0`
    /// keeps every recognized region.
    pub fn with_drop_score(mut self, drop_score: f32) -> Self {
        self.drop_score = drop_score;
        self
    }

    pub fn run(&self, img: Mat) -> Result<Vec<RecognitionResult>, EngineError> {
        self.run_with_stats(img).map(|(results, _)| results)
    }

    pub fn run_on_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<RecognitionResult>, EngineError> {
        self.run(image_impl::imread(path)?)
    }

    /// Decode an encoded image (PNG, JPEG) from memory and run on it.
    pub fn run_on_bytes(&self, data: &[u8]) -> Result<Vec<RecognitionResult>, EngineError> {
        let img = image::load_from_memory(data)?;
        self.run(Mat::new(img))
    }

    pub fn run_with_stats(&self, img: Mat) -> Result<(Vec<RecognitionResult>, OcrStats), EngineError> {
        let mut stats = OcrStats::default();
        // The detector may scribble on its input; crops come from this copy.
        let source = img.clone();
        let mut img = img;

        let start = Instant::now();
        let boxes = self.detector.run(&mut img)?;
        stats.elapse_det = start.elapsed().as_secs_f64();
        stats.regions_detected = boxes.len();
        debug!("dt_boxes num: {}, elapse: {:.3}s", boxes.len(), stats.elapse_det);
        if boxes.is_empty() {
            return Ok((Vec::new(), stats));
        }

        let regions = rectify_regions(&source, &sorted_boxes(boxes));
        stats.regions_rectified = regions.len();
        if regions.is_empty() {
            return Ok((Vec::new(), stats));
        }
        let (crops, provenance): (Vec<Mat>, Vec<Quad>) = regions
            .into_iter()
            .map(|r| (r.image, r.provenance))
            .unzip();

        let crops = match &self.classifier {
            Some(classifier) => {
                let start = Instant::now();
                let expected = crops.len();
                let corrected = classifier.run(crops)?;
                check_batch("classifier", expected, corrected.len())?;
                stats.elapse_cls = start.elapsed().as_secs_f64();
                debug!("cls num: {}, elapse: {:.3}s", corrected.len(), stats.elapse_cls);
                corrected
            }
            None => crops,
        };

        let start = Instant::now();
        let lines = self.recognizer.run(&crops)?;
        check_batch("recognizer", crops.len(), lines.len())?;
        stats.elapse_rec = start.elapsed().as_secs_f64();
        debug!("rec_res num: {}, elapse: {:.3}s", lines.len(), stats.elapse_rec);

        let results = lines
            .into_iter()
            .zip(provenance)
            .filter(|(line, _)| line.score >= self.drop_score)
            .map(|(line, bbox)| RecognitionResult {
                text: line.text,
                score: f64::from(line.score),
                bbox,
            })
            .collect();

        Ok((results, stats))
    }
}

/// Rectify each region against `source`, in order. Regions that cannot be
/// cropped are logged and skipped.
pub fn rectify_regions(source: &Mat, boxes: &[Quad]) -> Vec<RectifiedRegion> {
    boxes
        .iter()
        .filter_map(|quad| match get_rotate_crop_image(source, quad) {
            Ok(image) => Some(RectifiedRegion {
                image,
                provenance: *quad,
            }),
            Err(e) => {
                warn!("Skipping region {:?}: {}", quad.points, e);
                None
            }
        })
        .collect()
}

fn check_batch(stage: &'static str, expected: usize, actual: usize) -> Result<(), EngineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EngineError::BatchSizeMismatch {
            stage,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Calls {
        det: AtomicUsize,
        cls: AtomicUsize,
        rec: AtomicUsize,
        rec_images: AtomicUsize,
    }

    struct MockDetector {
        boxes: Vec<Quad>,
        scribble: bool,
        calls: Arc<Calls>,
    }

    impl Detector for MockDetector {
        fn run(&self, img: &mut Mat) -> Result<Vec<Quad>, EngineError> {
            self.calls.det.fetch_add(1, Ordering::SeqCst);
            if self.scribble {
                for p in img.as_rgb8_mut().pixels_mut() {
                    p.0 = [255, 255, 255];
                }
            }
            Ok(self.boxes.clone())
        }
    }

    struct MockClassifier {
        drop_one: bool,
        calls: Arc<Calls>,
    }

    impl Classifier for MockClassifier {
        fn run(&self, mut imgs: Vec<Mat>) -> Result<Vec<Mat>, EngineError> {
            self.calls.cls.fetch_add(1, Ordering::SeqCst);
            if self.drop_one {
                imgs.pop();
            }
            Ok(imgs)
        }
    }

    /// Reads each crop as `"{width}x{height}:{top-left red}"`.
    struct MockRecognizer {
        score: f32,
        calls: Arc<Calls>,
    }

    impl Recognizer for MockRecognizer {
        fn run(&self, imgs: &[Mat]) -> Result<Vec<TextLine>, EngineError> {
            self.calls.rec.fetch_add(1, Ordering::SeqCst);
            self.calls.rec_images.fetch_add(imgs.len(), Ordering::SeqCst);
            Ok(imgs
                .iter()
                .map(|img| TextLine {
                    text: format!("{}x{}:{}", img.cols(), img.rows(), img.get_pixel(0, 0)[0]),
                    score: self.score,
                })
                .collect())
        }
    }

    fn page() -> Mat {
        Mat::filled(200, 200, [40, 40, 40])
    }

    fn system(boxes: Vec<Quad>, with_cls: bool) -> (TextSystem, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let det = MockDetector {
            boxes,
            scribble: false,
            calls: calls.clone(),
        };
        let cls = with_cls.then(|| {
            Box::new(MockClassifier {
                drop_one: false,
                calls: calls.clone(),
            }) as Box<dyn Classifier>
        });
        let rec = MockRecognizer {
            score: 0.9,
            calls: calls.clone(),
        };
        (
            TextSystem::from_parts(Box::new(det), cls, Box::new(rec)),
            calls,
        )
    }

    #[test]
    fn test_empty_detection_stops_pipeline() {
        let (sys, calls) = system(Vec::new(), true);
        let (results, stats) = sys.run_with_stats(page()).unwrap();
        assert!(results.is_empty());
        assert_eq!(stats.regions_detected, 0);
        assert_eq!(calls.det.load(Ordering::SeqCst), 1);
        assert_eq!(calls.cls.load(Ordering::SeqCst), 0);
        assert_eq!(calls.rec.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_results_follow_reading_order() {
        // Regions tagged by width, detected out of order.
        let r1 = Quad::from_rect(10, 10, 30, 22);
        let r2 = Quad::from_rect(60, 12, 100, 24);
        let r3 = Quad::from_rect(5, 80, 65, 92);
        let (sys, calls) = system(vec![r3, r2, r1], true);

        let results = sys.run(page()).unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["20x12:40", "40x12:40", "60x12:40"]);
        let boxes: Vec<Quad> = results.iter().map(|r| r.bbox).collect();
        assert_eq!(boxes, vec![r1, r2, r3]);
        assert_eq!(calls.cls.load(Ordering::SeqCst), 1);
        assert_eq!(calls.rec_images.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_invalid_region_is_skipped() {
        let good = Quad::from_rect(10, 10, 50, 30);
        let degenerate = Quad::from([[60, 60], [60, 60], [90, 80], [60, 80]]);
        let outside = Quad::from_rect(300, 300, 340, 320);
        let (sys, calls) = system(vec![good, degenerate, outside], false);

        let (results, stats) = sys.run_with_stats(page()).unwrap();
        assert_eq!(stats.regions_detected, 3);
        assert_eq!(stats.regions_rectified, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bbox, good);
        assert_eq!(calls.rec_images.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_regions_invalid_skips_recognition() {
        let outside = Quad::from_rect(300, 300, 340, 320);
        let (sys, calls) = system(vec![outside], true);
        assert!(sys.run(page()).unwrap().is_empty());
        assert_eq!(calls.cls.load(Ordering::SeqCst), 0);
        assert_eq!(calls.rec.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classifier_batch_mismatch_is_an_error() {
        let calls = Arc::new(Calls::default());
        let sys = TextSystem::from_parts(
            Box::new(MockDetector {
                boxes: vec![Quad::from_rect(10, 10, 50, 30), Quad::from_rect(10, 50, 50, 70)],
                scribble: false,
                calls: calls.clone(),
            }),
            Some(Box::new(MockClassifier {
                drop_one: true,
                calls: calls.clone(),
            })),
            Box::new(MockRecognizer {
                score: 0.9,
                calls: calls.clone(),
            }),
        );
        match sys.run(page()) {
            Err(EngineError::BatchSizeMismatch {
                stage,
                expected,
                actual,
            }) => {
                assert_eq!(stage, "classifier");
                assert_eq!((expected, actual), (2, 1));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.rec.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detector_mutation_does_not_reach_crops() {
        let calls = Arc::new(Calls::default());
        let sys = TextSystem::from_parts(
            Box::new(MockDetector {
                boxes: vec![Quad::from_rect(10, 10, 50, 30)],
                scribble: true,
                calls: calls.clone(),
            }),
            None,
            Box::new(MockRecognizer {
                score: 0.9,
                calls: calls.clone(),
            }),
        );
        let results = sys.run(page()).unwrap();
        assert_eq!(results[0].text, "40x20:40");
    }

    #[test]
    fn test_drop_score_filters_results() {
        let calls = Arc::new(Calls::default());
        let make = |score: f32| {
            TextSystem::from_parts(
                Box::new(MockDetector {
                    boxes: vec![Quad::from_rect(10, 10, 50, 30)],
                    scribble: false,
                    calls: calls.clone(),
                }),
                None,
                Box::new(MockRecognizer {
                    score,
                    calls: calls.clone(),
                }),
            )
        };
        assert_eq!(make(0.3).run(page()).unwrap().len(), 1);
        assert!(make(0.3).with_drop_score(0.5).run(page()).unwrap().is_empty());
        assert_eq!(make(0.5).with_drop_score(0.5).run(page()).unwrap().len(), 1);
    }

    #[test]
    fn test_low_confidence_regions_are_kept_by_default() {
        let calls = Arc::new(Calls::default());
        let boxes = vec![
            Quad::from_rect(10, 10, 30, 22),
            Quad::from_rect(60, 12, 100, 24),
            Quad::from_rect(5, 80, 65, 92),
        ];
        let sys = TextSystem::from_parts(
            Box::new(MockDetector {
                boxes: boxes.clone(),
                scribble: false,
                calls: calls.clone(),
            }),
            None,
            Box::new(MockRecognizer {
                score: 0.3,
                calls: calls.clone(),
            }),
        );
        let results = sys.run(page()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().map(|r| r.bbox).collect::<Vec<_>>(), boxes);
        assert!(results.iter().all(|r| (r.score - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_run_on_bytes_decodes_png() {
        let mut png = Vec::new();
        page()
            .into_rgb8()
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let (sys, _) = system(vec![Quad::from_rect(0, 0, 30, 10)], false);
        let results = sys.run_on_bytes(&png).unwrap();
        assert_eq!(results[0].text, "30x10:40");
    }

    #[test]
    fn test_run_on_missing_path_is_an_error() {
        let (sys, calls) = system(Vec::new(), false);
        assert!(sys.run_on_path("/nonexistent/page.png").is_err());
        assert_eq!(calls.det.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_system_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TextSystem>();
    }
}
