//! # paddleocr - PaddleOCR text system on ONNX Runtime
//!
//! Runs the PaddleOCR pipeline over a page image: DB text detection,
//! reading-order sorting, perspective rectification of every region,
//! optional 0/180 orientation classification and CTC recognition.
//!
//! ## Features
//!
//! - **Pure Rust image path**: decoding, warping and contour analysis use
//!   `image`, `imageproc` and `nalgebra`; no OpenCV.
//! - **Pluggable stages**: detector, classifier and recognizer are traits, so
//!   the orchestration runs against any implementation.
//! - **GPU / oneDNN**: enable the `cuda` or `onednn` features to use those
//!   execution providers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paddleocr::{OcrArgs, TextSystem};
//!
//! let args = OcrArgs {
//!     det_model_dir: "models/det".into(),
//!     rec_model_dir: "models/rec".into(),
//!     rec_char_dict_path: "models/ppocr_keys_v1.txt".into(),
//!     ..OcrArgs::default()
//! };
//!
//! let ocr = TextSystem::new(&args)?;
//! for result in ocr.run_on_path("page.jpg")? {
//!     println!("{}: {:.3}", result.text, result.score);
//! }
//! # Ok::<(), paddleocr::EngineError>(())
//! ```

mod cls;
mod contours;
mod det;
mod engine;
mod geometry;
mod image_impl;
mod postprocess;
mod preprocess;
mod reading_order;
mod rec;
mod system;
mod types;

pub use crate::cls::TextClassifier;
pub use crate::det::TextDetector;
pub use crate::engine::{EngineError, OrtSession};
pub use crate::geometry::{get_rotate_crop_image, Point, Quad};
pub use crate::image_impl::{imread, Mat, Size};
pub use crate::reading_order::{sorted_boxes, SAME_LINE_THRESHOLD};
pub use crate::rec::{CtcDecoder, TextLine, TextRecognizer};
pub use crate::system::{
    rectify_regions, Classifier, Detector, OcrStats, RecognitionResult, RectifiedRegion,
    Recognizer, TextSystem,
};
pub use crate::types::{ClsConfig, DetConfig, EngineConfig, OcrArgs, RecConfig};
