use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use ndarray::{s, Array4, ArrayView3, Ix3};
use serde::Serialize;
use tracing::debug;

use crate::engine::{EngineError, OrtSession};
use crate::image_impl::Mat;
use crate::preprocess::resize_norm_img;
use crate::system::Recognizer;
use crate::types::RecConfig;

/// Metadata key holding the dictionary inside exported models.
const CHARACTER_KEY: &str = "character";

/// Recognized text of one crop.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TextLine {
    pub text: String,
    pub score: f32,
}

/// Greedy CTC decoder over a character dictionary whose index 0 is the blank.
#[derive(Clone, Debug)]
pub struct CtcDecoder {
    chars: Vec<String>,
}

impl CtcDecoder {
    fn from_cfg(cfg: &RecConfig, session: &OrtSession) -> Result<Self, EngineError> {
        let list = match &cfg.rec_keys_path {
            Some(path) => read_dict(path)?,
            None if session.have_key(CHARACTER_KEY) => session
                .get_character_list(CHARACTER_KEY)
                .unwrap_or_default(),
            None => {
                return Err(EngineError::Config(format!(
                    "no rec_char_dict_path given and {} has no `{CHARACTER_KEY}` metadata",
                    session.model_path().display()
                )))
            }
        };
        if list.is_empty() {
            return Err(EngineError::Config("character dictionary is empty".to_string()));
        }
        Ok(Self::from_chars(list, cfg.use_space_char))
    }

    pub fn from_chars(list: Vec<String>, use_space_char: bool) -> Self {
        let mut chars = Vec::with_capacity(list.len() + 2);
        chars.push("blank".to_string());
        chars.extend(list);
        if use_space_char {
            chars.push(" ".to_string());
        }
        Self { chars }
    }

    /// Number of classes including the blank.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Decode `[N, T, C]` step probabilities.
    pub fn decode(&self, preds: ArrayView3<f32>) -> Vec<TextLine> {
        preds
            .outer_iter()
            .map(|steps| {
                let mut text = String::new();
                let mut probs = Vec::new();
                let mut prev: Option<usize> = None;

                for row in steps.outer_iter() {
                    let (idx, prob) = row
                        .iter()
                        .copied()
                        .enumerate()
                        .fold((0usize, f32::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best });

                    let repeated = prev == Some(idx);
                    prev = Some(idx);
                    if repeated || idx == 0 {
                        continue;
                    }
                    if let Some(ch) = self.chars.get(idx) {
                        text.push_str(ch);
                        probs.push(prob);
                    }
                }

                let score = if probs.is_empty() {
                    0.0
                } else {
                    probs.iter().sum::<f32>() / probs.len() as f32
                };
                TextLine { text, score }
            })
            .collect()
    }
}

fn read_dict(path: &Path) -> Result<Vec<String>, EngineError> {
    let file = File::open(path).map_err(|e| {
        EngineError::Config(format!("failed to open dictionary {}: {e}", path.display()))
    })?;
    let mut list = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        list.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(list)
}

/// CTC text recognizer backed by an ONNX session.
pub struct TextRecognizer {
    pub cfg: RecConfig,
    session: OrtSession,
    decoder: CtcDecoder,
}

impl TextRecognizer {
    pub fn new(cfg: RecConfig) -> Result<Self, EngineError> {
        let session = OrtSession::load_model(&cfg.model_path, &cfg.engine_cfg)?;
        let decoder = CtcDecoder::from_cfg(&cfg, &session)?;
        debug!("Recognizer dictionary has {} classes", decoder.len());
        Ok(Self { cfg, session, decoder })
    }

    pub fn close(self) {
        self.session.close();
    }

    fn run_batch(&self, imgs: &[&Mat]) -> Result<Vec<TextLine>, EngineError> {
        let [img_c, img_h, img_w] = self.cfg.rec_img_shape;

        let max_wh_ratio = imgs
            .iter()
            .map(|img| wh_ratio(img))
            .fold(img_w as f32 / img_h as f32, f32::max);
        let batch_width = (img_h as f32 * max_wh_ratio).ceil() as usize;

        let mut batch = Array4::<f32>::zeros((imgs.len(), img_c, img_h, batch_width));
        for (i, img) in imgs.iter().enumerate() {
            let norm = resize_norm_img(img, img_h, batch_width)?;
            batch.slice_mut(s![i, .., .., ..]).assign(&norm);
        }

        let preds = self
            .session
            .run(batch.into_dyn())?
            .into_dimensionality::<Ix3>()
            .map_err(|_| EngineError::InvalidInputShape)?;
        if preds.dim().0 != imgs.len() {
            return Err(EngineError::BatchSizeMismatch {
                stage: "recognizer model",
                expected: imgs.len(),
                actual: preds.dim().0,
            });
        }

        Ok(self.decoder.decode(preds.view()))
    }
}

impl Recognizer for TextRecognizer {
    fn run(&self, imgs: &[Mat]) -> Result<Vec<TextLine>, EngineError> {
        let start = Instant::now();
        let order = ratio_order(imgs);
        let mut lines = vec![TextLine::default(); imgs.len()];

        for chunk in order.chunks(self.cfg.rec_batch_num.max(1)) {
            let batch: Vec<&Mat> = chunk.iter().map(|&i| &imgs[i]).collect();
            for (&idx, line) in chunk.iter().zip(self.run_batch(&batch)?) {
                lines[idx] = line;
            }
        }

        debug!("Recognized {} crops in {:.3}s", imgs.len(), start.elapsed().as_secs_f64());
        Ok(lines)
    }
}

fn wh_ratio(img: &Mat) -> f32 {
    img.cols() as f32 / img.rows().max(1) as f32
}

/// Input indices sorted by width/height ratio, narrowest first.
fn ratio_order(imgs: &[Mat]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..imgs.len()).collect();
    order.sort_by(|&a, &b| {
        wh_ratio(&imgs[a])
            .partial_cmp(&wh_ratio(&imgs[b]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}
