use crate::models::{Prediction, Severity};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage, RgbaImage};
use log::{info, warn};
use ndarray::Array4;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tract_onnx::prelude::*;
use uuid::Uuid;

const INPUT_SIZE: u32 = 224;
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

type OnnxModel = TypedRunnableModel<TypedModel>;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Invalid image file: {0}")]
    Decode(image::ImageError),
    #[error("{0}")]
    Model(String),
    #[error("Could not render probability graph: {0}")]
    Graph(image::ImageError),
    #[error("Prediction failed")]
    Failed,
}

/// Boundary between the HTTP layer and the classifier. Handlers only see this
/// trait, so tests can swap in a mock.
pub trait Inference: Send + Sync {
    fn process_image(&self, bytes: &[u8]) -> Result<Prediction, InferenceError>;
    fn model_loaded(&self) -> bool;
    fn class_labels(&self) -> &[&'static str];
}

/// Diabetic-retinopathy classifier backed by an ONNX model.
///
/// When the model file is missing or unloadable the service runs in demo
/// mode: uploads are still decoded and answered with a deterministic pseudo
/// prediction so the API stays usable end to end.
pub struct DrService {
    model: Option<OnnxModel>,
    graphs_dir: PathBuf,
}

impl DrService {
    pub fn new(model_path: &Path, media_root: &Path) -> io::Result<Self> {
        let graphs_dir = media_root.join("graphs");
        fs::create_dir_all(&graphs_dir)?;

        let model = match load_model(model_path) {
            Ok(model) => {
                info!("Loaded ONNX model from {}", model_path.display());
                Some(model)
            }
            Err(err) => {
                warn!(
                    "Could not load model from {} ({err}); running in demo mode",
                    model_path.display()
                );
                None
            }
        };

        Ok(Self { model, graphs_dir })
    }

    fn infer(&self, model: &OnnxModel, image: &RgbaImage) -> Result<Vec<f32>, InferenceError> {
        let size = INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                let pixel = image.get_pixel(x, y);
                for c in 0..3 {
                    let value = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
                    input[[0, c, y as usize, x as usize]] = value;
                }
            }
        }

        let tensor = tract_ndarray::Array::from_shape_vec((1, 3, size, size), input.into_raw_vec())
            .map_err(|e| InferenceError::Model(format!("bad input tensor shape: {e}")))?
            .into_tensor();

        let outputs = model
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::Model(format!("model execution failed: {e}")))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Model(format!("unexpected model output: {e}")))?;
        let logits: Vec<f32> = view.iter().copied().collect();
        if logits.len() != Severity::ALL.len() {
            return Err(InferenceError::Failed);
        }
        Ok(softmax(&logits))
    }

    /// Renders the per-class probabilities as a horizontal bar chart PNG
    /// under `<media_root>/graphs/`.
    fn render_graph(&self, scores: &[f32]) -> Result<PathBuf, InferenceError> {
        const WIDTH: u32 = 480;
        const ROW_HEIGHT: u32 = 48;
        const MARGIN: u32 = 16;
        const BAR_HEIGHT: u32 = 24;

        let height = ROW_HEIGHT * scores.len() as u32;
        let mut chart = RgbImage::from_pixel(WIDTH, height, Rgb([255, 255, 255]));

        let span = WIDTH - 2 * MARGIN;
        for (i, score) in scores.iter().enumerate() {
            let bar_len = (score.clamp(0.0, 1.0) * span as f32) as u32;
            let top = i as u32 * ROW_HEIGHT + (ROW_HEIGHT - BAR_HEIGHT) / 2;
            // Shade from green (No DR) towards red (Proliferative).
            let t = i as f32 / (scores.len() - 1).max(1) as f32;
            let color = Rgb([(60.0 + 180.0 * t) as u8, (200.0 - 160.0 * t) as u8, 60]);
            for y in top..top + BAR_HEIGHT {
                for x in MARGIN..MARGIN + bar_len.max(1) {
                    chart.put_pixel(x, y, color);
                }
            }
        }

        let path = self.graphs_dir.join(format!("graph_{}.png", Uuid::new_v4()));
        chart.save(&path).map_err(InferenceError::Graph)?;
        Ok(path)
    }
}

impl Inference for DrService {
    fn process_image(&self, bytes: &[u8]) -> Result<Prediction, InferenceError> {
        let image = image::load_from_memory(bytes).map_err(InferenceError::Decode)?;

        let scores = match &self.model {
            Some(model) => self.infer(model, &preprocess(&image))?,
            None => demo_scores(bytes),
        };

        let (best, confidence) = scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or(InferenceError::Failed)?;

        // Chart rendering is best effort; the classification stands without it.
        let graph_path = match self.render_graph(&scores) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("Skipping probability graph: {err}");
                None
            }
        };

        Ok(Prediction {
            label: Severity::ALL[best].label().to_string(),
            confidence,
            scores: Severity::ALL
                .iter()
                .zip(&scores)
                .map(|(severity, score)| (severity.label().to_string(), *score))
                .collect(),
            graph_path,
        })
    }

    fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn class_labels(&self) -> &[&'static str] {
        &crate::models::CLASS_LABELS
    }
}

fn load_model(path: &Path) -> TractResult<OnnxModel> {
    tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
            ),
        )?
        .into_optimized()?
        .into_runnable()
}

/// Aspect-preserving resize to fit 224x224, centered on a black canvas.
fn preprocess(image: &DynamicImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = if width > height {
        (INPUT_SIZE, ((INPUT_SIZE * height) / width).max(1))
    } else {
        (((INPUT_SIZE * width) / height).max(1), INPUT_SIZE)
    };

    let resized = image.resize(new_width, new_height, FilterType::Triangle);

    let mut canvas = RgbaImage::new(INPUT_SIZE, INPUT_SIZE);
    let (resized_width, resized_height) = resized.dimensions();
    let pad_x = (INPUT_SIZE - resized_width) / 2;
    let pad_y = (INPUT_SIZE - resized_height) / 2;

    for y in 0..resized_height {
        for x in 0..resized_width {
            let pixel = resized.get_pixel(x, y);
            canvas.put_pixel(
                x + pad_x,
                y + pad_y,
                image::Rgba([pixel[0], pixel[1], pixel[2], 255]),
            );
        }
    }

    canvas
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Demo-mode stand-in: a deterministic distribution derived from the upload
/// bytes, so the same image always maps to the same grade.
fn demo_scores(bytes: &[u8]) -> Vec<f32> {
    let seed = bytes
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64));
    let winner = (seed % Severity::ALL.len() as u64) as usize;

    let mut scores = vec![0.06; Severity::ALL.len()];
    scores[winner] = 1.0 - 0.06 * (Severity::ALL.len() - 1) as f32;
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 30, 60]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
        buf.into_inner()
    }

    fn demo_service(media_root: &Path) -> DrService {
        DrService::new(Path::new("no-such-model.onnx"), media_root).unwrap()
    }

    #[test]
    fn missing_model_file_means_demo_mode() {
        let media = tempdir().unwrap();
        let service = demo_service(media.path());
        assert!(!service.model_loaded());
    }

    #[test]
    fn demo_prediction_is_deterministic() {
        let media = tempdir().unwrap();
        let service = demo_service(media.path());
        let bytes = png_bytes(64, 64);

        let first = service.process_image(&bytes).unwrap();
        let second = service.process_image(&bytes).unwrap();
        assert_eq!(first.label, second.label);
        assert_eq!(first.confidence, second.confidence);
    }

    #[test]
    fn scores_cover_all_classes_and_sum_to_one() {
        let media = tempdir().unwrap();
        let service = demo_service(media.path());

        let prediction = service.process_image(&png_bytes(64, 48)).unwrap();
        assert_eq!(prediction.scores.len(), Severity::ALL.len());
        let total: f32 = prediction.scores.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(Severity::from_label(&prediction.label).is_some());
    }

    #[test]
    fn graph_is_written_under_the_media_root() {
        let media = tempdir().unwrap();
        let service = demo_service(media.path());

        let prediction = service.process_image(&png_bytes(32, 32)).unwrap();
        let graph = prediction.graph_path.expect("graph should be rendered");
        assert!(graph.starts_with(media.path().join("graphs")));
        assert!(graph.exists());
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let media = tempdir().unwrap();
        let service = demo_service(media.path());

        let err = service.process_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[test]
    fn preprocess_pads_to_a_square_input() {
        let wide = image::DynamicImage::ImageRgb8(RgbImage::new(640, 120));
        let canvas = preprocess(&wide);
        assert_eq!(canvas.dimensions(), (INPUT_SIZE, INPUT_SIZE));

        let tall = image::DynamicImage::ImageRgb8(RgbImage::new(90, 800));
        let canvas = preprocess(&tall);
        assert_eq!(canvas.dimensions(), (INPUT_SIZE, INPUT_SIZE));
    }

    #[test]
    fn softmax_is_a_probability_distribution() {
        let probs = softmax(&[2.0, 1.0, 0.1, -1.0, 0.5]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(
            probs
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(i, _)| i),
            Some(0)
        );
    }
}
