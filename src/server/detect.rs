//! Sign classification endpoint
//!
//! Decodes the still frame carried by `detect_sign`, crops the centre
//! square, scales it to the model input and hands it to a [`Classifier`].

use crate::detection::DetectionResult;
use crate::encode::decode_data_url;
use crate::signaling::SignalingMessage;
use image::imageops::{self, FilterType};
use log::{error, info, warn};
use std::error::Error;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Model input edge in pixels
pub const INPUT_SIZE: u32 = 64;

/// Model input: `INPUT_SIZE x INPUT_SIZE` pixels, 3 channels in BGR order,
/// row-major, values in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Tensor {
    pub const CHANNELS: usize = 3;

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

/// Classification engine
pub trait Classifier: Send + Sync {
    /// One score per class, in class-name order
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>, String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    ModelNotLoaded,
    NoImage,
    Preprocessing(String),
    InvalidPrediction,
    Classifier(String),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::ModelNotLoaded => write!(f, "Model not loaded"),
            DetectError::NoImage => write!(f, "No image data received"),
            DetectError::Preprocessing(_) => write!(f, "Image preprocessing failed"),
            DetectError::InvalidPrediction => write!(f, "Invalid prediction"),
            DetectError::Classifier(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for DetectError {}

/// Decode and normalise a data-URL still into the model input
pub fn preprocess(image_data: &str) -> Result<Tensor, DetectError> {
    let bytes = decode_data_url(image_data).map_err(|e| DetectError::Preprocessing(e.to_string()))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| DetectError::Preprocessing(e.to_string()))?
        .to_rgb8();

    let (width, height) = decoded.dimensions();
    let half = width.min(height) / 2;
    if half == 0 {
        return Err(DetectError::Preprocessing(format!("image too small: {}x{}", width, height)));
    }
    let x = width / 2 - half;
    let y = height / 2 - half;
    let roi = imageops::crop_imm(&decoded, x, y, half * 2, half * 2).to_image();
    let resized = imageops::resize(&roi, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let mut data = Vec::with_capacity((INPUT_SIZE * INPUT_SIZE) as usize * Tensor::CHANNELS);
    for pixel in resized.pixels() {
        let [r, g, b] = pixel.0;
        data.extend([b, g, r].iter().map(|&v| f32::from(v) / 255.0));
    }

    Ok(Tensor {
        width: INPUT_SIZE,
        height: INPUT_SIZE,
        data,
    })
}

/// Class labels: the sorted sub-directory names of `dir`
pub fn load_class_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Classifier plus its labels; cheap to clone
#[derive(Clone)]
pub struct Detector {
    classifier: Option<Arc<dyn Classifier>>,
    class_names: Arc<Vec<String>>,
}

impl Detector {
    pub fn new(classifier: Arc<dyn Classifier>, class_names: Vec<String>) -> Self {
        Self {
            classifier: Some(classifier),
            class_names: Arc::new(class_names),
        }
    }

    /// Detector without a model; every request fails with "Model not loaded"
    pub fn unloaded(class_names: Vec<String>) -> Self {
        Self {
            classifier: None,
            class_names: Arc::new(class_names),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn detect(&self, image_data: &str) -> Result<DetectionResult, DetectError> {
        let Some(ref classifier) = self.classifier else {
            return Err(DetectError::ModelNotLoaded);
        };
        if image_data.trim().is_empty() {
            return Err(DetectError::NoImage);
        }

        let input = preprocess(image_data)?;
        let scores = classifier.predict(&input).map_err(DetectError::Classifier)?;

        let (index, confidence) = scores
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
                Some((_, top)) if top >= score => best,
                _ if score.is_nan() => best,
                _ => Some((i, score)),
            })
            .ok_or(DetectError::InvalidPrediction)?;

        let label = self.class_names.get(index).ok_or(DetectError::InvalidPrediction)?;
        Ok(DetectionResult::new(label.clone(), confidence))
    }

    /// Reply message for a `detect_sign` request
    pub fn respond(&self, image_data: &str, request_id: Option<u64>) -> SignalingMessage {
        match self.detect(image_data) {
            Ok(result) => {
                info!("Detection: {} ({:.2})", result.label, result.confidence);
                SignalingMessage::DetectionResult {
                    label: result.label,
                    confidence: result.confidence,
                    request_id,
                }
            }
            Err(e) => {
                match e {
                    DetectError::Preprocessing(ref reason) => warn!("Error preprocessing image: {}", reason),
                    ref other => error!("{}", other),
                }
                SignalingMessage::DetectionError {
                    error: e.to_string(),
                    request_id,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::encode::{EncoderConfig, JpegEncoder};
    use std::time::Instant;

    struct FixedClassifier(Vec<f32>);

    impl Classifier for FixedClassifier {
        fn predict(&self, input: &Tensor) -> Result<Vec<f32>, String> {
            assert_eq!(input.data.len(), 64 * 64 * 3);
            Ok(self.0.clone())
        }
    }

    /// Left half pure red, right half pure blue
    fn split_frame(width: u32, height: u32) -> String {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _y in 0..height {
            for x in 0..width {
                if x < width / 2 {
                    data.extend([255, 0, 0]);
                } else {
                    data.extend([0, 0, 255]);
                }
            }
        }
        let frame = Frame {
            width,
            height,
            data,
            timestamp: Instant::now(),
            sequence: 0,
        };
        JpegEncoder::new(EncoderConfig { quality: 95 })
            .encode_data_url(&frame)
            .unwrap()
    }

    fn labels() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "HELLO".to_string()]
    }

    #[test]
    fn preprocess_produces_model_input() {
        let tensor = preprocess(&split_frame(160, 120)).unwrap();
        assert_eq!((tensor.width, tensor.height), (INPUT_SIZE, INPUT_SIZE));
        assert_eq!(tensor.data.len(), 64 * 64 * 3);
        assert!(tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));

        // Red on the left ends up in the last (R) channel
        let [b, _, r] = tensor.pixel(4, 32);
        assert!(r > 0.8 && b < 0.2, "left pixel r={} b={}", r, b);
        let [b, _, r] = tensor.pixel(60, 32);
        assert!(b > 0.8 && r < 0.2, "right pixel r={} b={}", r, b);
    }

    #[test]
    fn preprocess_rejects_garbage() {
        assert!(matches!(
            preprocess("data:image/jpeg;base64,bm90IGFuIGltYWdl"),
            Err(DetectError::Preprocessing(_))
        ));
    }

    #[test]
    fn unloaded_detector_reports_model_not_loaded() {
        let detector = Detector::unloaded(labels());
        assert_eq!(
            detector.respond(&split_frame(32, 32), Some(3)),
            SignalingMessage::DetectionError {
                error: "Model not loaded".to_string(),
                request_id: Some(3),
            }
        );
    }

    #[test]
    fn argmax_picks_label() {
        let detector = Detector::new(Arc::new(FixedClassifier(vec![0.05, 0.03, 0.92])), labels());
        assert_eq!(
            detector.respond(&split_frame(64, 48), Some(1)),
            SignalingMessage::DetectionResult {
                label: "HELLO".to_string(),
                confidence: 0.92,
                request_id: Some(1),
            }
        );
    }

    #[test]
    fn index_past_labels_is_invalid() {
        let detector = Detector::new(Arc::new(FixedClassifier(vec![0.1, 0.1, 0.1, 0.7])), labels());
        assert_eq!(detector.detect(&split_frame(32, 32)), Err(DetectError::InvalidPrediction));
    }

    #[test]
    fn empty_image_is_rejected() {
        let detector = Detector::new(Arc::new(FixedClassifier(vec![1.0])), labels());
        assert_eq!(
            detector.detect("").unwrap_err().to_string(),
            "No image data received"
        );
        assert_eq!(
            detector.detect("data:image/jpeg;base64,AAAA").unwrap_err().to_string(),
            "Image preprocessing failed"
        );
    }

    #[test]
    fn class_names_are_sorted_directories() {
        let dir = std::env::temp_dir().join(format!("signbridge-classes-{}", uuid::Uuid::new_v4()));
        for name in ["THANKS", "HELLO", "B"] {
            std::fs::create_dir_all(dir.join(name)).unwrap();
        }
        std::fs::write(dir.join("README"), b"not a class").unwrap();

        let names = load_class_names(&dir).unwrap();
        assert_eq!(names, vec!["B", "HELLO", "THANKS"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
