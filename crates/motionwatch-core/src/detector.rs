//! Object detection.
//!
//! The model itself is a black box behind [`InferenceBackend`]. A
//! [`ModelHandle`] is loaded once and shared read-only; the
//! [`DetectorAdapter`] turns raw detections into a [`DetectionOutcome`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::model::{DetectionOutcome, Payload};
use crate::{Error, Result};

/// A payload decoded into pixels, with its original encoding kept for
/// backends that want the compressed bytes.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Source file name.
    pub filename: String,
    /// MIME type of `encoded`.
    pub content_type: String,
    /// Original bytes.
    pub encoded: Vec<u8>,
    /// RGB pixels.
    pub pixels: RgbImage,
}

impl DecodedImage {
    /// Decodes a payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is empty, truncated, not an
    /// image, or fails to decode.
    pub fn decode(payload: &Payload) -> Result<Self> {
        if let Some(defect) = payload.defect() {
            return Err(Error::Decode(defect));
        }
        let format = image::guess_format(&payload.data)
            .map_err(|e| Error::Decode(format!("{}: {e}", payload.filename)))?;
        let pixels = image::load_from_memory_with_format(&payload.data, format)
            .map_err(|e| Error::Decode(format!("{}: {e}", payload.filename)))?
            .to_rgb8();
        Ok(Self {
            filename: payload.filename.clone(),
            content_type: format.to_mime_type().to_string(),
            encoded: payload.data.clone(),
            pixels,
        })
    }
}

/// One raw detection as reported by a backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    /// Class name, if the backend reports names.
    #[serde(default)]
    pub label: Option<String>,
    /// Class index, if the backend reports indices.
    #[serde(default)]
    pub class_id: Option<usize>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Runs the detection model.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Returns every detection in the image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inference`] if the model cannot be run.
    async fn infer(&self, image: &DecodedImage) -> Result<Vec<Detection>>;
}

/// Inference server reached over HTTP.
///
/// Posts the image as multipart form data to `<endpoint>/v1/detect` and
/// expects `{"detections": [{"label"?, "class_id"?, "confidence"}]}`.
#[derive(Debug, Clone)]
pub struct HttpInferenceBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpInferenceBackend {
    /// Creates a backend for the server at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/v1/detect", endpoint.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceBackend {
    async fn infer(&self, image: &DecodedImage) -> Result<Vec<Detection>> {
        let part = Part::bytes(image.encoded.clone())
            .file_name(image.filename.clone())
            .mime_str(&image.content_type)
            .map_err(|e| Error::Inference(e.to_string()))?;
        let form = Form::new().part("image", part);

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Inference(format!(
                "inference server returned {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::Inference(format!("invalid response: {e}")))?;
        Ok(body.detections)
    }
}

/// Loaded model: a backend plus the class-name table.
pub struct ModelHandle {
    backend: Box<dyn InferenceBackend>,
    labels: Vec<String>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("labels", &self.labels.len())
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    /// Wraps an already constructed backend.
    #[must_use]
    pub fn new(backend: impl InferenceBackend + 'static, labels: Vec<String>) -> Self {
        Self {
            backend: Box::new(backend),
            labels,
        }
    }

    /// Connects the HTTP backend and reads the class-name file, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the labels file cannot be read.
    pub fn load(endpoint: &str, labels_path: Option<&Path>) -> Result<Self> {
        let labels = match labels_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
                parse_labels(&text)
            }
            None => Vec::new(),
        };
        tracing::info!(endpoint, labels = labels.len(), "Detection model loaded");
        Ok(Self::new(HttpInferenceBackend::new(endpoint)?, labels))
    }

    /// Resolves the class name of a detection.
    #[must_use]
    pub fn label_of<'a>(&'a self, detection: &'a Detection) -> Option<&'a str> {
        detection
            .label
            .as_deref()
            .or_else(|| detection.class_id.and_then(|id| self.labels.get(id)).map(String::as_str))
    }
}

/// Parses a `coco.names` style file: one class name per line, index = line.
#[must_use]
pub fn parse_labels(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
    while labels.last().is_some_and(String::is_empty) {
        labels.pop();
    }
    labels
}

/// Applies the threshold and target labels to model output.
#[derive(Debug, Clone)]
pub struct DetectorAdapter {
    model: Arc<ModelHandle>,
    threshold: f32,
    targets: HashSet<String>,
    timeout: Duration,
}

impl DetectorAdapter {
    /// Creates an adapter. Labels are matched case-insensitively.
    #[must_use]
    pub fn new(model: Arc<ModelHandle>, threshold: f32, targets: &[String], timeout: Duration) -> Self {
        Self {
            model,
            threshold,
            targets: targets.iter().map(|t| t.to_lowercase()).collect(),
            timeout,
        }
    }

    /// Classifies one image.
    ///
    /// Never fails: backend errors and timeouts are
    /// [`DetectionOutcome::Inconclusive`].
    pub async fn classify(&self, image: &DecodedImage) -> DetectionOutcome {
        let started = std::time::Instant::now();
        let detections =
            match tokio::time::timeout(self.timeout, self.model.backend.infer(image)).await {
                Ok(Ok(detections)) => detections,
                Ok(Err(e)) => return DetectionOutcome::Inconclusive(e.to_string()),
                Err(_) => {
                    return DetectionOutcome::Inconclusive(format!(
                        "inference timed out after {:?}",
                        self.timeout
                    ));
                }
            };

        let best = detections
            .iter()
            .filter(|d| d.confidence >= self.threshold)
            .filter_map(|d| {
                let label = self.model.label_of(d)?;
                self.targets
                    .contains(&label.to_lowercase())
                    .then_some((label, d.confidence))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        tracing::debug!(
            filename = %image.filename,
            detections = detections.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Inference finished"
        );

        match best {
            Some((label, confidence)) => DetectionOutcome::Positive {
                label: label.to_string(),
                confidence,
            },
            None => DetectionOutcome::Negative,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct Fixed(Vec<Detection>);

    #[async_trait]
    impl InferenceBackend for Fixed {
        async fn infer(&self, _: &DecodedImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl InferenceBackend for Slow {
        async fn infer(&self, _: &DecodedImage) -> Result<Vec<Detection>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn png() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn decoded() -> DecodedImage {
        DecodedImage::decode(&Payload {
            filename: "snap.png".into(),
            content_type: Some("image/png".into()),
            expected_size: None,
            data: png(),
        })
        .unwrap()
    }

    fn det(label: Option<&str>, class_id: Option<usize>, confidence: f32) -> Detection {
        Detection {
            label: label.map(Into::into),
            class_id,
            confidence,
        }
    }

    fn adapter(backend: impl InferenceBackend + 'static) -> DetectorAdapter {
        let labels = parse_labels("person\nbicycle\ncar\n\n");
        DetectorAdapter::new(
            Arc::new(ModelHandle::new(backend, labels)),
            0.5,
            &["person".to_string(), "Cat".to_string()],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_decode_produces_rgb() {
        let image = decoded();
        assert_eq!(image.pixels.dimensions(), (8, 8));
        assert_eq!(image.content_type, "image/png");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = DecodedImage::decode(&Payload {
            filename: "snap.jpg".into(),
            content_type: None,
            expected_size: None,
            data: b"definitely not a jpeg".to_vec(),
        });
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_parse_labels_keeps_indices() {
        let labels = parse_labels("person\n\ncar\n\n");
        assert_eq!(labels, vec!["person", "", "car"]);
    }

    #[tokio::test]
    async fn test_best_target_wins() {
        let outcome = adapter(Fixed(vec![
            det(Some("person"), None, 0.6),
            det(Some("car"), None, 0.99),
            det(None, Some(0), 0.8),
            det(Some("cat"), None, 0.7),
        ]))
        .classify(&decoded())
        .await;
        assert_eq!(
            outcome,
            DetectionOutcome::Positive {
                label: "person".into(),
                confidence: 0.8
            }
        );
    }

    #[tokio::test]
    async fn test_below_threshold_is_negative() {
        let outcome = adapter(Fixed(vec![det(Some("person"), None, 0.49)]))
            .classify(&decoded())
            .await;
        assert_eq!(outcome, DetectionOutcome::Negative);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let outcome = adapter(Fixed(vec![det(Some("person"), None, 0.5)]))
            .classify(&decoded())
            .await;
        assert!(matches!(outcome, DetectionOutcome::Positive { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_inconclusive() {
        let outcome = adapter(Slow).classify(&decoded()).await;
        assert!(matches!(outcome, DetectionOutcome::Inconclusive(r) if r.contains("timed out")));
    }

    #[tokio::test]
    async fn test_http_backend_positive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "detections": [
                    {"class_id": 0, "confidence": 0.87},
                    {"label": "car", "confidence": 0.95}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let labels = parse_labels("person\nbicycle\ncar\n");
        let model = ModelHandle::new(HttpInferenceBackend::new(&server.uri()).unwrap(), labels);
        let adapter = DetectorAdapter::new(
            Arc::new(model),
            0.5,
            &["person".to_string()],
            Duration::from_secs(5),
        );

        match adapter.classify(&decoded()).await {
            DetectionOutcome::Positive { label, confidence } => {
                assert_eq!(label, "person");
                assert!(confidence >= 0.5);
            }
            other => panic!("expected positive, got {other:?}"),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_http_backend_error_is_inconclusive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/detect"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let model = ModelHandle::new(HttpInferenceBackend::new(&server.uri()).unwrap(), Vec::new());
        let adapter = DetectorAdapter::new(
            Arc::new(model),
            0.5,
            &["person".to_string()],
            Duration::from_secs(5),
        );
        let outcome = adapter.classify(&decoded()).await;
        assert!(matches!(outcome, DetectionOutcome::Inconclusive(r) if r.contains("503")));
    }

    #[test]
    fn test_load_reads_labels_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coco.names");
        std::fs::write(&path, "person\nbicycle\n").unwrap();
        let model = ModelHandle::load("http://localhost:9", Some(path.as_path())).unwrap();
        assert_eq!(model.label_of(&det(None, Some(1), 0.9)), Some("bicycle"));
        assert!(ModelHandle::load("http://localhost:9", Some(dir.path().join("nope").as_path())).is_err());
    }
}
