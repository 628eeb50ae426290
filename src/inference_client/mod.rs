//! InferenceClient - Face and Person Inference Adapter
//!
//! ## Responsibilities
//!
//! - Collaborator contracts for face analysis and person detection
//! - HTTP adapter that posts JPEG frames to an inference service
//! - Blocking facade over the async client for the acquisition thread
//!
//! ## Endpoints
//!
//! - `POST {base}/v1/faces`   -> `{"faces": [{"bbox": [x1,y1,x2,y2], "score", "embedding"}]}`
//! - `POST {base}/v1/objects` -> `{"objects": [{"bbox": [x1,y1,x2,y2], "score", "label"}]}`

use crate::annotate::encode_jpeg;
use crate::error::{Error, Result};
use crate::models::{BBox, Detection, Frame};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tokio::runtime::Handle;

/// Minimum detector confidence for a person box
pub const PERSON_SCORE_THRESHOLD: f32 = 0.5;

/// A detected face with its identity embedding
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: BBox,
    pub score: f32,
    /// Unit-length embedding
    pub embedding: Vec<f32>,
}

/// Face detection + embedding extraction
pub trait FaceAnalyzer: Send + Sync {
    fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceDetection>>;
}

/// Generic object detector restricted to people
pub trait PersonDetector: Send + Sync {
    fn detect_persons(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

#[derive(Debug, Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<FaceItem>,
}

#[derive(Debug, Deserialize)]
struct FaceItem {
    bbox: [f32; 4],
    score: f32,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ObjectsResponse {
    #[serde(default)]
    objects: Vec<ObjectItem>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    bbox: [f32; 4],
    score: f32,
    label: String,
}

fn to_bbox(b: [f32; 4]) -> BBox {
    BBox::new(b[0] as i32, b[1] as i32, b[2] as i32, b[3] as i32)
}

/// Scale to unit length (zero vectors are returned unchanged)
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// HTTP inference adapter
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
    runtime: Handle,
}

impl InferenceClient {
    /// Create new inference client bound to the current tokio runtime
    pub fn new(base_url: String, runtime: Handle) -> Result<Self> {
        Self::with_timeout(base_url, runtime, Duration::from_secs(5))
    }

    /// Create new inference client with custom timeout
    pub fn with_timeout(base_url: String, runtime: Handle, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            runtime,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check inference service health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_frame<T: serde::de::DeserializeOwned>(&self, path: &str, jpeg: Vec<u8>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let form = Form::new().part(
            "image",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Inference(format!(
                "{} failed: {}",
                path,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    pub async fn faces(&self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        let jpeg = encode_jpeg(frame)?;
        let parsed: FacesResponse = self.post_frame("/v1/faces", jpeg).await?;
        Ok(parsed
            .faces
            .into_iter()
            .map(|f| FaceDetection {
                bbox: to_bbox(f.bbox),
                score: f.score,
                embedding: normalize(f.embedding),
            })
            .collect())
    }

    pub async fn persons(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = encode_jpeg(frame)?;
        let parsed: ObjectsResponse = self.post_frame("/v1/objects", jpeg).await?;
        Ok(filter_persons(parsed.objects))
    }
}

fn filter_persons(objects: Vec<ObjectItem>) -> Vec<Detection> {
    objects
        .into_iter()
        .filter(|o| o.label == "person" && o.score > PERSON_SCORE_THRESHOLD)
        .map(|o| Detection {
            bbox: to_bbox(o.bbox),
            score: o.score,
        })
        .collect()
}

// Called from the acquisition thread, never from a runtime worker.
impl FaceAnalyzer for InferenceClient {
    fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        self.runtime.block_on(self.faces(frame))
    }
}

impl PersonDetector for InferenceClient {
    fn detect_persons(&self, frame: &Frame) -> Result<Vec<Detection>> {
        self.runtime.block_on(self.persons(frame))
    }
}
