use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::{Embedding, Pipeline};

/// Failures reported by the face extraction service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    /// The service rejected one of the submitted images (HTTP 400).
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("face service did not answer in time")]
    Timeout,

    #[error("face service unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected face service response: {0}")]
    Malformed(String),

    #[error("cannot read image {path}: {message}")]
    Image { path: String, message: String },
}

/// Contract of the external face analysis service.
pub trait Extractor: Send + Sync {
    /// Extract a single face embedding from an image.
    fn embed(&self, image: &Path, pipeline: Pipeline) -> Result<Embedding, ExtractError>;

    /// Similarity score between the faces found in two images.
    fn compare(&self, first: &Path, second: &Path, pipeline: Pipeline)
        -> Result<f64, ExtractError>;
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    similarity: f64,
}

#[derive(Debug, Deserialize)]
struct SingleResponse {
    face: SingleFace,
}

#[derive(Debug, Deserialize)]
struct SingleFace {
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: BTreeMap<String, Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Extractor talking to the face service over HTTP.
pub struct HttpExtractor {
    client: Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building face service client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        form: Form,
        field: &str,
    ) -> Result<T, ExtractError> {
        let url = format!("{}{}", self.base_url, endpoint);
        log::debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST {
            let body = resp.text().unwrap_or_default();
            return Err(validation_error(&body, field));
        }
        if !status.is_success() {
            return Err(ExtractError::Unavailable(format!(
                "{} returned {}",
                endpoint, status
            )));
        }

        resp.json::<T>().map_err(|e| {
            if e.is_timeout() {
                ExtractError::Timeout
            } else {
                ExtractError::Malformed(e.to_string())
            }
        })
    }
}

impl Extractor for HttpExtractor {
    fn embed(&self, image: &Path, pipeline: Pipeline) -> Result<Embedding, ExtractError> {
        let form = Form::new()
            .part("image", image_part(image)?)
            .text("pipeline", pipeline.as_str());

        let resp: SingleResponse = self.post("/api/get_single", form, "image")?;
        let embedding = Embedding::from_vec(resp.face.embedding);
        if !embedding.is_finite() {
            return Err(ExtractError::Malformed("embedding has non-finite values".into()));
        }
        Ok(embedding)
    }

    fn compare(
        &self,
        first: &Path,
        second: &Path,
        pipeline: Pipeline,
    ) -> Result<f64, ExtractError> {
        let form = Form::new()
            .part("image_1", image_part(first)?)
            .part("image_2", image_part(second)?)
            .text("pipeline", pipeline.as_str());

        // image_2 is the candidate selfie, the one worth reporting back
        let resp: VerificationResponse = self.post("/api/verification", form, "image_2")?;
        Ok(resp.similarity)
    }
}

fn image_part(path: &Path) -> Result<Part, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Image {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

fn transport_error(err: reqwest::Error) -> ExtractError {
    if err.is_timeout() {
        ExtractError::Timeout
    } else {
        ExtractError::Unavailable(err.to_string())
    }
}

fn first_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_message),
        _ => None,
    }
}

/// Turn a 400 body into a validation error, preferring the message of `field`.
pub(crate) fn validation_error(body: &str, field: &str) -> ExtractError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    if let Some(message) = parsed.errors.get(field).and_then(first_message) {
        return ExtractError::Validation {
            field: field.to_string(),
            message,
        };
    }

    if let Some((other, message)) = parsed
        .errors
        .iter()
        .find_map(|(k, v)| first_message(v).map(|m| (k.clone(), m)))
    {
        return ExtractError::Validation {
            field: other,
            message,
        };
    }

    ExtractError::Validation {
        field: field.to_string(),
        message: parsed
            .message
            .unwrap_or_else(|| "image rejected by face service".to_string()),
    }
}
