//! Remote recognition endpoint.

use crate::encode::EncodedImage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RECOGNIZE_URL: &str = "http://localhost:8000/api/recognize";
/// Multipart field carrying the face image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("recognition endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid recognition response: {0}")]
    InvalidResponse(String),
    #[error("upload did not settle within {0:?}")]
    TimedOut(Duration),
}

/// Identity returned by the recognition endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Destination for encoded face images.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(&self, image: EncodedImage) -> Result<Recognition, UploadError>;
}

/// Multipart `POST` to an HTTP recognition endpoint.
pub struct HttpUploadSink {
    client: reqwest::Client,
    url: String,
}

impl HttpUploadSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    fn transport(&self, source: reqwest::Error) -> UploadError {
        UploadError::Transport {
            url: self.url.clone(),
            source,
        }
    }
}

#[async_trait]
impl UploadSink for HttpUploadSink {
    async fn upload(&self, image: EncodedImage) -> Result<Recognition, UploadError> {
        let filename = image.filename();
        let mime = image.mime();
        let size = image.bytes.len();

        let part = Part::bytes(image.bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| self.transport(e))?;
        let form = Form::new().part(IMAGE_FIELD, part);

        tracing::debug!(url = %self.url, bytes = size, "posting face image");

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport(e))?;

        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_recognition(&body)
    }
}

fn parse_recognition(body: &str) -> Result<Recognition, UploadError> {
    serde_json::from_str(body).map_err(|e| UploadError::InvalidResponse(e.to_string()))
}
