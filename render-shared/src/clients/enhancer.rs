use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, ErrorCode};

pub const DEFAULT_MODEL: &str = "realesrgan-x4plus";

/// What the enhancer should do with the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EnhanceMode {
    /// `POST /enhance`: super-resolution only.
    SuperResolution { tta_mode: bool, tilesize: u32 },
    /// `POST /enhance_combined`: optional low-light pass, then super-resolution.
    Combined { enhance_low_light: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhanceParams {
    pub model_name: String,
    #[serde(flatten)]
    pub mode: EnhanceMode,
}

impl Default for EnhanceParams {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            mode: EnhanceMode::SuperResolution { tta_mode: false, tilesize: 0 },
        }
    }
}

/// Result bytes plus whatever the enhancer reported about the run.
#[derive(Debug, Clone)]
pub struct EnhancedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub report: EnhancementReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancementReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhancements_applied: Option<String>,
}

impl EnhancementReport {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            // The service reports "1.234s"; accept the bare number too.
            processing_time_secs: text("x-processing-time")
                .and_then(|s| s.trim_end_matches('s').parse().ok()),
            model_used: text("x-model-used"),
            scale_factor: text("x-scale-factor").and_then(|s| s.trim_end_matches('x').parse().ok()),
            method: text("x-method"),
            enhancements_applied: text("x-enhancements-applied"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnhancerError {
    #[error("enhancer timed out after {0:?}")]
    Timeout(Duration),

    #[error("enhancer unreachable: {0}")]
    Unreachable(String),

    #[error("enhancer returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("enhancer response unreadable: {0}")]
    InvalidResponse(String),
}

/// Clients see a fixed message per code; the upstream detail only goes to the log.
impl From<EnhancerError> for AppError {
    fn from(err: EnhancerError) -> Self {
        tracing::error!(error = %err, "enhancer call failed");
        match err {
            EnhancerError::Timeout(_) | EnhancerError::Unreachable(_) => {
                AppError::new(ErrorCode::UpstreamUnavailable, "image enhancement service unavailable")
            }
            EnhancerError::Rejected { .. } | EnhancerError::InvalidResponse(_) => {
                AppError::new(ErrorCode::EnhancementFailed, "image enhancement service failed")
            }
        }
    }
}

/// HTTP client for the external image-enhancement service.
#[derive(Debug, Clone)]
pub struct EnhancerClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl EnhancerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnhancerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EnhancerError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(url = %base_url, timeout_secs = timeout.as_secs(), "enhancer client initialized");

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn enhance(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        params: &EnhanceParams,
    ) -> Result<EnhancedImage, EnhancerError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| EnhancerError::InvalidResponse(format!("invalid content type: {e}")))?;

        let (endpoint, form) = match &params.mode {
            EnhanceMode::SuperResolution { tta_mode, tilesize } => (
                "enhance",
                Form::new()
                    .part("file", part)
                    .text("model_name", params.model_name.clone())
                    .text("gpu_id", "0")
                    .text("tta_mode", tta_mode.to_string())
                    .text("tilesize", tilesize.to_string()),
            ),
            EnhanceMode::Combined { enhance_low_light } => (
                "enhance_combined",
                Form::new()
                    .part("file", part)
                    .text("model_name", params.model_name.clone())
                    .text("enhance_low_light", enhance_low_light.to_string()),
            ),
        };

        let url = format!("{}/{}", self.base_url, endpoint);
        let started = std::time::Instant::now();

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnhancerError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let report = EnhancementReport::from_headers(response.headers());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?.to_vec();

        if bytes.is_empty() {
            return Err(EnhancerError::InvalidResponse("empty image body".to_string()));
        }

        tracing::info!(
            endpoint,
            model = %params.model_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_bytes = bytes.len(),
            "enhancement completed"
        );

        Ok(EnhancedImage { bytes, content_type, report })
    }

    /// Model catalogue as reported by the service, passed through unchanged.
    pub async fn models(&self) -> Result<serde_json::Value, EnhancerError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnhancerError::Rejected { status: status.as_u16(), body: truncate(&body, 300) });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| EnhancerError::InvalidResponse(e.to_string()))
    }

    pub async fn health(&self) -> Result<(), EnhancerError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EnhancerError::Rejected { status: response.status().as_u16(), body: String::new() })
        }
    }

    fn classify(&self, err: reqwest::Error) -> EnhancerError {
        if err.is_timeout() {
            EnhancerError::Timeout(self.timeout)
        } else if err.is_connect() || err.is_request() {
            EnhancerError::Unreachable(err.to_string())
        } else {
            EnhancerError::InvalidResponse(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
