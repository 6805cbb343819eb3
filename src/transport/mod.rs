//! Request plumbing between the capture client and the detection service.
//!
//! Every remote call goes through the [`Transport`] trait so the session
//! state machine can be driven by the real HTTP client or by a scripted
//! stand-in. Requests are plain data; responses come back as raw JSON bytes
//! and are interpreted by [`payload`].

use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::error::CaptureError;

pub mod form;
pub mod http;
pub mod payload;

pub use form::{FilePart, Form};
pub use http::HttpTransport;
pub use payload::{
    Ack, Driver, FirstAnalysis, RecordId, RejectionAck, ViolationCandidate, ViolationRecord,
    ZoomAnalysis,
};

/// Remote operations exposed by the detection service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    AnalyzeFirst,
    AnalyzeZoom,
    RecordViolation,
    RecordCleanObservation,
    RejectDetection,
    Detect,
    LearningStats,
    Retrain,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::AnalyzeFirst,
        Endpoint::AnalyzeZoom,
        Endpoint::RecordViolation,
        Endpoint::RecordCleanObservation,
        Endpoint::RejectDetection,
        Endpoint::Detect,
        Endpoint::LearningStats,
        Endpoint::Retrain,
    ];

    /// Service route name, as used in config overrides.
    pub fn name(self) -> &'static str {
        match self {
            Endpoint::AnalyzeFirst => "analyze_first_image",
            Endpoint::AnalyzeZoom => "analyze_zoom_image",
            Endpoint::RecordViolation => "record_violation",
            Endpoint::RecordCleanObservation => "record_ok_detection",
            Endpoint::RejectDetection => "reject_detection",
            Endpoint::Detect => "detect",
            Endpoint::LearningStats => "learning_stats",
            Endpoint::Retrain => "retrain_model",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.name() == name)
    }

    pub fn default_path(self) -> &'static str {
        match self {
            Endpoint::AnalyzeFirst => "/analyze_first_image",
            Endpoint::AnalyzeZoom => "/analyze_zoom_image",
            Endpoint::RecordViolation => "/record_violation",
            Endpoint::RecordCleanObservation => "/record_ok_detection",
            Endpoint::RejectDetection => "/reject_detection",
            Endpoint::Detect => "/detect",
            Endpoint::LearningStats => "/learning_stats",
            Endpoint::Retrain => "/retrain_model",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Form),
    Json(Value),
}

/// A single request to the detection service.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub endpoint: Endpoint,
    pub method: Method,
    pub body: RequestBody,
}

impl Request {
    pub fn get(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            method: Method::Get,
            body: RequestBody::Empty,
        }
    }

    pub fn post(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            method: Method::Post,
            body: RequestBody::Empty,
        }
    }

    pub fn form(endpoint: Endpoint, form: Form) -> Self {
        Self {
            endpoint,
            method: Method::Post,
            body: RequestBody::Form(form),
        }
    }

    pub fn json(endpoint: Endpoint, body: Value) -> Self {
        Self {
            endpoint,
            method: Method::Post,
            body: RequestBody::Json(body),
        }
    }

    pub fn form_body(&self) -> Option<&Form> {
        match &self.body {
            RequestBody::Form(form) => Some(form),
            _ => None,
        }
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Sends requests to the detection service and returns the raw response body.
///
/// Calls block until the service answers or the transport gives up; there is
/// no cancellation. Implementations must be shareable with the stats poller
/// thread.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> Result<Vec<u8>, CaptureError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, request: Request) -> Result<Vec<u8>, CaptureError> {
        (**self).send(request)
    }
}

/// An operator-supplied photo, read fully into memory before upload.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CaptureError> {
        let invalid = |reason: String| CaptureError::InvalidImage {
            path: path.display().to_string(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
        if bytes.is_empty() {
            return Err(invalid("file is empty".to_string()));
        }
        let content_type = image::ImageFormat::from_path(path)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, content_type, bytes))
    }
}
