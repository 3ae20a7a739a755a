use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Body of a successful `POST /studies/`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct UploadResult {
    pub message: String,
    pub result: i64,
    #[serde(rename = "task_created")]
    pub task_created: i64,
}

/// Body of `GET /results/{instance}`.
///
/// Every field falls back to its default when absent, the service answers
/// "not ready yet" with a sparse document.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisResult {
    pub success: bool,
    pub message: String,
    pub tags: Vec<Tag>,
    pub files: FileRefs,
    pub integrity: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Tag {
    pub results: String,
    pub presence: String,
    pub description: String,
    pub tag: String,
}

/// References to the artifacts generated for an instance.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FileRefs {
    pub sc: String,
    pub gsps: String,
    pub reports: Reports,
    #[serde(rename = "gt")]
    pub ground_truth: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Reports {
    pub pdf: String,
    pub dcm: String,
    pub sr: String,
}

/// HTTP-style view of a failure: the status code (0 when no response was
/// received) and whatever body came with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionError {
    pub status_code: u16,
    pub body: String,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "status {}", self.status_code)
        } else {
            write!(f, "status {}: {}", self.status_code, self.body)
        }
    }
}

#[derive(Error, Debug)]
pub enum QureError {
    #[error("Missing required configuration: {0}")]
    ConfigurationIncomplete(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("No suitable serializer found for part: {0}")]
    UnsupportedPartType(String),
    #[error("Request rejected with status {status}")]
    RemoteRejected { status: StatusCode, body: String },
    #[error("Request rejected: unauthorized")]
    Unauthorized,
    #[error("Connection failure: {0}")]
    ConnectionFailure(#[source] reqwest::Error),
    #[error("Invalid response body: {0}")]
    InvalidResponse(#[source] serde_json::Error),
    #[error("The analysis result does not reference a DICOM report")]
    MissingReportReference,
    #[error("Invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QureError {
    /// Rebuilds the HTTP-style failure carried by this error.
    pub fn connection_error(&self) -> ConnectionError {
        match self {
            QureError::RemoteRejected { status, body } => ConnectionError {
                status_code: status.as_u16(),
                body: body.clone(),
            },
            QureError::Unauthorized => ConnectionError {
                status_code: StatusCode::UNAUTHORIZED.as_u16(),
                body: String::new(),
            },
            QureError::ConnectionFailure(e) => ConnectionError {
                status_code: e.status().map(|s| s.as_u16()).unwrap_or(0),
                body: e.to_string(),
            },
            other => ConnectionError {
                status_code: 0,
                body: other.to_string(),
            },
        }
    }

    /// True for failures that happened below HTTP: timeouts, refused
    /// connections, broken streams.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, QureError::ConnectionFailure(_))
    }
}
