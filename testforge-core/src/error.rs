use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with the input document itself. Never retried.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("unsupported document format '{extension}' (expected docx, doc or pdf)")]
    UnsupportedFormat { extension: String },

    #[error("document could not be read: {reason}")]
    CorruptDocument { reason: String },

    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("document is {size_bytes} bytes, over the {limit_bytes} byte limit")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },
}

impl InputError {
    pub fn corrupt(reason: impl std::fmt::Display) -> Self {
        Self::CorruptDocument {
            reason: reason.to_string(),
        }
    }
}

/// Failures talking to a model backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("backend rejected credentials: {0}")]
    Auth(String),

    #[error("backend quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("backend returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("backend still failing after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<BackendError>,
    },
}

impl BackendError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Map an HTTP status code to a failure class
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", snippet(body, 300));
        match status {
            401 | 403 => Self::Auth(detail),
            429 => Self::QuotaExceeded(detail),
            408 | 500..=599 => Self::Transient(detail),
            _ => Self::Rejected(detail),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("malformed model output: {reason}")]
    MalformedModelOutput { reason: String },
}

impl ExtractionError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedModelOutput {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive XML error: {0}")]
    Xml(String),

    #[error("archive is missing required entry '{0}'")]
    Missing(String),
}

impl From<quick_xml::Error> for ArchiveError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

/// Top-level error of a generation run
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Failure class carried by `PipelineState::Failed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    BackendError,
    ExtractionError,
    ArchiveError,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InputError,
            Self::Backend(_) => ErrorKind::BackendError,
            Self::Extraction(_) => ErrorKind::ExtractionError,
            Self::Archive(_) => ErrorKind::ArchiveError,
        }
    }
}

/// First `max` chars of `s`, for log lines and error details
pub(crate) fn snippet(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
