use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubErrorKind {
    ModelUnavailable,
    Integrity,
    Format,
    FeedUnavailable,
    StorageUnavailable,
    InvalidInput,
    Internal,
}

impl HubErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HubErrorKind::ModelUnavailable => "model_unavailable",
            HubErrorKind::Integrity => "integrity",
            HubErrorKind::Format => "format",
            HubErrorKind::FeedUnavailable => "feed_unavailable",
            HubErrorKind::StorageUnavailable => "storage_unavailable",
            HubErrorKind::InvalidInput => "invalid_input",
            HubErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HubError {
    pub kind: HubErrorKind,
    pub message: String,
}

impl HubError {
    pub fn new(kind: HubErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is(&self, kind: HubErrorKind) -> bool {
        self.kind == kind
    }
}

pub fn model_unavailable(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::ModelUnavailable, message)
}

pub fn integrity_error(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::Integrity, message)
}

pub fn format_error(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::Format, message)
}

pub fn feed_unavailable(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::FeedUnavailable, message)
}

pub fn storage_unavailable(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::StorageUnavailable, message)
}

pub fn invalid_input(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::InvalidInput, message)
}

pub fn internal_error(message: impl Into<String>) -> HubError {
    HubError::new(HubErrorKind::Internal, message)
}
