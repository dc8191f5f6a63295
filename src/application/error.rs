use thiserror::Error;

/// Errors surfaced by the query, mutation and bulk layers.
///
/// `Clone` because one transport outcome is shared by every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("transport failure{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("resource not found: {path}")]
    NotFound { path: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("response could not be decoded: {0}")]
    Decode(String),
    #[error("document render failed: {0}")]
    Render(String),
    #[error("archive assembly failed: {0}")]
    Archive(String),
    /// A fault inside this process: a panicked task or an unusable clock.
    #[error("internal failure: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (status {code})")).unwrap_or_default()
}

impl AppError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Transport { .. } => "transport",
            AppError::NotFound { .. } => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Decode(_) => "decode",
            AppError::Render(_) => "render",
            AppError::Archive(_) => "archive",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::decode(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_message_mentions_status_when_known() {
        let error = AppError::transport(Some(502), "bad gateway");
        assert_eq!(error.to_string(), "transport failure (status 502): bad gateway");

        let error = AppError::transport(None, "timed out");
        assert_eq!(error.to_string(), "transport failure: timed out");
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AppError::not_found("/x").kind(), "not_found");
        assert_eq!(AppError::validation("bad").kind(), "validation");
        assert_eq!(AppError::internal("task panicked").kind(), "internal");
    }
}
