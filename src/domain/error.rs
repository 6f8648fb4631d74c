use serde_json::json;
use thiserror::Error;

/// Core error taxonomy surfaced by the indexing engine.
///
/// Parse failures are recorded per file and never escape as API errors;
/// everything else maps onto a coded [`ApiError`] envelope for callers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Parse error in {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Unknown path: {0}")]
    UnknownPath(String),

    #[error("Invalid range: requested lines {start}..{end} in file of {total} lines")]
    InvalidRange { start: u32, end: u32, total: u32 },

    #[error("Stale epoch: pinned {pinned}, current {current}")]
    StaleEpoch { pinned: u64, current: u64 },

    #[error("Write contention on storage: {0}")]
    WriteContention(String),

    #[error("Watcher overflow: {dropped} events dropped")]
    WatcherOverflow { dropped: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lexical index error: {0}")]
    Lexical(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn lexical(msg: impl Into<String>) -> Self {
        Self::Lexical(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity(_) | Self::Storage(_))
    }

    /// Render this error as the `{code, message, remediation, context}`
    /// envelope handed back to tool-layer callers.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Parse { path, .. } => ApiError {
                code: "PARSE_ERROR",
                message: self.to_string(),
                remediation: "The file was indexed lexically only.".to_string(),
                context: json!({ "path": path }),
            },
            Self::Integrity(_) => ApiError {
                code: "INTEGRITY_ERROR",
                message: self.to_string(),
                remediation: "The index was wiped and is being rebuilt; retry shortly."
                    .to_string(),
                context: json!({}),
            },
            Self::UnknownPath(path) => ApiError {
                code: "FILE_NOT_FOUND",
                message: self.to_string(),
                remediation: "Check the path or wait for the next epoch if recently added."
                    .to_string(),
                context: json!({ "path": path }),
            },
            Self::InvalidRange { start, end, total } => ApiError {
                code: "INVALID_RANGE",
                message: self.to_string(),
                remediation: format!("Request a range within 1..{total} lines."),
                context: json!({ "start": start, "end": end, "total": total }),
            },
            Self::StaleEpoch { pinned, current } => ApiError {
                code: "STALE_EPOCH",
                message: self.to_string(),
                remediation: format!("Re-issue the query at epoch {current} or later."),
                context: json!({ "pinned": pinned, "current": current }),
            },
            Self::WriteContention(_) => ApiError {
                code: "WRITE_CONTENTION",
                message: self.to_string(),
                remediation: "Retry the operation; writes are serialized.".to_string(),
                context: json!({}),
            },
            Self::WatcherOverflow { dropped } => ApiError {
                code: "WATCHER_OVERFLOW",
                message: self.to_string(),
                remediation: "Run a full reindex to recover missed changes.".to_string(),
                context: json!({ "dropped": dropped }),
            },
            Self::Storage(_) | Self::Lexical(_) | Self::Config(_) | Self::Io(_) => ApiError {
                code: "INTERNAL",
                message: self.to_string(),
                remediation: "Retry; if the error persists, restart the daemon.".to_string(),
                context: json!({}),
            },
        }
    }
}

/// Caller-facing error envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub remediation: String,
    pub context: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_path_maps_to_file_not_found() {
        let err = CoreError::UnknownPath("src/gone.py".to_string());
        let api = err.to_api_error();
        assert_eq!(api.code, "FILE_NOT_FOUND");
        assert_eq!(api.context["path"], "src/gone.py");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CoreError::integrity("orphans").is_fatal());
        assert!(!CoreError::UnknownPath("x".into()).is_fatal());
    }
}
