use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("{0} is not configured")]
    ProviderUnavailable(String),

    #[error("content analyzer is not configured")]
    AnalysisUnavailable,

    #[error("search request failed: {0}")]
    SearchHttp(String),

    #[error("search provider returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("link resolution failed: {0}")]
    ResolverHttp(String),

    #[error("link resolver returned status {status}: {message}")]
    ResolverStatus { status: u16, message: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("download returned unexpected content: {0}")]
    UnexpectedContent(String),

    #[error("failed to read artifact {path}: {message}")]
    ArtifactRead { path: PathBuf, message: String },

    #[error("content analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("storage rejected artifact: {0}")]
    StorageRejected(String),

    #[error("storage returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("failed to read registry file at {0}")]
    #[diagnostic(help("check file permissions; the registry is never silently recreated"))]
    RegistryRead(PathBuf),

    #[error("registry file at {path} is corrupt: {message}")]
    #[diagnostic(help(
        "restore the registry from a backup or move it aside to start a fresh harvest"
    ))]
    RegistryCorrupt { path: PathBuf, message: String },

    #[error("failed to write registry: {0}")]
    RegistryWrite(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("invalid date range from {start} to {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HarvestError {
    /// Whether repeating the same call may succeed: connection-level failures
    /// and throttling/server-side statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::SearchHttp(_)
            | HarvestError::ResolverHttp(_)
            | HarvestError::DownloadFailed(_)
            | HarvestError::StorageFailed(_) => true,
            HarvestError::SearchStatus { status, .. }
            | HarvestError::ResolverStatus { status, .. }
            | HarvestError::DownloadStatus { status, .. }
            | HarvestError::StorageStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(HarvestError::DownloadFailed("reset".to_string()).is_transient());
        assert!(
            HarvestError::StorageStatus {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !HarvestError::DownloadStatus {
                status: 404,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!HarvestError::AnalysisUnavailable.is_transient());
        assert!(HarvestError::StorageFailed("connection reset".to_string()).is_transient());
        assert!(!HarvestError::StorageRejected("invalid key".to_string()).is_transient());
    }
}
