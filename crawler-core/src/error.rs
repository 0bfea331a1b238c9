use thiserror::Error;

/// Errors surfaced by the `UrlRepository` contract (C6).
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("persistence error: {0}")]
    Backend(String),
}

/// Errors surfaced by the HTML analyzer (C3).
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("fetching page failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("parsing page failed: {0}")]
    Parse(String),
    #[error("analysis deadline exceeded")]
    Timeout,
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalyzeError {
    /// Whether this error should map the job to `stopped` rather than `error`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AnalyzeError::Timeout | AnalyzeError::Cancelled)
    }
}
