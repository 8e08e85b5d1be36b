use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Transport or parse failure talking to the story API.
    #[error("network error: {0}")]
    Network(String),
    /// No access token is present; the login flow should run instead.
    #[error("not logged in")]
    Unauthenticated,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Network(format!("invalid response: {err}"))
    }
}

impl From<rusqlite::Error> for FeedError {
    fn from(err: rusqlite::Error) -> Self {
        FeedError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
