use thiserror::Error;

/// Failure modes of an odds API request. The collector logs each kind
/// differently and skips the cycle rather than failing the job.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timed out while fetching odds")]
    Timeout,

    #[error("connection error while fetching odds: {0}")]
    Connection(String),

    #[error("odds API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode odds response: {0}")]
    Decode(String),

    #[error("odds request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connection(e.to_string())
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(e: url::ParseError) -> Self {
        FetchError::Request(format!("invalid odds API URL: {}", e))
    }
}
