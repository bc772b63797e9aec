//! Error type returned by every `ApiClient` operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("central API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("central API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("subscription closed after repeated failures")]
    SubscriptionExhausted,
}
