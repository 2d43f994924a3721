use thiserror::Error;

/// Failure of a call to one of the feed collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] anyhow::Error),
    #[error("server returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// A short message suitable for a user-facing toast.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => "Could not reach the server. Please try again.".to_string(),
            ApiError::Status { code, body } if !body.trim().is_empty() && *code < 500 => {
                body.trim().to_string()
            }
            ApiError::Status { code, .. } => format!("The server rejected the request ({code})."),
            ApiError::Decode(_) => "The server sent an unexpected response.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
