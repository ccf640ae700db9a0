use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Failure of a durable session write or read.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Every failure an API call can resolve with. Carries enough to show the user
/// a status and a message.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No response was received.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("{message}")]
    Authentication { message: String },
    #[error("{message}")]
    Authorization { message: String },
    #[error("{message}")]
    Validation { status: u16, message: String },
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("Request body could not be serialized: {0}")]
    Encode(#[source] serde_json::Error),
    /// 2xx response whose body did not match the expected shape.
    #[error("Unexpected response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RequestError {
    /// Build the typed failure for a non-2xx response.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let message = server_message(body)
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

        match status {
            StatusCode::UNAUTHORIZED => RequestError::Authentication { message },
            StatusCode::FORBIDDEN => RequestError::Authorization { message },
            s if s.is_client_error() => RequestError::Validation {
                status: s.as_u16(),
                message,
            },
            s => RequestError::Server {
                status: s.as_u16(),
                message,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Authentication { .. } => Some(401),
            RequestError::Authorization { .. } => Some(403),
            RequestError::Validation { status, .. } | RequestError::Server { status, .. } => {
                Some(*status)
            }
            RequestError::Network(_)
            | RequestError::Encode(_)
            | RequestError::Decode(_)
            | RequestError::Session(_) => None,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RequestError::Authentication { .. })
    }
}

/// Pull a human-readable message out of an error body. Understands
/// `{"detail": "..."}`, `{"detail": [{"msg": "..."}]}`, `{"message": "..."}`
/// and `{"error": "..."}`.
fn server_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    let message = match value.get("detail") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; ");
            Some(joined)
        }
        _ => ["message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string),
    };

    message.filter(|m| !m.is_empty())
}
