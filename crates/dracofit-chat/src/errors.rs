/// Errors returned by the chat, health, and interaction clients.
///
/// Failures inside a streaming turn never surface here; they reach the
/// caller through `TurnObserver::on_terminal` and the returned
/// `TurnOutcome`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (for example an empty message).
    #[error("validation error: {0}")]
    Validation(String),
    /// A turn is already in flight for this session.
    #[error("a response is still streaming; wait for it to finish")]
    Busy,
    /// The chatbot model is not reported online.
    #[error("chatbot is not available (status: {status})")]
    ModelUnavailable { status: String },
    /// The request could not be sent or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a non-success HTTP status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The persistence API rejected the credentials.
    #[error("unauthorized: sign in again to save or load chat history")]
    Unauthorized,
    /// A response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ChatError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    /// Returns the HTTP status code when the error came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            _ => None,
        }
    }
}

/// Maps a non-success response into `ChatError::Status`, reading the body
/// text when possible.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ChatError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    ChatError::Status {
        status: status.as_u16(),
        body,
    }
}
