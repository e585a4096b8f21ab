/// Progress or terminal status carried by a `StreamEvent`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Incremental output; `chunk` holds the new text.
    Streaming,
    /// Terminal success; `full_response` may hold the complete answer.
    Success,
    /// Terminal server-side failure.
    Error,
    /// Terminal abort (for example the server saw the client disconnect).
    Aborted,
    /// Any status this client does not understand. Ignored by the consumer.
    #[default]
    #[serde(other)]
    Unknown,
}

impl StreamStatus {
    /// Returns true for `success`, `error`, and `aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Aborted)
    }
}

/// One JSON payload carried on a `data: ` line of the chat response stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    /// Missing or unrecognized statuses decode to `Unknown`.
    #[serde(default)]
    pub status: StreamStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// New text for a `streaming` event.
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Complete answer on `success`; replaces the accumulated chunks when non-empty.
    pub full_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Failure text on `error`.
    pub error: Option<String>,
}

impl StreamEvent {
    /// Parses a `data: ` payload.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Incremental text, if this is a `streaming` event with a non-empty chunk.
    pub fn chunk_text(&self) -> Option<&str> {
        match self.status {
            StreamStatus::Streaming => self.chunk.as_deref().filter(|c| !c.is_empty()),
            _ => None,
        }
    }

    /// Complete answer text, if present and non-empty.
    pub fn full_text(&self) -> Option<&str> {
        self.full_response.as_deref().filter(|t| !t.is_empty())
    }

    /// Server error text from the `error` field, if non-empty.
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}
