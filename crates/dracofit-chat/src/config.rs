use std::time::Duration;

use crate::errors::ChatError;

const DEFAULT_CHATBOT_URL: &str = "http://localhost:5000";
const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// Configuration for the chatbot service client.
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Base URL of the chatbot service (serves `/chat` and `/health`).
    pub base_url: String,
    /// Optional timeout for the whole chat request. Unset by default so long
    /// answers are never cut off.
    pub timeout: Option<Duration>,
    /// Timeout for health probes.
    pub health_timeout: Duration,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHATBOT_URL)
    }
}

impl ChatClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            health_timeout: Duration::from_secs(10),
        }
    }

    /// Builds a config from `DRACOFIT_CHATBOT_URL` and
    /// `DRACOFIT_CHAT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ChatError> {
        let base_url = std::env::var("DRACOFIT_CHATBOT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHATBOT_URL.to_string());
        let mut config = Self::new(base_url);
        if let Ok(raw) = std::env::var("DRACOFIT_CHAT_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ChatError::Config(format!("DRACOFIT_CHAT_TIMEOUT_SECS is not a number: {raw}"))
            })?;
            config.timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub(crate) fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn health_url(&self) -> String {
        format!("{}/health", self.base_url.trim_end_matches('/'))
    }
}

/// Configuration for the interaction persistence API.
#[derive(Clone, Debug)]
pub struct InteractionClientConfig {
    /// Base URL of the REST API (for example `http://localhost:3000/api`).
    pub base_url: String,
    /// Bearer token of the signed-in user.
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl Default for InteractionClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl InteractionClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `DRACOFIT_API_URL` and `DRACOFIT_API_TOKEN`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("DRACOFIT_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let auth_token = std::env::var("DRACOFIT_API_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            auth_token,
            ..Self::new(base_url)
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether requests will carry credentials.
    pub fn is_authenticated(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub(crate) fn interactions_url(&self) -> String {
        format!("{}/chatbot-interactions", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn history_url(&self) -> String {
        format!("{}/history", self.interactions_url())
    }
}
