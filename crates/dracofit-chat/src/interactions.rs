use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::InteractionClientConfig;
use crate::errors::{ChatError, error_from_response};

/// A saved question/answer pair.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub question: String,
    pub answer: String,
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Interaction {
    /// Id rendered as text (`"42"`, `"a1b2"`), if present.
    pub fn id_text(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(serde::Serialize)]
struct SaveInteractionRequest<'a> {
    question: &'a str,
    answer: &'a str,
}

/// Persistence collaborator for chat turns.
#[async_trait::async_trait]
pub trait InteractionStore: Send + Sync {
    async fn save_interaction(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<Interaction, ChatError>;

    /// Returns saved interactions, oldest first.
    async fn chat_history(&self) -> Result<Vec<Interaction>, ChatError>;
}

/// REST client for `/chatbot-interactions`.
#[derive(Clone)]
pub struct InteractionClient {
    client: reqwest::Client,
    config: InteractionClientConfig,
}

impl InteractionClient {
    /// Builds the HTTP client for the interaction API.
    pub fn new(config: InteractionClientConfig) -> Result<Self, ChatError> {
        if config.base_url.trim().is_empty() {
            return Err(ChatError::Config("api base_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build api client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Builds a client from `InteractionClientConfig::from_env`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(InteractionClientConfig::from_env())
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.auth_token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// A 401 from the interaction API means the session token is no longer valid.
async fn api_error(response: reqwest::Response) -> ChatError {
    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        return ChatError::Unauthorized;
    }
    error_from_response(response).await
}

#[async_trait::async_trait]
impl InteractionStore for InteractionClient {
    async fn save_interaction(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<Interaction, ChatError> {
        let response = self
            .authorize(self.client.post(self.config.interactions_url()))
            .json(&SaveInteractionRequest { question, answer })
            .send()
            .await
            .map_err(ChatError::transport)?;
        if !response.status().is_success() {
            let err = api_error(response).await;
            warn!(error = %err, "saving chatbot interaction failed");
            return Err(err);
        }
        let saved: Interaction = response.json().await.map_err(ChatError::decode)?;
        debug!(id = ?saved.id_text(), "chatbot interaction saved");
        Ok(saved)
    }

    async fn chat_history(&self) -> Result<Vec<Interaction>, ChatError> {
        let response = self
            .authorize(self.client.get(self.config.history_url()))
            .send()
            .await
            .map_err(ChatError::transport)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let entries: Vec<Option<Interaction>> =
            response.json().await.map_err(ChatError::decode)?;
        Ok(entries.into_iter().flatten().collect())
    }
}
