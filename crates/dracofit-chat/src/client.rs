use std::future::Future;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ChatClientConfig;
use crate::consumer::{StreamConsumer, TurnObserver, TurnOutcome, consume_until};
use crate::errors::{ChatError, error_from_response};
use crate::health::{HealthProbe, HealthReport};

/// Handle used to end a streaming turn early.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    /// Creates a handle that has not been aborted.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests that the turn stop. The turn ends through the aborted
    /// terminal path (`" [Stream aborted]"`).
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `abort` has been called. Never resolves otherwise.
    pub(crate) fn aborted(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// HTTP client for the chatbot service.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    config: ChatClientConfig,
}

impl ChatClient {
    /// Builds the HTTP client. `config.timeout`, when set, bounds each chat request.
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatError> {
        if config.base_url.trim().is_empty() {
            return Err(ChatError::Config("chatbot base_url must not be empty".into()));
        }
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build chatbot client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Builds a client from `ChatClientConfig::from_env`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(ChatClientConfig::from_env()?)
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }

    /// Sends `message` and streams the answer into `observer`.
    ///
    /// Every outcome, including transport failures, is reported through
    /// `observer.on_terminal` and the returned `TurnOutcome`. Only an empty
    /// message is rejected up front.
    pub async fn stream_turn<O: TurnObserver>(
        &self,
        message: &str,
        observer: O,
    ) -> Result<TurnOutcome, ChatError> {
        self.stream_turn_with_abort(message, observer, &AbortHandle::new())
            .await
    }

    /// Like `stream_turn`, but `abort` can end the turn early.
    pub async fn stream_turn_with_abort<O: TurnObserver>(
        &self,
        message: &str,
        observer: O,
        abort: &AbortHandle,
    ) -> Result<TurnOutcome, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".into()));
        }

        info!(message_len = message.len(), "sending chat message");
        let opened = tokio::select! {
            biased;
            () = abort.aborted() => None,
            result = self.open_stream(message) => Some(result),
        };
        let response = match opened {
            Some(Ok(response)) => response,
            Some(Err(err)) => {
                warn!(error = %err, "chat request failed");
                let mut consumer = StreamConsumer::new(observer);
                consumer.fail_transport(err);
                return Ok(consumer.finish());
            }
            None => {
                info!("chat turn aborted before the stream opened");
                let mut consumer = StreamConsumer::new(observer);
                consumer.abort();
                return Ok(consumer.finish());
            }
        };

        Ok(consume_until(response.bytes_stream(), observer, abort.aborted()).await)
    }

    async fn open_stream(&self, message: &str) -> Result<reqwest::Response, ChatError> {
        let response = self
            .client
            .post(self.config.chat_url())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .map_err(ChatError::transport)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        debug!(status = %response.status(), "chat stream opened");
        Ok(response)
    }

    /// Queries the service's `/health` endpoint.
    pub async fn check_health(&self) -> Result<HealthReport, ChatError> {
        let response = self
            .client
            .get(self.config.health_url())
            .timeout(self.config.health_timeout)
            .send()
            .await
            .map_err(ChatError::transport)?;
        if !response.status().is_success() {
            // The service reports an unhealthy model with a JSON error body.
            let status = response.status().as_u16();
            let body = response.text().await.map_err(ChatError::transport)?;
            return match serde_json::from_str::<HealthReport>(&body) {
                Ok(report) => Ok(report),
                Err(_) => Err(ChatError::Status { status, body }),
            };
        }
        response.json().await.map_err(ChatError::decode)
    }
}

#[async_trait::async_trait]
impl HealthProbe for ChatClient {
    async fn check_health(&self) -> Result<HealthReport, ChatError> {
        ChatClient::check_health(self).await
    }
}
