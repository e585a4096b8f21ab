use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::{AbortHandle, ChatClient};
use crate::consumer::{TurnObserver, TurnOutcome};
use crate::errors::ChatError;
use crate::health::ModelStatus;
use crate::interactions::InteractionStore;

/// Who wrote a transcript message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One bubble in the chat transcript.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub is_loading: bool,
    pub is_error: bool,
}

impl ChatMessage {
    fn new(id: String, text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
            is_loading: false,
            is_error: false,
        }
    }
}

/// A chat screen's state: transcript, loading guard, and the policy for
/// persisting finished turns.
///
/// Only one turn runs at a time; `send` refuses a second message with
/// `ChatError::Busy` until the first one is terminal.
pub struct ChatSession {
    client: ChatClient,
    store: Option<Arc<dyn InteractionStore>>,
    status: watch::Receiver<ModelStatus>,
    require_online: bool,
    messages: Mutex<Vec<ChatMessage>>,
    busy: AtomicBool,
    last_api_error: Mutex<Option<String>>,
}

impl ChatSession {
    /// Creates a session that assumes the model is online and persists
    /// nothing.
    pub fn new(client: ChatClient) -> Self {
        let (_tx, status) = watch::channel(ModelStatus::assumed_online());
        Self {
            client,
            store: None,
            status,
            require_online: true,
            messages: Mutex::new(Vec::new()),
            busy: AtomicBool::new(false),
            last_api_error: Mutex::new(None),
        }
    }

    /// Persists finished turns and loads history through `store`.
    /// Only set this for a signed-in user.
    pub fn with_store(mut self, store: Arc<dyn InteractionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Gates `send` on the status published by a `HealthMonitor`.
    pub fn with_status(mut self, status: watch::Receiver<ModelStatus>) -> Self {
        self.status = status;
        self
    }

    /// Allows sending while the model is not reported online.
    pub fn require_online(mut self, require: bool) -> Self {
        self.require_online = require;
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.messages).clone()
    }

    pub fn is_loading(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn model_status(&self) -> ModelStatus {
        self.status.borrow().clone()
    }

    /// Last persistence failure, cleared at the start of each turn.
    pub fn last_api_error(&self) -> Option<String> {
        lock(&self.last_api_error).clone()
    }

    /// Sends one message and streams the answer into the transcript.
    ///
    /// `on_change` receives the bot message after every update and once more
    /// when the turn is terminal.
    pub async fn send<F>(&self, text: &str, on_change: F) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(&ChatMessage),
    {
        self.send_with_abort(text, on_change, &AbortHandle::new())
            .await
    }

    /// Like `send`, but `abort` can end the turn early.
    pub async fn send_with_abort<F>(
        &self,
        text: &str,
        on_change: F,
        abort: &AbortHandle,
    ) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(&ChatMessage),
    {
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".into()));
        }
        let status = self.model_status();
        if self.require_online && !status.is_online() {
            return Err(ChatError::ModelUnavailable {
                status: status.availability.to_string(),
            });
        }
        let _guard = BusyGuard::acquire(&self.busy)?;
        *lock(&self.last_api_error) = None;

        let bot_id = format!("bot-{}", uuid::Uuid::new_v4());
        {
            let mut messages = lock(&self.messages);
            messages.push(ChatMessage::new(
                format!("user-{}", uuid::Uuid::new_v4()),
                text,
                Sender::User,
            ));
            let mut placeholder = ChatMessage::new(bot_id.clone(), "", Sender::Bot);
            placeholder.is_loading = true;
            messages.push(placeholder);
        }

        let observer = TranscriptObserver {
            messages: &self.messages,
            bot_id,
            on_change,
            terminated: false,
        };
        let outcome = self
            .client
            .stream_turn_with_abort(text, observer, abort)
            .await?;

        if outcome.should_persist() {
            self.persist(text, &outcome.final_text).await;
        }
        Ok(outcome)
    }

    async fn persist(&self, question: &str, answer: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.save_interaction(question, answer).await {
            Ok(saved) => info!(id = ?saved.id_text(), "chat turn saved"),
            Err(err) => {
                warn!(error = %err, "could not save chat turn");
                *lock(&self.last_api_error) = Some("Failed to save chat history.".into());
            }
        }
    }

    /// Loads saved interactions into an empty transcript.
    ///
    /// Returns the number of messages added. Does nothing without a store
    /// or when the transcript already has messages.
    pub async fn load_history(&self) -> Result<usize, ChatError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };
        if !lock(&self.messages).is_empty() {
            return Ok(0);
        }
        let history = store.chat_history().await?;
        let loaded: Vec<ChatMessage> = history
            .iter()
            .enumerate()
            .flat_map(|(index, interaction)| {
                let id = interaction.id_text().unwrap_or_else(|| index.to_string());
                let timestamp = interaction.timestamp.unwrap_or_else(Utc::now);
                let mut question =
                    ChatMessage::new(format!("db-q-{id}"), interaction.question.clone(), Sender::User);
                question.timestamp = timestamp;
                let mut answer =
                    ChatMessage::new(format!("db-a-{id}"), interaction.answer.clone(), Sender::Bot);
                answer.timestamp = timestamp;
                [question, answer]
            })
            .collect();

        let mut messages = lock(&self.messages);
        if !messages.is_empty() {
            // A turn started while history was loading.
            return Ok(0);
        }
        let count = loaded.len();
        *messages = loaded;
        info!(count, "chat history loaded");
        Ok(count)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ChatError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ChatError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Mirrors one turn into the bot placeholder. If the turn is dropped
/// before it is terminal, the placeholder is closed as aborted.
struct TranscriptObserver<'a, F> {
    messages: &'a Mutex<Vec<ChatMessage>>,
    bot_id: String,
    on_change: F,
    terminated: bool,
}

impl<F> TranscriptObserver<'_, F> {
    fn write(&self, text: Option<&str>, is_loading: bool, is_error: bool) -> Option<ChatMessage> {
        let mut messages = lock(self.messages);
        let message = messages.iter_mut().find(|m| m.id == self.bot_id)?;
        match text {
            Some(text) => message.text = text.to_string(),
            None => message.text.push_str(" [Stream aborted]"),
        }
        message.is_loading = is_loading;
        message.is_error = is_error;
        Some(message.clone())
    }
}

impl<F: FnMut(&ChatMessage)> TranscriptObserver<'_, F> {
    fn update(&mut self, text: &str, is_loading: bool, is_error: bool) {
        if let Some(snapshot) = self.write(Some(text), is_loading, is_error) {
            (self.on_change)(&snapshot);
        }
    }
}

impl<F> Drop for TranscriptObserver<'_, F> {
    fn drop(&mut self) {
        if !self.terminated {
            warn!(bot_id = %self.bot_id, "chat turn dropped before it finished");
            self.write(None, false, true);
        }
    }
}

impl<F: FnMut(&ChatMessage)> TurnObserver for TranscriptObserver<'_, F> {
    fn on_update(&mut self, partial_text: &str, still_loading: bool) {
        self.update(partial_text, still_loading, false);
    }

    fn on_terminal(&mut self, final_text: &str, is_error: bool) {
        self.terminated = true;
        self.update(final_text, false, is_error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatClientConfig;
    use crate::health::{Availability, HealthReport};
    use crate::interactions::Interaction;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<(String, String)>>,
        history: Vec<Interaction>,
        fail_saves: bool,
    }

    #[async_trait::async_trait]
    impl InteractionStore for MemoryStore {
        async fn save_interaction(
            &self,
            question: &str,
            answer: &str,
        ) -> Result<Interaction, ChatError> {
            if self.fail_saves {
                return Err(ChatError::Status {
                    status: 500,
                    body: "db down".into(),
                });
            }
            lock(&self.saved).push((question.to_string(), answer.to_string()));
            Ok(Interaction {
                id: Some(serde_json::json!(1)),
                question: question.to_string(),
                answer: answer.to_string(),
                timestamp: Some(Utc::now()),
            })
        }

        async fn chat_history(&self) -> Result<Vec<Interaction>, ChatError> {
            Ok(self.history.clone())
        }
    }

    async fn chat_server(body: &str, delay: Option<Duration>) -> MockServer {
        let server = MockServer::start().await;
        let mut response = ResponseTemplate::new(200)
            .set_body_raw(body.as_bytes().to_vec(), "text/event-stream");
        if let Some(delay) = delay {
            response = response.set_delay(delay);
        }
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    fn session_for(server: &MockServer) -> ChatSession {
        ChatSession::new(ChatClient::new(ChatClientConfig::new(server.uri())).expect("client"))
    }

    #[tokio::test]
    async fn successful_turn_updates_transcript_and_persists() {
        let server = chat_server(
            "data: {\"status\":\"streaming\",\"chunk\":\"Drink \"}\n\n\
             data: {\"status\":\"streaming\",\"chunk\":\"water.\"}\n\n",
            None,
        )
        .await;
        let store = Arc::new(MemoryStore::default());
        let session = session_for(&server).with_store(store.clone());

        let mut snapshots = Vec::new();
        let outcome = session
            .send("Hydration tips?", |m| snapshots.push((m.text.clone(), m.is_loading)))
            .await
            .expect("send");

        assert_eq!(outcome.final_text, "Drink water.");
        assert_eq!(
            snapshots,
            vec![
                ("Drink ".to_string(), true),
                ("Drink water.".to_string(), true),
                ("Drink water.".to_string(), false),
            ]
        );

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].text, "Hydration tips?");
        assert!(messages[0].id.starts_with("user-"));
        assert_eq!(messages[1].sender, Sender::Bot);
        assert!(messages[1].id.starts_with("bot-"));
        assert!(!messages[1].is_loading);
        assert!(!messages[1].is_error);

        assert_eq!(
            *lock(&store.saved),
            vec![("Hydration tips?".to_string(), "Drink water.".to_string())]
        );
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn error_turn_is_marked_and_not_persisted() {
        let server = chat_server(
            "data: {\"status\":\"streaming\",\"chunk\":\"Hi\"}\n\n\
             data: {\"status\":\"error\",\"error\":\"model unavailable\"}\n\n",
            None,
        )
        .await;
        let store = Arc::new(MemoryStore::default());
        let session = session_for(&server).with_store(store.clone());

        let outcome = session.send("hello", |_| {}).await.expect("send");
        assert_eq!(outcome.final_text, "Hi [Error: model unavailable]");
        let bot = &session.messages()[1];
        assert!(bot.is_error);
        assert_eq!(bot.text, "Hi [Error: model unavailable]");
        assert!(lock(&store.saved).is_empty());
    }

    #[tokio::test]
    async fn empty_answer_is_not_persisted() {
        let server = chat_server("", None).await;
        let store = Arc::new(MemoryStore::default());
        let session = session_for(&server).with_store(store.clone());

        let outcome = session.send("anyone?", |_| {}).await.expect("send");
        assert_eq!(outcome.final_text, "");
        assert!(!outcome.is_error);
        assert!(lock(&store.saved).is_empty());
    }

    #[tokio::test]
    async fn save_failure_is_recorded_without_failing_turn() {
        let server = chat_server(
            "data: {\"status\":\"success\",\"full_response\":\"Rest.\"}\n\n",
            None,
        )
        .await;
        let store = Arc::new(MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        });
        let session = session_for(&server).with_store(store);

        let outcome = session.send("recovery?", |_| {}).await.expect("send");
        assert_eq!(outcome.final_text, "Rest.");
        assert_eq!(
            session.last_api_error().as_deref(),
            Some("Failed to save chat history.")
        );
    }

    #[tokio::test]
    async fn second_message_is_refused_while_streaming() {
        let server = chat_server(
            "data: {\"status\":\"success\",\"full_response\":\"ok\"}\n\n",
            Some(Duration::from_millis(300)),
        )
        .await;
        let session = session_for(&server);

        let first = session.send("first", |_| {});
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(session.is_loading());
            session.send("second", |_| {}).await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.expect("first").final_text, "ok");
        assert_eq!(second.expect_err("busy"), ChatError::Busy);
        assert_eq!(session.messages().len(), 2);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn dropped_turn_closes_placeholder_as_aborted() {
        let server = chat_server(
            "data: {\"status\":\"success\",\"full_response\":\"ok\"}\n\n",
            Some(Duration::from_millis(500)),
        )
        .await;
        let session = session_for(&server);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            session.send("slow one", |_| {}),
        )
        .await;
        assert!(timed_out.is_err());

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text, " [Stream aborted]");
        assert!(!messages[1].is_loading);
        assert!(messages[1].is_error);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn offline_model_refuses_send_unless_gate_disabled() {
        let server = chat_server(
            "data: {\"status\":\"success\",\"full_response\":\"ok\"}\n\n",
            None,
        )
        .await;
        let (tx, rx) = watch::channel(ModelStatus::from_probe(Ok(HealthReport {
            status: "error".into(),
            data: None,
            message: Some("model not loaded".into()),
        })));

        let gated = session_for(&server).with_status(rx.clone());
        let err = gated.send("hi", |_| {}).await.expect_err("offline");
        assert_eq!(
            err,
            ChatError::ModelUnavailable {
                status: "offline".into()
            }
        );
        assert!(gated.messages().is_empty());

        let ungated = session_for(&server).with_status(rx).require_online(false);
        assert_eq!(ungated.send("hi", |_| {}).await.expect("send").final_text, "ok");

        tx.send_replace(ModelStatus::assumed_online());
        assert_eq!(gated.model_status().availability, Availability::Online);
        assert!(gated.send("hi", |_| {}).await.is_ok());
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let server = chat_server("", None).await;
        let session = session_for(&server);
        assert!(matches!(
            session.send("  ", |_| {}).await,
            Err(ChatError::Validation(_))
        ));
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn history_becomes_question_answer_pairs() {
        let server = chat_server("", None).await;
        let store = Arc::new(MemoryStore {
            history: vec![
                Interaction {
                    id: Some(serde_json::json!(3)),
                    question: "Plank time?".into(),
                    answer: "60 seconds.".into(),
                    timestamp: None,
                },
                Interaction {
                    id: None,
                    question: "Rest days?".into(),
                    answer: "Two per week.".into(),
                    timestamp: None,
                },
            ],
            ..MemoryStore::default()
        });
        let session = session_for(&server).with_store(store);

        assert_eq!(session.load_history().await.expect("history"), 4);
        let ids: Vec<String> = session.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["db-q-3", "db-a-3", "db-q-1", "db-a-1"]);

        // Already populated: a second load is a no-op.
        assert_eq!(session.load_history().await.expect("history"), 0);
    }

    #[tokio::test]
    async fn history_without_store_is_noop() {
        let server = chat_server("", None).await;
        let session = session_for(&server);
        assert_eq!(session.load_history().await.expect("history"), 0);
    }
}
