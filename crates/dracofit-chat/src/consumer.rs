use std::fmt;
use std::future::Future;

use futures::{Stream, StreamExt as _};
use tracing::{debug, info, warn};

use crate::event::{StreamEvent, StreamStatus};
use crate::framing::{FrameDecoder, StreamMessage};

/// Receives the progress of one chat turn.
///
/// `on_update` fires for every appended chunk. `on_terminal` fires exactly
/// once per turn, whatever way the turn ends.
pub trait TurnObserver {
    fn on_update(&mut self, partial_text: &str, still_loading: bool);
    fn on_terminal(&mut self, final_text: &str, is_error: bool);
}

impl<O: TurnObserver + ?Sized> TurnObserver for &mut O {
    fn on_update(&mut self, partial_text: &str, still_loading: bool) {
        (**self).on_update(partial_text, still_loading);
    }

    fn on_terminal(&mut self, final_text: &str, is_error: bool) {
        (**self).on_terminal(final_text, is_error);
    }
}

/// Adapts a pair of closures into a `TurnObserver`.
pub struct FnObserver<U, T> {
    on_update: U,
    on_terminal: T,
}

/// Builds a `TurnObserver` from an update closure and a terminal closure.
pub fn observer_fn<U, T>(on_update: U, on_terminal: T) -> FnObserver<U, T>
where
    U: FnMut(&str, bool),
    T: FnMut(&str, bool),
{
    FnObserver {
        on_update,
        on_terminal,
    }
}

impl<U, T> TurnObserver for FnObserver<U, T>
where
    U: FnMut(&str, bool),
    T: FnMut(&str, bool),
{
    fn on_update(&mut self, partial_text: &str, still_loading: bool) {
        (self.on_update)(partial_text, still_loading);
    }

    fn on_terminal(&mut self, final_text: &str, is_error: bool) {
        (self.on_terminal)(final_text, is_error);
    }
}

/// Observer that discards every notification.
pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn on_update(&mut self, _partial_text: &str, _still_loading: bool) {}
    fn on_terminal(&mut self, _final_text: &str, _is_error: bool) {}
}

/// In-memory state of one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerState {
    /// Concatenation of every chunk seen so far, in arrival order.
    pub accumulated_text: String,
    /// True from turn start until the turn is terminal.
    pub is_loading: bool,
    /// Set on `error`/`aborted` events and on transport failure.
    pub is_error: bool,
    /// Set exactly once, when the turn becomes terminal.
    pub final_text: Option<String>,
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self {
            accumulated_text: String::new(),
            is_loading: true,
            is_error: false,
            final_text: None,
        }
    }
}

/// Terminal result of a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Text delivered to `on_terminal`.
    pub final_text: String,
    pub is_error: bool,
}

impl TurnOutcome {
    /// Whether the answer should be handed to the persistence API.
    pub fn should_persist(&self) -> bool {
        !self.is_error && !self.final_text.trim().is_empty()
    }
}

/// Text reported when the request fails before any event is read.
pub fn transport_failure_text(message: impl fmt::Display) -> String {
    format!("[Failed to get response: {message}]")
}

/// Folds the chat response stream of one turn into UI updates and a single
/// terminal outcome.
///
/// Build a fresh consumer per turn; a terminal consumer ignores all further
/// input.
pub struct StreamConsumer<O> {
    state: ConsumerState,
    decoder: FrameDecoder,
    observer: O,
}

impl<O: TurnObserver> StreamConsumer<O> {
    /// Creates a consumer for a new turn, reporting to `observer`.
    pub fn new(observer: O) -> Self {
        Self {
            state: ConsumerState::default(),
            decoder: FrameDecoder::default(),
            observer,
        }
    }

    /// Current turn state.
    pub fn state(&self) -> &ConsumerState {
        &self.state
    }

    /// Whether `on_terminal` has fired.
    pub fn is_terminal(&self) -> bool {
        self.state.final_text.is_some()
    }

    /// Returns the outcome once the turn is terminal.
    pub fn outcome(&self) -> Option<TurnOutcome> {
        self.state.final_text.as_ref().map(|text| TurnOutcome {
            final_text: text.clone(),
            is_error: self.state.is_error,
        })
    }

    /// Feeds raw body bytes.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        if self.is_terminal() {
            return;
        }
        let messages = self.decoder.push_bytes(chunk);
        self.handle_messages(messages);
    }

    /// Feeds already-decoded body text.
    pub fn push_str(&mut self, text: &str) {
        if self.is_terminal() {
            return;
        }
        let messages = self.decoder.push_str(text);
        self.handle_messages(messages);
    }

    fn handle_messages(&mut self, messages: Vec<StreamMessage>) {
        for payload in messages.into_iter().flat_map(|m| m.data) {
            if self.is_terminal() {
                debug!(payload = %payload, "ignoring stream data after terminal event");
                continue;
            }
            match StreamEvent::parse(&payload) {
                Ok(event) => self.apply(event),
                Err(err) => {
                    warn!(error = %err, payload = %payload, "skipping malformed stream event");
                }
            }
        }
    }

    /// Applies one decoded event.
    pub fn apply(&mut self, event: StreamEvent) {
        if self.is_terminal() {
            return;
        }
        match event.status {
            StreamStatus::Streaming => {
                if let Some(chunk) = event.chunk_text() {
                    self.state.accumulated_text.push_str(chunk);
                    debug!(
                        chunk_len = chunk.len(),
                        total_len = self.state.accumulated_text.len(),
                        "stream chunk"
                    );
                    self.observer.on_update(&self.state.accumulated_text, true);
                }
            }
            StreamStatus::Success => {
                let text = event
                    .full_text()
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| self.state.accumulated_text.clone());
                self.terminate(text, false);
            }
            StreamStatus::Error | StreamStatus::Aborted => {
                warn!(status = ?event.status, error = ?event.error_text(), "server ended stream with failure");
                let suffix = match event.error_text() {
                    Some(error) => format!(" [Error: {error}]"),
                    None => " [Stream aborted]".to_string(),
                };
                let text = format!("{}{suffix}", self.state.accumulated_text);
                self.terminate(text, true);
            }
            StreamStatus::Unknown => {
                debug!("ignoring stream event with unknown status");
            }
        }
    }

    /// Ends the turn as aborted by the caller.
    pub fn abort(&mut self) {
        self.apply(StreamEvent {
            status: StreamStatus::Aborted,
            ..StreamEvent::default()
        });
    }

    /// Ends the turn with a transport failure.
    pub fn fail_transport(&mut self, message: impl fmt::Display) {
        self.terminate(transport_failure_text(message), true);
    }

    /// Marks the end of the body. A turn without a terminal event completes
    /// successfully with the accumulated text.
    pub fn finish(&mut self) -> TurnOutcome {
        if !self.is_terminal() {
            let tail = self.decoder.finish();
            if !tail.trim().is_empty() {
                debug!(tail_len = tail.len(), "discarding unterminated trailing message");
            }
            let text = self.state.accumulated_text.clone();
            self.terminate(text, false);
        }
        self.outcome().unwrap_or_else(|| TurnOutcome {
            final_text: self.state.accumulated_text.clone(),
            is_error: self.state.is_error,
        })
    }

    fn terminate(&mut self, final_text: String, is_error: bool) {
        if self.is_terminal() {
            return;
        }
        info!(is_error, text_len = final_text.len(), "chat turn finished");
        self.state.is_loading = false;
        self.state.is_error = is_error;
        self.observer.on_terminal(&final_text, is_error);
        self.state.final_text = Some(final_text);
    }
}

/// Consumes a response body stream until it ends or a terminal event
/// arrives.
pub async fn consume<S, B, E, O>(stream: S, observer: O) -> TurnOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
    O: TurnObserver,
{
    consume_until(stream, observer, std::future::pending::<()>()).await
}

/// Like `consume`, but ends the turn as aborted when `abort` resolves first.
pub async fn consume_until<S, B, E, O, F>(stream: S, observer: O, abort: F) -> TurnOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
    O: TurnObserver,
    F: Future<Output = ()>,
{
    let mut consumer = StreamConsumer::new(observer);
    let mut stream = std::pin::pin!(stream);
    let mut abort = std::pin::pin!(abort);
    loop {
        tokio::select! {
            biased;
            () = &mut abort => {
                info!("chat turn aborted by caller");
                consumer.abort();
                break;
            }
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    consumer.push_bytes(chunk.as_ref());
                    if consumer.is_terminal() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "chat stream read failed");
                    consumer.fail_transport(err);
                    break;
                }
                None => break,
            }
        }
    }
    consumer.finish()
}
