//! Client side of the DracoBot fitness chat.
//!
//! The chatbot service answers `POST /chat` with a stream of
//! `data: <json>\n\n` messages. `consumer` folds that stream into a growing
//! answer with exactly one terminal outcome per turn; the other modules wrap
//! it with HTTP transport, health polling, persistence, and a chat session.
//!
//! # Streaming a turn
//!
//! ```no_run
//! use dracofit_chat::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let client = ChatClient::new(ChatClientConfig::new("http://localhost:5000"))?;
//!
//! let outcome = client
//!     .stream_turn(
//!         "Give me a five minute warmup.",
//!         observer_fn(
//!             |partial: &str, _loading| println!("{partial}"),
//!             |final_text: &str, is_error| println!("done (error={is_error}): {final_text}"),
//!         ),
//!     )
//!     .await?;
//!
//! if outcome.should_persist() {
//!     // hand `outcome.final_text` to the interaction API
//! }
//! # Ok(())
//! # }
//! ```

/// Chatbot service client and turn cancellation.
pub mod client;
/// Client configuration.
pub mod config;
/// Stream consumer: event folding and the single terminal outcome.
pub mod consumer;
/// Error types.
pub mod errors;
/// Wire-level stream events.
pub mod event;
/// Byte-to-message framing of the response body.
pub mod framing;
/// Health reports, model status, and periodic polling.
pub mod health;
/// Persistence of question/answer pairs.
pub mod interactions;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Chat transcript with a loading guard and persistence policy.
pub mod session;

pub use client::{AbortHandle, ChatClient};
pub use config::{ChatClientConfig, InteractionClientConfig};
pub use consumer::{
    ConsumerState, FnObserver, NoopObserver, StreamConsumer, TurnObserver, TurnOutcome, consume,
    consume_until, observer_fn,
};
pub use errors::ChatError;
pub use event::{StreamEvent, StreamStatus};
pub use health::{Availability, HealthMonitor, HealthProbe, HealthReport, ModelStatus};
pub use interactions::{Interaction, InteractionClient, InteractionStore};
pub use session::{ChatMessage, ChatSession, Sender};
