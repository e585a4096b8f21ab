//! Common imports for typical chat client usage.
pub use crate::{
    AbortHandle, ChatClient, ChatClientConfig, ChatError, ChatMessage, ChatSession,
    HealthMonitor, InteractionClient, InteractionClientConfig, InteractionStore, ModelStatus,
    Sender, StreamEvent, TurnObserver, TurnOutcome, observer_fn,
};
