#![deny(unsafe_code)]

//! Backend boundary for the chat client.
//!
//! Everything provider-specific lives behind [`ChatTransport`]; the rest of
//! the workspace only sees [`FragmentEvent`] streams and [`TransportError`].

use std::sync::Arc;

mod model;
mod rig_adapter;
mod transport;

pub use model::{DEFAULT_MODEL, Model, default_models};
pub use rig_adapter::{GEMINI_OPENAI_ENDPOINT, RIG_GEMINI_PROVIDER_ID, RigChatTransport};
pub use transport::{
    ChatSession, ChatTransport, FragmentEvent, FragmentStream, SessionConfig, SessionTurn,
    TransportConfig, TransportError, TransportResult, TransportStreamHandle, TransportWorker,
    TurnRole, fragment_channel,
};

pub fn create_transport(mut config: TransportConfig) -> TransportResult<Arc<dyn ChatTransport>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "openai-compatible" => {
            config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigChatTransport::new(config)?))
        }
        _ => Err(TransportError::UnsupportedProvider {
            stage: "create-transport",
            provider_id: config.provider_id,
        }),
    }
}
