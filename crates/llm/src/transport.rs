use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::mpsc;

use super::model::DEFAULT_MODEL;

/// Provider-level wiring: which backend to talk to and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl TransportConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

/// Generation parameters fixed for the lifetime of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model_id: String,
    pub system_instruction: String,
    pub temperature: Option<f64>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl SessionConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_instruction: String::new(),
            temperature: None,
            top_k: None,
            top_p: None,
            max_tokens: None,
        }
    }

    pub fn with_system_instruction(mut self, system_instruction: impl Into<String>) -> Self {
        self.system_instruction = system_instruction.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

/// Role of one recorded turn as the backend sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTurn {
    pub role: TurnRole,
    pub content: String,
}

impl SessionTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Opaque backend-side conversation context.
///
/// The backend boundary is stateless between calls, so prior turns are
/// carried here and replayed on every send. `send` records the user turn;
/// the caller records the assistant turn only after a clean completion, so a
/// failed send never replays a half-finished reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    config: SessionConfig,
    history: Vec<SessionTurn>,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &[SessionTurn] {
        &self.history
    }

    pub fn record_user_turn(&mut self, content: impl Into<String>) {
        self.history.push(SessionTurn::new(TurnRole::User, content));
    }

    pub fn record_assistant_turn(&mut self, content: impl Into<String>) {
        self.history
            .push(SessionTurn::new(TurnRole::Assistant, content));
    }
}

/// One event on the fragment stream for a single outstanding send.
///
/// Backend-specific response shapes are converted into this fixed contract at
/// the adapter boundary; nothing downstream sees provider types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentEvent {
    /// One chunk of response text; order-significant, concatenation-complete.
    Fragment(String),
    /// Clean end of stream.
    Done,
    /// The send failed as one unit. Fragments already delivered stay delivered.
    Error(String),
}

pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("prompt is empty after trimming"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Lazy, finite sequence of fragment events for one send.
///
/// There is no cancel affordance: an in-flight stream runs to completion or
/// failure, and the sender side closes when the worker returns.
pub struct FragmentStream {
    events: mpsc::UnboundedReceiver<FragmentEvent>,
}

impl FragmentStream {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<FragmentEvent>) -> Self {
        Self { events }
    }

    pub async fn recv(&mut self) -> Option<FragmentEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FragmentEvent> {
        self.events.try_recv().ok()
    }
}

/// Stream plus the worker future that feeds it. The caller spawns the worker
/// and consumes the stream; dropping the stream makes the worker bail out on
/// its next send.
pub struct TransportStreamHandle {
    pub stream: FragmentStream,
    pub worker: TransportWorker,
}

impl std::fmt::Debug for TransportStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStreamHandle").finish_non_exhaustive()
    }
}

/// The I/O boundary against the language-model backend.
pub trait ChatTransport: Send + Sync {
    /// Opens a fresh session with empty history.
    fn open(&self, config: SessionConfig) -> TransportResult<ChatSession>;

    /// Sends one user message and returns the fragment stream for the reply.
    ///
    /// Precondition: `text` is non-empty after trimming. The user turn is
    /// recorded on the session whether or not the stream later fails.
    fn send(
        &self,
        session: &mut ChatSession,
        text: &str,
    ) -> TransportResult<TransportStreamHandle>;
}

/// Builds the channel pair backing one fragment stream.
pub fn fragment_channel() -> (mpsc::UnboundedSender<FragmentEvent>, FragmentStream) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (event_tx, FragmentStream::new(event_rx))
}
