use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::mpsc;

use super::transport::{
    ChatSession, ChatTransport, CompletionsFailedSnafu, EmptyPromptSnafu, FragmentEvent,
    HttpClientSnafu, MissingApiKeySnafu, SessionConfig, SessionTurn, TransportConfig,
    TransportError, TransportResult, TransportStreamHandle, TransportWorker, TurnRole,
    fragment_channel,
};

pub const RIG_GEMINI_PROVIDER_ID: &str = "gemini";

/// Gemini's OpenAI-compatibility surface, so the rig OpenAI client can speak
/// to it directly.
pub const GEMINI_OPENAI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Transport over the rig OpenAI-compatible streaming client.
#[derive(Debug)]
pub struct RigChatTransport {
    config: TransportConfig,
}

impl RigChatTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-transport-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &TransportConfig) -> TransportResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(turn: &SessionTurn) -> Option<RigMessage> {
        match turn.role {
            TurnRole::System => None,
            TurnRole::User => Some(RigMessage::user(turn.content.clone())),
            TurnRole::Assistant => Some(RigMessage::assistant(turn.content.clone())),
        }
    }

    fn merged_preamble(session_config: &SessionConfig, history: &[SessionTurn]) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if !session_config.system_instruction.trim().is_empty() {
            preamble_parts.push(session_config.system_instruction.clone());
        }

        // Rig exposes a single preamble field, so system-role turns are folded
        // into it while user/assistant turns go out as chat messages.
        for turn in history {
            if matches!(turn.role, TurnRole::System) && !turn.content.trim().is_empty() {
                preamble_parts.push(turn.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    fn sampling_params(session_config: &SessionConfig) -> Option<serde_json::Value> {
        let mut params = serde_json::Map::new();
        if let Some(top_k) = session_config.top_k {
            params.insert("top_k".to_string(), top_k.into());
        }
        if let Some(top_p) = session_config.top_p {
            params.insert("top_p".to_string(), top_p.into());
        }

        if params.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(params))
        }
    }

    async fn open_stream(
        config: &TransportConfig,
        session_config: &SessionConfig,
        history: &[SessionTurn],
        prompt: &str,
    ) -> TransportResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(session_config.model_id.clone());

        let messages = history
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let mut builder = model
            .completion_request(RigMessage::user(prompt.to_string()))
            .messages(messages);

        if let Some(preamble) = Self::merged_preamble(session_config, history) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = session_config.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = session_config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        if let Some(params) = Self::sampling_params(session_config) {
            builder = builder.additional_params(params);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<FragmentEvent>, error: TransportError) {
        let _ = event_tx.send(FragmentEvent::Error(error.to_string()));
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<FragmentEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(FragmentEvent::Fragment(text.text)),
            // Only response text is folded into the message; reasoning and
            // tool-call items have no counterpart in the conversation model.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker(
        config: TransportConfig,
        session_config: SessionConfig,
        history: Vec<SessionTurn>,
        prompt: String,
        event_tx: mpsc::UnboundedSender<FragmentEvent>,
    ) {
        let mut stream =
            match Self::open_stream(&config, &session_config, &history, &prompt).await {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(
                        provider_id = %config.provider_id,
                        model_id = %session_config.model_id,
                        error = %error,
                        "failed to open backend stream"
                    );
                    Self::emit_error_event(&event_tx, error);
                    return;
                }
            };

        while let Some(next_item) = stream.next().await {
            match next_item {
                Ok(item) => {
                    if let Some(event) = Self::map_stream_item(item)
                        && event_tx.send(event).is_err()
                    {
                        // Receiver dropped; nothing left to deliver to.
                        return;
                    }
                }
                Err(source) => {
                    tracing::warn!(
                        model_id = %session_config.model_id,
                        error = %source,
                        "backend stream emitted an error chunk"
                    );
                    let error = TransportError::CompletionsFailed {
                        stage: "stream-chunk",
                        source,
                    };
                    Self::emit_error_event(&event_tx, error);
                    return;
                }
            }
        }

        let _ = event_tx.send(FragmentEvent::Done);
    }
}

impl ChatTransport for RigChatTransport {
    fn open(&self, config: SessionConfig) -> TransportResult<ChatSession> {
        Ok(ChatSession::new(config))
    }

    fn send(
        &self,
        session: &mut ChatSession,
        text: &str,
    ) -> TransportResult<TransportStreamHandle> {
        ensure!(
            !text.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "send-prompt",
            }
        );

        // Snapshot prior turns before recording the new one so the prompt is
        // sent exactly once.
        let history = session.history().to_vec();
        let session_config = session.config().clone();
        session.record_user_turn(text);

        let (event_tx, stream) = fragment_channel();
        let worker: TransportWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            session_config,
            history,
            text.to_string(),
            event_tx,
        ));

        Ok(TransportStreamHandle { stream, worker })
    }
}
