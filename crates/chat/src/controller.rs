use std::sync::Arc;

use snafu::{ResultExt, Snafu, ensure};

use plume_llm::{
    ChatSession, ChatTransport, FragmentEvent, FragmentStream, SessionConfig, TransportError,
    TransportResult, TransportWorker,
};

use crate::assembler::{AssemblyUpdate, StreamAssembler};
use crate::conversation::{Conversation, EditRejection};
use crate::message::{Message, MessageId};

#[derive(Debug, Snafu)]
pub enum SendError {
    #[snafu(display("prompt is empty after trimming"))]
    EmptyPrompt,
    #[snafu(display("a turn is already streaming; wait for it to finish"))]
    TurnInFlight,
    #[snafu(display("transport rejected the send: {source}"))]
    Transport { source: TransportError },
}

/// Handle for one outstanding send.
///
/// The caller spawns `worker` and feeds every event read from `stream` back
/// into [`ChatController::apply_event`]; yielding between events is what
/// lets a surface repaint partial text.
pub struct ActiveTurn {
    pub user_id: MessageId,
    pub assistant_id: MessageId,
    pub stream: FragmentStream,
    pub worker: TransportWorker,
}

impl std::fmt::Debug for ActiveTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTurn")
            .field("user_id", &self.user_id)
            .field("assistant_id", &self.assistant_id)
            .finish_non_exhaustive()
    }
}

/// Observable outcome of folding one stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnProgress {
    /// The chunk just appended to the placeholder.
    Fragment(String),
    Completed {
        assistant_id: MessageId,
    },
    /// The placeholder keeps its partial text; a separate notice was appended.
    Failed {
        assistant_id: MessageId,
        notice_id: MessageId,
    },
    Ignored,
}

/// Owns the chat-session lifecycle: one transport session, one conversation,
/// and at most one stream fold in flight.
///
/// All mutation happens through discrete calls on a single owner, so no
/// locking discipline is needed.
pub struct ChatController<T: ChatTransport + ?Sized> {
    transport: Arc<T>,
    session_config: SessionConfig,
    session: ChatSession,
    conversation: Conversation,
    assembler: Option<StreamAssembler>,
}

impl<T: ChatTransport + ?Sized> ChatController<T> {
    /// Opens the initial session and starts with an empty conversation.
    pub fn new(transport: Arc<T>, session_config: SessionConfig) -> TransportResult<Self> {
        let session = transport.open(session_config.clone())?;
        Ok(Self {
            transport,
            session_config,
            session,
            conversation: Conversation::new(),
            assembler: None,
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.assembler.is_some()
    }

    /// Starts one send: appends the user message and the assistant
    /// placeholder, and hands back the stream to drive.
    ///
    /// Rejected while a turn is streaming; the single-streaming-message
    /// invariant is enforced here at the store level rather than by queuing.
    pub fn begin_send(&mut self, text: &str) -> Result<ActiveTurn, SendError> {
        ensure!(!text.trim().is_empty(), EmptyPromptSnafu);
        ensure!(
            self.assembler.is_none() && self.conversation.streaming_message().is_none(),
            TurnInFlightSnafu
        );

        let handle = self
            .transport
            .send(&mut self.session, text)
            .context(TransportSnafu)?;

        let user = Message::user(text);
        let user_id = user.id;
        let placeholder = Message::assistant_placeholder();
        let assistant_id = placeholder.id;

        self.conversation.append(user);
        self.conversation.append(placeholder);
        self.assembler = Some(StreamAssembler::new(assistant_id));

        tracing::debug!(%user_id, %assistant_id, "send started");

        Ok(ActiveTurn {
            user_id,
            assistant_id,
            stream: handle.stream,
            worker: handle.worker,
        })
    }

    /// Folds one stream event into the conversation.
    ///
    /// On completion the assistant turn is recorded on the session; on
    /// failure the placeholder is left as-is and a separate user-visible
    /// notice is appended after it. Events with no active fold (after a
    /// reset, or after a terminal event) are dropped.
    pub fn apply_event(&mut self, event: FragmentEvent) -> TurnProgress {
        let Some(assembler) = self.assembler.as_mut() else {
            tracing::warn!("stream event with no active turn; ignoring");
            return TurnProgress::Ignored;
        };
        let assistant_id = assembler.target();

        match assembler.apply(&mut self.conversation, &event) {
            AssemblyUpdate::Appended => match event {
                FragmentEvent::Fragment(chunk) => TurnProgress::Fragment(chunk),
                _ => TurnProgress::Ignored,
            },
            AssemblyUpdate::Completed => {
                let final_text = self
                    .conversation
                    .get(assistant_id)
                    .map(|message| message.text.clone())
                    .unwrap_or_default();
                self.session.record_assistant_turn(final_text);
                self.assembler = None;
                TurnProgress::Completed { assistant_id }
            }
            AssemblyUpdate::Failed { reason } => {
                tracing::warn!(%assistant_id, error = %reason, "stream failed; partial text preserved");
                let notice = Message::error_notice();
                let notice_id = notice.id;
                self.conversation.append(notice);
                self.assembler = None;
                TurnProgress::Failed {
                    assistant_id,
                    notice_id,
                }
            }
            AssemblyUpdate::Ignored => TurnProgress::Ignored,
        }
    }

    /// Starts a new conversation: fresh session and cleared history.
    ///
    /// The replacement session is opened first; on failure nothing changes,
    /// so the caller never observes a cleared list with a stale session or
    /// vice versa. Fragments from a turn that was in flight are dropped.
    pub fn reset(&mut self) -> TransportResult<()> {
        let session = self.transport.open(self.session_config.clone())?;
        self.session = session;
        self.conversation.clear();
        self.assembler = None;
        Ok(())
    }

    /// Atomically resets onto a new session configuration (model switch).
    pub fn reconfigure(&mut self, session_config: SessionConfig) -> TransportResult<()> {
        let session = self.transport.open(session_config.clone())?;
        self.session_config = session_config;
        self.session = session;
        self.conversation.clear();
        self.assembler = None;
        Ok(())
    }

    /// Replaces the text of a finished assistant message. The backend session
    /// history is deliberately untouched; edits are presentation-local.
    pub fn commit_edit(
        &mut self,
        id: MessageId,
        new_text: impl Into<String>,
    ) -> Result<(), EditRejection> {
        self.conversation.commit_edit(id, new_text)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use plume_llm::{TransportStreamHandle, fragment_channel};

    use super::*;
    use crate::message::{MessageStatus, Role};

    /// Transport that replays scripted fragment events, one script per send.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Vec<FragmentEvent>>>,
        fail_open: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<FragmentEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                fail_open: AtomicBool::new(false),
            }
        }

        fn fail_next_open(&self) {
            self.fail_open.store(true, Ordering::SeqCst);
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn open(&self, config: SessionConfig) -> TransportResult<ChatSession> {
            if self.fail_open.swap(false, Ordering::SeqCst) {
                return Err(TransportError::MissingApiKey {
                    stage: "scripted-open",
                    provider_id: "scripted".to_string(),
                });
            }
            Ok(ChatSession::new(config))
        }

        fn send(
            &self,
            session: &mut ChatSession,
            text: &str,
        ) -> TransportResult<TransportStreamHandle> {
            session.record_user_turn(text);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();

            let (event_tx, stream) = fragment_channel();
            for event in script {
                let _ = event_tx.send(event);
            }

            Ok(TransportStreamHandle {
                stream,
                worker: Box::pin(async {}),
            })
        }
    }

    fn fragments(chunks: &[&str]) -> Vec<FragmentEvent> {
        let mut events = chunks
            .iter()
            .map(|chunk| FragmentEvent::Fragment(chunk.to_string()))
            .collect::<Vec<_>>();
        events.push(FragmentEvent::Done);
        events
    }

    fn controller_with(
        scripts: Vec<Vec<FragmentEvent>>,
    ) -> ChatController<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::new(scripts));
        ChatController::new(transport, SessionConfig::default()).unwrap()
    }

    async fn drive(controller: &mut ChatController<ScriptedTransport>, turn: ActiveTurn) {
        let ActiveTurn {
            mut stream, worker, ..
        } = turn;
        worker.await;
        while let Some(event) = stream.recv().await {
            controller.apply_event(event);
        }
    }

    #[tokio::test]
    async fn send_grows_the_conversation_by_exactly_two_and_folds_fragments() {
        let mut controller =
            controller_with(vec![fragments(&["Quant", "um physics", " is..."])]);

        let turn = controller.begin_send("Explain quantum computing").unwrap();
        assert_eq!(controller.conversation().len(), 2);

        let messages = controller.conversation().messages();
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "Explain quantum computing");
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].is_streaming());

        let assistant_id = turn.assistant_id;
        drive(&mut controller, turn).await;

        assert_eq!(controller.conversation().len(), 2);
        let reply = controller.conversation().get(assistant_id).unwrap();
        assert_eq!(reply.text, "Quantum physics is...");
        assert!(!reply.is_streaming());
        assert!(!controller.is_turn_in_flight());
    }

    #[tokio::test]
    async fn completion_records_the_assistant_turn_on_the_session() {
        let mut controller = controller_with(vec![fragments(&["hi there"])]);

        let turn = controller.begin_send("hello").unwrap();
        drive(&mut controller, turn).await;

        let history = controller.session().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hi there");
    }

    #[tokio::test]
    async fn failure_appends_a_separate_notice_and_keeps_partial_text() {
        let mut controller = controller_with(vec![vec![
            FragmentEvent::Fragment("partial ".to_string()),
            FragmentEvent::Error("connection reset".to_string()),
        ]]);

        let turn = controller.begin_send("hello").unwrap();
        let assistant_id = turn.assistant_id;
        drive(&mut controller, turn).await;

        let messages = controller.conversation().messages();
        assert_eq!(messages.len(), 3);

        let placeholder = controller.conversation().get(assistant_id).unwrap();
        assert_eq!(placeholder.text, "partial ");
        assert_eq!(
            placeholder.status,
            MessageStatus::Failed("connection reset".to_string())
        );

        let notice = &messages[2];
        assert_eq!(notice.role, Role::Assistant);
        assert_eq!(notice.text, crate::message::ERROR_NOTICE_TEXT);

        // The half-finished reply is not replayed to the backend.
        assert_eq!(controller.session().history().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_does_not_block_the_next_one() {
        let mut controller = controller_with(vec![
            vec![FragmentEvent::Error("boom".to_string())],
            fragments(&["second answer"]),
        ]);

        let turn = controller.begin_send("first").unwrap();
        drive(&mut controller, turn).await;

        let turn = controller.begin_send("second").unwrap();
        let assistant_id = turn.assistant_id;
        drive(&mut controller, turn).await;

        assert_eq!(
            controller.conversation().get(assistant_id).unwrap().text,
            "second answer"
        );
    }

    #[test]
    fn a_second_send_while_streaming_is_rejected_at_the_store_level() {
        let mut controller = controller_with(vec![fragments(&["slow"]), fragments(&["never"])]);

        let _turn = controller.begin_send("first").unwrap();
        let error = controller.begin_send("second").unwrap_err();

        assert!(matches!(error, SendError::TurnInFlight));
        assert_eq!(controller.conversation().len(), 2);
    }

    #[test]
    fn empty_prompt_is_rejected_before_reaching_the_transport() {
        let mut controller = controller_with(vec![]);
        let error = controller.begin_send("   \n\t").unwrap_err();
        assert!(matches!(error, SendError::EmptyPrompt));
        assert!(controller.conversation().is_empty());
    }

    #[tokio::test]
    async fn reset_yields_an_empty_conversation_and_a_fresh_session() {
        let mut controller = controller_with(vec![fragments(&["answer"])]);

        let turn = controller.begin_send("hello").unwrap();
        drive(&mut controller, turn).await;
        assert_eq!(controller.session().history().len(), 2);

        controller.reset().unwrap();

        assert!(controller.conversation().is_empty());
        assert!(controller.session().history().is_empty());
    }

    #[tokio::test]
    async fn failed_reset_leaves_both_session_and_history_intact() {
        let transport = Arc::new(ScriptedTransport::new(vec![fragments(&["answer"])]));
        let mut controller =
            ChatController::new(Arc::clone(&transport), SessionConfig::default()).unwrap();

        let turn = controller.begin_send("hello").unwrap();
        drive(&mut controller, turn).await;

        transport.fail_next_open();
        let error = controller.reset().unwrap_err();
        assert!(matches!(error, TransportError::MissingApiKey { .. }));

        // No partial state: both the message list and the session survive.
        assert_eq!(controller.conversation().len(), 2);
        assert_eq!(controller.session().history().len(), 2);
    }

    #[test]
    fn reset_drops_an_in_flight_fold_and_later_events_are_ignored() {
        let mut controller = controller_with(vec![fragments(&["late"])]);

        let mut turn = controller.begin_send("hello").unwrap();
        controller.reset().unwrap();
        assert!(controller.conversation().is_empty());

        while let Some(event) = turn.stream.try_recv() {
            assert_eq!(controller.apply_event(event), TurnProgress::Ignored);
        }
        assert!(controller.conversation().is_empty());
    }
}
