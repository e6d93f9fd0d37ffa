use snafu::Snafu;

use crate::message::{Message, MessageId, Role};

/// Rejection reason for an edit aimed at an invalid target.
///
/// These are caller-level precondition violations: the surface is expected
/// to prevent them, so none of them mutate the conversation.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum EditRejection {
    #[snafu(display("invalid edit target: message '{id}' does not exist"))]
    NotFound { id: MessageId },
    #[snafu(display("invalid edit target: message '{id}' is still streaming"))]
    StillStreaming { id: MessageId },
    #[snafu(display("invalid edit target: message '{id}' is not an assistant reply"))]
    NotAssistantRole { id: MessageId },
}

/// Ordered sequence of messages; insertion order is display order.
///
/// Append-only during normal operation. The only wholesale mutation is
/// [`Conversation::commit_edit`], and the only destruction is a full reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Adds to the end; never reorders existing entries.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// Applies an update to exactly one message by id.
    ///
    /// An unknown id is a no-op and returns false; that situation is a logic
    /// error upstream, not a reportable user error, so it is only logged.
    pub fn mutate(&mut self, id: MessageId, apply: impl FnOnce(&mut Message)) -> bool {
        match self.messages.iter_mut().find(|message| message.id == id) {
            Some(message) => {
                apply(message);
                true
            }
            None => {
                tracing::warn!(message_id = %id, "mutate target not found; ignoring");
                false
            }
        }
    }

    /// Returns the in-flight message, of which there is at most one.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.is_streaming())
    }

    /// Replaces the text of a non-streaming assistant message wholesale.
    ///
    /// `id`, `role`, `status`, and the creation timestamp are unchanged.
    pub fn commit_edit(
        &mut self,
        id: MessageId,
        new_text: impl Into<String>,
    ) -> Result<(), EditRejection> {
        let Some(message) = self.messages.iter_mut().find(|message| message.id == id) else {
            return Err(EditRejection::NotFound { id });
        };

        if message.role != Role::Assistant {
            return Err(EditRejection::NotAssistantRole { id });
        }
        if message.is_streaming() {
            return Err(EditRejection::StillStreaming { id });
        }

        message.text = new_text.into();
        Ok(())
    }

    /// Empties the sequence. Only the controller's atomic reset calls this,
    /// paired with reopening the transport session.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
