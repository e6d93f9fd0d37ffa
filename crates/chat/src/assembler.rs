use plume_llm::FragmentEvent;

use crate::conversation::Conversation;
use crate::message::{MessageId, MessageStatus};

/// Fold phases for one outstanding send.
///
/// `Pending` until the first fragment, `Streaming` while fragments fold,
/// then exactly one of the terminal phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyPhase {
    Pending,
    Streaming,
    Complete,
    Failed,
}

/// Outcome of folding one fragment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyUpdate {
    Appended,
    Completed,
    Failed { reason: String },
    /// Event arrived after a terminal phase; dropped.
    Ignored,
}

/// Turns a fragment stream into mutations on exactly one target message.
///
/// Fragments are folded strictly in arrival order with no coalescing beyond
/// concatenation, so the final text equals the concatenation of every
/// fragment regardless of chunk boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAssembler {
    target: MessageId,
    phase: AssemblyPhase,
}

impl StreamAssembler {
    pub fn new(target: MessageId) -> Self {
        Self {
            target,
            phase: AssemblyPhase::Pending,
        }
    }

    pub fn target(&self) -> MessageId {
        self.target
    }

    pub fn phase(&self) -> AssemblyPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, AssemblyPhase::Complete | AssemblyPhase::Failed)
    }

    /// Folds one event into the target message.
    ///
    /// On failure the partial text already appended stays in place; the
    /// placeholder is marked failed, never deleted.
    pub fn apply(&mut self, conversation: &mut Conversation, event: &FragmentEvent) -> AssemblyUpdate {
        if self.is_terminal() {
            tracing::warn!(
                target = %self.target,
                phase = ?self.phase,
                "fragment event after terminal phase; ignoring"
            );
            return AssemblyUpdate::Ignored;
        }

        match event {
            FragmentEvent::Fragment(chunk) => {
                conversation.mutate(self.target, |message| message.text.push_str(chunk));
                self.phase = AssemblyPhase::Streaming;
                AssemblyUpdate::Appended
            }
            FragmentEvent::Done => {
                conversation.mutate(self.target, |message| {
                    message.status = MessageStatus::Done;
                });
                self.phase = AssemblyPhase::Complete;
                AssemblyUpdate::Completed
            }
            FragmentEvent::Error(reason) => {
                conversation.mutate(self.target, |message| {
                    message.status = MessageStatus::Failed(reason.clone());
                });
                self.phase = AssemblyPhase::Failed;
                AssemblyUpdate::Failed {
                    reason: reason.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn conversation_with_placeholder() -> (Conversation, MessageId) {
        let mut conversation = Conversation::new();
        let placeholder = Message::assistant_placeholder();
        let id = placeholder.id;
        conversation.append(placeholder);
        (conversation, id)
    }

    #[test]
    fn folded_text_is_the_in_order_concatenation_of_fragments() {
        let (mut conversation, id) = conversation_with_placeholder();
        let mut assembler = StreamAssembler::new(id);

        for chunk in ["Quant", "um physics", " is..."] {
            let update = assembler.apply(
                &mut conversation,
                &FragmentEvent::Fragment(chunk.to_string()),
            );
            assert_eq!(update, AssemblyUpdate::Appended);
            assert_eq!(assembler.phase(), AssemblyPhase::Streaming);
        }

        assert_eq!(conversation.get(id).unwrap().text, "Quantum physics is...");
        assert!(conversation.get(id).unwrap().is_streaming());
    }

    #[test]
    fn chunking_boundaries_do_not_change_the_result() {
        let whole = "streaming answers arrive in pieces";
        for split in [1, 3, 7, whole.len()] {
            let (mut conversation, id) = conversation_with_placeholder();
            let mut assembler = StreamAssembler::new(id);

            let mut rest = whole;
            while !rest.is_empty() {
                let take = split.min(rest.len());
                let (chunk, tail) = rest.split_at(take);
                assembler.apply(
                    &mut conversation,
                    &FragmentEvent::Fragment(chunk.to_string()),
                );
                rest = tail;
            }
            assembler.apply(&mut conversation, &FragmentEvent::Done);

            assert_eq!(conversation.get(id).unwrap().text, whole);
        }
    }

    #[test]
    fn clean_end_is_terminal_and_clears_streaming() {
        let (mut conversation, id) = conversation_with_placeholder();
        let mut assembler = StreamAssembler::new(id);

        assembler.apply(&mut conversation, &FragmentEvent::Fragment("hi".into()));
        let update = assembler.apply(&mut conversation, &FragmentEvent::Done);

        assert_eq!(update, AssemblyUpdate::Completed);
        assert_eq!(assembler.phase(), AssemblyPhase::Complete);
        assert!(!conversation.get(id).unwrap().is_streaming());
        assert_eq!(conversation.get(id).unwrap().status, MessageStatus::Done);
    }

    #[test]
    fn failure_preserves_prior_fragments_and_is_terminal() {
        let (mut conversation, id) = conversation_with_placeholder();
        let mut assembler = StreamAssembler::new(id);

        assembler.apply(&mut conversation, &FragmentEvent::Fragment("partial ".into()));
        let update = assembler.apply(
            &mut conversation,
            &FragmentEvent::Error("connection reset".into()),
        );

        assert_eq!(
            update,
            AssemblyUpdate::Failed {
                reason: "connection reset".into()
            }
        );
        assert_eq!(assembler.phase(), AssemblyPhase::Failed);

        let message = conversation.get(id).unwrap();
        assert_eq!(message.text, "partial ");
        assert!(!message.is_streaming());
        assert_eq!(
            message.status,
            MessageStatus::Failed("connection reset".into())
        );
    }

    #[test]
    fn failure_before_any_fragment_leaves_the_placeholder_empty() {
        let (mut conversation, id) = conversation_with_placeholder();
        let mut assembler = StreamAssembler::new(id);

        assembler.apply(&mut conversation, &FragmentEvent::Error("boom".into()));

        let message = conversation.get(id).unwrap();
        assert_eq!(message.text, "");
        assert!(!message.is_streaming());
    }

    #[test]
    fn events_after_a_terminal_phase_are_ignored() {
        let (mut conversation, id) = conversation_with_placeholder();
        let mut assembler = StreamAssembler::new(id);

        assembler.apply(&mut conversation, &FragmentEvent::Fragment("done".into()));
        assembler.apply(&mut conversation, &FragmentEvent::Done);

        let update = assembler.apply(
            &mut conversation,
            &FragmentEvent::Fragment("straggler".into()),
        );

        assert_eq!(update, AssemblyUpdate::Ignored);
        assert_eq!(conversation.get(id).unwrap().text, "done");
    }
}
