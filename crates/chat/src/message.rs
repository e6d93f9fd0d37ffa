use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// User-visible text appended as a separate notice when a send fails.
pub const ERROR_NOTICE_TEXT: &str = "⚠️ Oops! Something went wrong. Please try again.";

/// Stable identifier for one message, generated at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
///
/// A `Failed` placeholder keeps whatever partial text had streamed; it is
/// never deleted and never rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming,
    Done,
    Failed(String),
}

/// One conversation entry.
///
/// User messages are immutable once created. Assistant messages are mutated
/// in place while streaming and may be the target of an explicit edit once
/// the stream has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub status: MessageStatus,
    pub created_at_unix_ms: u64,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            text: text.into(),
            status,
            created_at_unix_ms: now_unix_ms(),
        }
    }

    /// Creates an immutable user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, MessageStatus::Done)
    }

    /// Creates the empty assistant placeholder filled in by the stream fold.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    /// Creates the separate error notice appended after a failed placeholder.
    pub fn error_notice() -> Self {
        Self::new(Role::Assistant, ERROR_NOTICE_TEXT, MessageStatus::Done)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
