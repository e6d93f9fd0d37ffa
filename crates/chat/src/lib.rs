#![deny(unsafe_code)]

//! Chat-session lifecycle, streaming message assembly, and the markdown
//! editing buffer.
//!
//! State lives in explicit owned objects mutated through their defined
//! operations, so everything here is testable with no rendering surface.

pub mod assembler;
pub mod controller;
pub mod conversation;
pub mod editor;
pub mod ingest;
pub mod message;

pub use assembler::{AssemblyPhase, AssemblyUpdate, StreamAssembler};
pub use controller::{ActiveTurn, ChatController, SendError, TurnProgress};
pub use conversation::{Conversation, EditRejection};
pub use editor::{EditorBuffer, MarkdownFormat, Selection};
pub use ingest::{IngestError, insertable_fragment};
pub use message::{ERROR_NOTICE_TEXT, Message, MessageId, MessageStatus, Role};
