//! Data model: wire entries, parsed messages, and immutable session snapshots.

mod entry;
mod message;
mod session;

pub use entry::{RawBlock, RawContent, RawEntry, RawMessage};
pub use message::{
    tool_category, ContentBlock, Message, MessageRole, ToolResultBlock, ToolUseBlock,
};
pub use session::{Agent, Session, Thread, ToolCall};
