//! Mailbox 模块 - team 内点对点消息
//!
//! 数据存储在 `<root>/mailboxes/{team}/{agentId}/messages.json`，
//! 首次成功发送前不会创建接收方的 inbox 文档。

pub mod message;
pub mod store;

pub use message::{Message, MessageType, MAX_CONTENT_BYTES};
pub use store::Mailbox;
