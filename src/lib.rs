//! Teamwork - 多 agent team 的共享任务队列与 mailbox 协调层
//!
//! 所有状态都是显式根目录下的 JSON 文档，多个独立进程通过文件锁协调。

pub mod config;
pub mod error;
pub mod mailbox;
pub mod mcp;
pub mod storage;
pub mod task;
pub mod team;

pub use config::CoordConfig;
pub use error::{ErrorKind, Result, TeamError};
pub use mailbox::{Mailbox, Message, MessageType, MAX_CONTENT_BYTES};
pub use mcp::McpServer;
pub use storage::{LockOptions, LockStrategy, Storage};
pub use task::{Completion, Task, TaskCounts, TaskList, TaskStatus};
pub use team::{
    MemberStatus, TeamBridge, TeamConfig, TeamMember, TeamMemberStatus, TeamRegistry, TeamStatus,
};
