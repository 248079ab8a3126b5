//! 错误类型 - Team 协调层的统一错误
//!
//! 所有错误都在调用点同步返回，本层不做后台重试。

use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskStatus;

/// 错误分类，供 MCP 层映射错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 标识符或输入格式错误（未触碰文件）
    Validation,
    /// team / task / message / member 不存在
    NotFound,
    /// team 或 member 已存在
    Conflict,
    /// 前置条件不满足（依赖未完成、仍有活跃成员等）
    Precondition,
    /// 锁获取超时
    Concurrency,
    /// 消息过大
    Capacity,
    /// I/O 或序列化失败
    Internal,
}

#[derive(Error, Debug)]
pub enum TeamError {
    #[error("Invalid name '{0}': expected 3-64 characters of [A-Za-z0-9-]")]
    InvalidName(String),

    #[error("Invalid agent id '{0}': expected 1-128 characters of [A-Za-z0-9_.@-], not starting with '.'")]
    InvalidAgentId(String),

    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Team '{0}' already exists")]
    AlreadyExists(String),

    #[error("Team '{0}' does not exist")]
    TeamNotFound(String),

    #[error("Agent '{agent_id}' is already a member of team '{team}'")]
    DuplicateMember { team: String, agent_id: String },

    #[error("Agent '{agent_id}' is not a member of team '{team}'")]
    MemberNotFound { team: String, agent_id: String },

    #[error("Agent '{agent_id}' is neither lead nor member of team '{team}'")]
    NotAMember { team: String, agent_id: String },

    #[error("Team '{team}' still has {count} active member(s)")]
    ActiveMembers { team: String, count: usize },

    #[error("Task '{task_id}' not found in team '{team}'")]
    TaskNotFound { team: String, task_id: String },

    #[error("Task '{task_id}' has unresolved dependencies: {}", .pending.join(", "))]
    UnresolvedDependency { task_id: String, pending: Vec<String> },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Task '{task_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Message '{message_id}' not found in inbox of '{agent_id}'")]
    MessageNotFound { agent_id: String, message_id: String },

    #[error("Message content is {size} bytes, limit is {limit}")]
    Oversize { size: usize, limit: usize },

    #[error("Timed out acquiring lock {} after {attempts} attempts ({waited_ms} ms)", .path.display())]
    LockTimeout {
        path: PathBuf,
        attempts: u32,
        waited_ms: u128,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TeamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TeamError::InvalidName(_)
            | TeamError::InvalidAgentId(_)
            | TeamError::UnknownVariant { .. }
            | TeamError::DependencyCycle { .. } => ErrorKind::Validation,
            TeamError::TeamNotFound(_)
            | TeamError::MemberNotFound { .. }
            | TeamError::TaskNotFound { .. }
            | TeamError::MessageNotFound { .. } => ErrorKind::NotFound,
            TeamError::AlreadyExists(_) | TeamError::DuplicateMember { .. } => ErrorKind::Conflict,
            TeamError::NotAMember { .. }
            | TeamError::ActiveMembers { .. }
            | TeamError::UnresolvedDependency { .. }
            | TeamError::InvalidTransition { .. } => ErrorKind::Precondition,
            TeamError::LockTimeout { .. } => ErrorKind::Concurrency,
            TeamError::Oversize { .. } => ErrorKind::Capacity,
            TeamError::Io(_) | TeamError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, TeamError>;
