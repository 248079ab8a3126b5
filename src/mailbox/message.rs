//! 消息数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TeamError;

/// 单条消息内容上限（字节）
pub const MAX_CONTENT_BYTES: usize = 10 * 1024;

/// shutdown 消息 metadata 中的请求 id 字段
pub const REQUEST_ID_KEY: &str = "requestId";

/// 消息类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Message,
    Broadcast,
    Notification,
    ShutdownRequest,
    ShutdownResponse,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Message => write!(f, "message"),
            MessageType::Broadcast => write!(f, "broadcast"),
            MessageType::Notification => write!(f, "notification"),
            MessageType::ShutdownRequest => write!(f, "shutdown_request"),
            MessageType::ShutdownResponse => write!(f, "shutdown_response"),
        }
    }
}

impl FromStr for MessageType {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "message" => Ok(MessageType::Message),
            "broadcast" => Ok(MessageType::Broadcast),
            "notification" => Ok(MessageType::Notification),
            "shutdown_request" => Ok(MessageType::ShutdownRequest),
            "shutdown_response" => Ok(MessageType::ShutdownResponse),
            _ => Err(TeamError::UnknownVariant {
                kind: "message type",
                value: s.to_string(),
            }),
        }
    }
}

/// Inbox 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    /// 始终是具体的 agent id（broadcast 会展开为多条）
    pub to: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    pub fn new(
        from: &str,
        to: &str,
        content: &str,
        message_type: MessageType,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            message_type,
            content: content.to_string(),
            timestamp: Utc::now(),
            read: false,
            metadata,
        }
    }

    /// shutdown 请求/响应携带的请求 id
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.get(REQUEST_ID_KEY)?.as_str()
    }
}

/// 检查消息大小
pub fn check_content_size(content: &str) -> crate::error::Result<()> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(TeamError::Oversize {
            size: content.len(),
            limit: MAX_CONTENT_BYTES,
        });
    }
    Ok(())
}
