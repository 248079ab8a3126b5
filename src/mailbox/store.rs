//! Mailbox - 每个 (team, agent) 一个 inbox
//!
//! 发送方和接收方都必须是 team 的 lead 或已注册成员。写操作在 inbox 级排他锁下
//! 做读-改-写，并发发送给同一接收方的消息不会丢失。

use serde_json::json;
use tracing::{debug, info, warn};

use super::message::{check_content_size, Message, MessageType, REQUEST_ID_KEY};
use crate::error::{Result, TeamError};
use crate::storage::{read_json_opt, read_json_strict, validate_agent_id, write_json_atomic, Storage};
use crate::team::{TeamConfig, TeamRegistry};

/// Mailbox
#[derive(Debug, Clone)]
pub struct Mailbox {
    storage: Storage,
    registry: TeamRegistry,
}

impl Mailbox {
    pub fn new(storage: Storage) -> Self {
        Self {
            registry: TeamRegistry::new(storage.clone()),
            storage,
        }
    }

    fn require_participant(&self, config: &TeamConfig, agent_id: &str) -> Result<()> {
        validate_agent_id(agent_id)?;
        if config.is_participant(agent_id) {
            Ok(())
        } else {
            Err(TeamError::NotAMember {
                team: config.name.clone(),
                agent_id: agent_id.to_string(),
            })
        }
    }

    /// 在 inbox 锁保护下执行读-改-写；内容未变化时不落盘
    fn with_locked_inbox<F, T>(&self, team: &str, agent_id: &str, operation: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Message>) -> Result<T>,
    {
        let path = self.storage.mailbox_path(team, agent_id)?;
        let lock = self.storage.lock(&self.storage.mailbox_lock_path(team, agent_id)?)?;
        if !self.registry.team_exists(team) {
            lock.release()?;
            return Err(TeamError::TeamNotFound(team.to_string()));
        }

        let mut messages: Vec<Message> = read_json_strict(&path)?.unwrap_or_default();
        let before = messages.clone();

        let result = operation(&mut messages)?;

        if messages != before {
            write_json_atomic(&path, &messages)?;
        }
        lock.release()?;
        Ok(result)
    }

    /// 在已存在的 inbox 上加锁修改；inbox 文档不存在时直接返回 `missing`
    fn with_existing_inbox<F, T>(&self, team: &str, agent_id: &str, missing: T, operation: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Message>) -> Result<T>,
    {
        self.registry.require_team(team)?;
        if !self.storage.mailbox_path(team, agent_id)?.exists() {
            return Ok(missing);
        }
        self.with_locked_inbox(team, agent_id, operation)
    }

    fn deliver(&self, team: &str, message: Message) -> Result<String> {
        let id = message.id.clone();
        let to = message.to.clone();
        self.with_locked_inbox(team, &to, |messages| {
            messages.push(message);
            Ok(())
        })?;
        Ok(id)
    }

    /// 发送消息，返回消息 id
    pub fn send_message(
        &self,
        team: &str,
        from: &str,
        to: &str,
        content: &str,
        message_type: MessageType,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        check_content_size(content)?;
        let config = self.registry.require_team(team)?;
        self.require_participant(&config, from)?;
        self.require_participant(&config, to)?;

        let id = self.deliver(team, Message::new(from, to, content, message_type, metadata))?;
        debug!(team = %team, from = %from, to = %to, message_type = %message_type, message_id = %id, "Message sent");
        Ok(id)
    }

    /// 广播给调用时名册中的所有成员（不含发送方），返回各消息 id
    pub fn broadcast(
        &self,
        team: &str,
        from: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Vec<String>> {
        check_content_size(content)?;
        let config = self.registry.require_team(team)?;
        self.require_participant(&config, from)?;

        let mut ids = Vec::new();
        for member in config.members.iter().filter(|m| m.agent_id != from) {
            let message = Message::new(
                from,
                &member.agent_id,
                content,
                MessageType::Broadcast,
                metadata.clone(),
            );
            ids.push(self.deliver(team, message)?);
        }

        info!(team = %team, from = %from, recipients = ids.len(), "Broadcast sent");
        Ok(ids)
    }

    /// 读取 inbox（不加锁）；损坏的文档降级为空
    pub fn get_messages(&self, team: &str, agent_id: &str, unread_only: bool) -> Result<Vec<Message>> {
        let path = self.storage.mailbox_path(team, agent_id)?;
        self.registry.require_team(team)?;

        let messages: Vec<Message> = read_json_opt(&path).unwrap_or_default();
        Ok(if unread_only {
            messages.into_iter().filter(|m| !m.read).collect()
        } else {
            messages
        })
    }

    pub fn get_unread_count(&self, team: &str, agent_id: &str) -> Result<usize> {
        Ok(self.get_messages(team, agent_id, true)?.len())
    }

    /// 标记单条消息已读，返回是否发生变化（重复标记为 no-op）
    pub fn mark_read(&self, team: &str, agent_id: &str, message_id: &str) -> Result<bool> {
        let not_found = || TeamError::MessageNotFound {
            agent_id: agent_id.to_string(),
            message_id: message_id.to_string(),
        };

        self.registry.require_team(team)?;
        if !self.storage.mailbox_path(team, agent_id)?.exists() {
            return Err(not_found());
        }

        self.with_locked_inbox(team, agent_id, |messages| {
            let message = messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(not_found)?;
            let changed = !message.read;
            message.read = true;
            Ok(changed)
        })
    }

    /// 全部标记已读，返回本次翻转的数量
    pub fn mark_all_read(&self, team: &str, agent_id: &str) -> Result<usize> {
        self.with_existing_inbox(team, agent_id, 0, |messages| {
            let mut marked = 0;
            for message in messages.iter_mut().filter(|m| !m.read) {
                message.read = true;
                marked += 1;
            }
            Ok(marked)
        })
    }

    /// 清空 inbox，返回删除的消息数
    pub fn clear_mailbox(&self, team: &str, agent_id: &str) -> Result<usize> {
        let cleared = self.with_existing_inbox(team, agent_id, 0, |messages| {
            let count = messages.len();
            messages.clear();
            Ok(count)
        })?;
        if cleared > 0 {
            info!(team = %team, agent_id = %agent_id, cleared, "Mailbox cleared");
        }
        Ok(cleared)
    }

    /// 最早的未读 shutdown_request
    pub fn get_pending_shutdown_request(&self, team: &str, agent_id: &str) -> Result<Option<Message>> {
        Ok(self
            .get_messages(team, agent_id, true)?
            .into_iter()
            .filter(|m| m.message_type == MessageType::ShutdownRequest)
            .min_by_key(|m| m.timestamp))
    }

    /// 发送 shutdown 请求，返回请求 id（即消息 id）
    pub fn request_shutdown(&self, team: &str, from: &str, to: &str, reason: Option<&str>) -> Result<String> {
        let content = reason.unwrap_or("shutdown requested");
        check_content_size(content)?;
        let config = self.registry.require_team(team)?;
        self.require_participant(&config, from)?;
        self.require_participant(&config, to)?;

        let mut message = Message::new(from, to, content, MessageType::ShutdownRequest, None);
        message.metadata = Some(json!({ REQUEST_ID_KEY: message.id }));

        let id = self.deliver(team, message)?;
        info!(team = %team, from = %from, to = %to, request_id = %id, "Shutdown requested");
        Ok(id)
    }

    /// 回复 shutdown 请求，并把本方 inbox 中对应的请求标记为已读
    pub fn respond_shutdown(
        &self,
        team: &str,
        from: &str,
        to: &str,
        request_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> Result<String> {
        let content = reason.unwrap_or(if approved { "approved" } else { "rejected" });
        let id = self.send_message(
            team,
            from,
            to,
            content,
            MessageType::ShutdownResponse,
            Some(json!({ REQUEST_ID_KEY: request_id, "approved": approved })),
        )?;

        match self.mark_read(team, from, request_id) {
            Ok(_) => {}
            Err(TeamError::MessageNotFound { .. }) => {
                warn!(team = %team, agent_id = %from, request_id = %request_id, "Shutdown request not found in inbox");
            }
            Err(e) => return Err(e),
        }

        info!(team = %team, from = %from, to = %to, request_id = %request_id, approved, "Shutdown response sent");
        Ok(id)
    }
}
