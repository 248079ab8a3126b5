//! Team Bridge - 面向协调者 / worker 的统一入口
//!
//! 把 registry、task list、mailbox 绑定到同一个 `Storage` 根目录上，
//! 并提供跨 store 的 team 状态汇总。

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::registry::{MemberStatus, TeamRegistry};
use crate::config::CoordConfig;
use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::storage::Storage;
use crate::task::{TaskCounts, TaskList};

/// Team 状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamStatus {
    pub team_name: String,
    pub description: Option<String>,
    pub lead_agent_id: String,
    pub lead_unread_count: usize,
    pub members: Vec<TeamMemberStatus>,
    pub tasks: TaskCounts,
    pub unread_messages: usize,
}

/// 成员状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMemberStatus {
    pub name: String,
    pub agent_id: String,
    pub category: String,
    pub status: MemberStatus,
    pub unread_count: usize,
}

/// Team Bridge
#[derive(Debug, Clone)]
pub struct TeamBridge {
    registry: TeamRegistry,
    tasks: TaskList,
    mailbox: Mailbox,
}

impl TeamBridge {
    pub fn new(storage: Storage) -> Self {
        Self {
            registry: TeamRegistry::new(storage.clone()),
            tasks: TaskList::new(storage.clone()),
            mailbox: Mailbox::new(storage),
        }
    }

    /// 按配置（文件 + 环境变量）创建
    pub fn from_config(config: &CoordConfig) -> Self {
        Self::new(config.storage())
    }

    pub fn registry(&self) -> &TeamRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn storage(&self) -> &Storage {
        self.registry.storage()
    }

    fn unread_or_zero(&self, team: &str, agent_id: &str) -> usize {
        self.mailbox.get_unread_count(team, agent_id).unwrap_or_else(|e| {
            warn!(team = %team, agent_id = %agent_id, error = %e, "Failed to count unread messages");
            0
        })
    }

    /// 获取 team 完整状态（成员、未读数、任务统计）
    pub fn get_team_status(&self, team: &str) -> Result<TeamStatus> {
        let config = self.registry.require_team(team)?;

        let members: Vec<TeamMemberStatus> = config
            .members
            .iter()
            .map(|m| TeamMemberStatus {
                name: m.name.clone(),
                agent_id: m.agent_id.clone(),
                category: m.category.clone(),
                status: m.status,
                unread_count: self.unread_or_zero(team, &m.agent_id),
            })
            .collect();

        let lead_unread_count = if config.member(&config.lead_agent_id).is_some() {
            0
        } else {
            self.unread_or_zero(team, &config.lead_agent_id)
        };
        let unread_messages =
            lead_unread_count + members.iter().map(|m| m.unread_count).sum::<usize>();

        Ok(TeamStatus {
            team_name: config.name,
            description: config.description,
            lead_agent_id: config.lead_agent_id,
            lead_unread_count,
            members,
            tasks: self.tasks.task_counts(team)?,
            unread_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MessageType;
    use crate::team::TeamMember;
    use tempfile::tempdir;

    fn create_test_bridge() -> (TeamBridge, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let bridge = TeamBridge::new(Storage::new(temp.path()));
        (bridge, temp)
    }

    #[test]
    fn test_from_config_uses_root() {
        let temp = tempdir().unwrap();
        let config = CoordConfig::default().with_root(temp.path());
        let bridge = TeamBridge::from_config(&config);
        assert_eq!(bridge.storage().root(), temp.path());
    }

    #[test]
    fn test_get_team_status() {
        let (bridge, _temp) = create_test_bridge();
        bridge
            .registry()
            .create_team_with_description("test-team", "lead", Some("demo"))
            .unwrap();
        bridge
            .registry()
            .add_teammate("test-team", TeamMember::new("a", "agent-a", "coder"))
            .unwrap();
        bridge
            .registry()
            .add_teammate("test-team", TeamMember::new("b", "agent-b", "reviewer"))
            .unwrap();

        let first = bridge.tasks().create_task("test-team", "first", &[]).unwrap();
        bridge.tasks().create_task("test-team", "second", &[]).unwrap();
        bridge.tasks().claim_task("test-team", &first, "agent-a").unwrap();

        bridge
            .mailbox()
            .send_message("test-team", "lead", "agent-a", "hi", MessageType::Message, None)
            .unwrap();
        bridge
            .mailbox()
            .send_message("test-team", "agent-b", "lead", "done", MessageType::Message, None)
            .unwrap();

        let status = bridge.get_team_status("test-team").unwrap();
        assert_eq!(status.team_name, "test-team");
        assert_eq!(status.description.as_deref(), Some("demo"));
        assert_eq!(status.members.len(), 2);
        assert_eq!(status.members[0].unread_count, 1);
        assert_eq!(status.members[1].unread_count, 0);
        assert_eq!(status.lead_unread_count, 1);
        assert_eq!(status.unread_messages, 2);
        assert_eq!(status.tasks.pending, 1);
        assert_eq!(status.tasks.in_progress, 1);
    }

    #[test]
    fn test_get_team_status_missing_team() {
        let (bridge, _temp) = create_test_bridge();
        assert!(bridge.get_team_status("ghost-team").is_err());
    }
}
