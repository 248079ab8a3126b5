//! Team Registry - team 成员名册
//!
//! 每个 team 一个 `teams/{team}/config.json`，记录 lead 和成员列表。
//! 所有写操作都在 team 级排他锁下做整文档的读-改-写，并用临时文件 + rename 落盘，
//! 并发写入不会互相覆盖。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{Result, TeamError};
use crate::storage::{
    ensure_directory, read_json_opt, read_json_strict, remove_dir_if_exists, remove_file_if_exists,
    validate_agent_id, validate_name, write_json_atomic, Storage,
};

/// 成员状态（仅供参考，不强制状态机）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Idle,
    ShuttingDown,
    Shutdown,
}

impl MemberStatus {
    /// active / idle / shutting_down 都算仍在参与，阻止删除 team
    pub fn is_live(self) -> bool {
        !matches!(self, MemberStatus::Shutdown)
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Active => write!(f, "active"),
            MemberStatus::Idle => write!(f, "idle"),
            MemberStatus::ShuttingDown => write!(f, "shutting_down"),
            MemberStatus::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl FromStr for MemberStatus {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "active" => Ok(MemberStatus::Active),
            "idle" => Ok(MemberStatus::Idle),
            "shutting_down" => Ok(MemberStatus::ShuttingDown),
            "shutdown" => Ok(MemberStatus::Shutdown),
            _ => Err(TeamError::UnknownVariant {
                kind: "member status",
                value: s.to_string(),
            }),
        }
    }
}

/// Team 成员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub name: String,
    pub agent_id: String,
    /// worker 类别（由外部策略决定）
    pub category: String,
    /// 外部会话关联句柄
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub spawned_at: DateTime<Utc>,
    pub status: MemberStatus,
}

impl TeamMember {
    pub fn new(name: &str, agent_id: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            agent_id: agent_id.to_string(),
            category: category.to_string(),
            session_id: None,
            spawned_at: Utc::now(),
            status: MemberStatus::Active,
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}

/// Team 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub lead_agent_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

impl TeamConfig {
    pub fn member(&self, agent_id: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.agent_id == agent_id)
    }

    pub fn is_lead(&self, agent_id: &str) -> bool {
        self.lead_agent_id == agent_id
    }

    /// lead 或已注册成员
    pub fn is_participant(&self, agent_id: &str) -> bool {
        self.is_lead(agent_id) || self.member(agent_id).is_some()
    }

    pub fn live_member_count(&self) -> usize {
        self.members.iter().filter(|m| m.status.is_live()).count()
    }

    pub fn has_active_members(&self) -> bool {
        self.live_member_count() > 0
    }
}

/// Team Registry
#[derive(Debug, Clone)]
pub struct TeamRegistry {
    storage: Storage,
}

impl TeamRegistry {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// 创建新 team（空成员列表）
    pub fn create_team(&self, name: &str, lead_agent_id: &str) -> Result<TeamConfig> {
        self.create_team_with_description(name, lead_agent_id, None)
    }

    pub fn create_team_with_description(
        &self,
        name: &str,
        lead_agent_id: &str,
        description: Option<&str>,
    ) -> Result<TeamConfig> {
        validate_name(name)?;
        validate_agent_id(lead_agent_id)?;

        let team_dir = self.storage.team_dir(name)?;
        ensure_directory(&team_dir)?;
        let lock = self.storage.lock(&self.storage.team_lock_path(name)?)?;

        let config_path = self.storage.team_config_path(name)?;
        if read_json_opt::<TeamConfig>(&config_path).is_some() {
            return Err(TeamError::AlreadyExists(name.to_string()));
        }

        let config = TeamConfig {
            name: name.to_string(),
            description: description.map(str::to_string),
            lead_agent_id: lead_agent_id.to_string(),
            created_at: Utc::now(),
            members: Vec::new(),
        };
        write_json_atomic(&config_path, &config)?;
        lock.release()?;

        info!(team = %name, lead = %lead_agent_id, "Team created");
        Ok(config)
    }

    /// 读取 team 配置；不存在或损坏时返回 `None`
    pub fn get_team_config(&self, name: &str) -> Result<Option<TeamConfig>> {
        let path = self.storage.team_config_path(name)?;
        Ok(read_json_opt(&path))
    }

    /// 读取 team 配置，不存在时返回 `TeamNotFound`
    pub fn require_team(&self, name: &str) -> Result<TeamConfig> {
        self.get_team_config(name)?
            .ok_or_else(|| TeamError::TeamNotFound(name.to_string()))
    }

    /// team 存在 ⇔ 配置文档存在且可解析
    pub fn team_exists(&self, name: &str) -> bool {
        matches!(self.get_team_config(name), Ok(Some(_)))
    }

    /// 列出所有 team（按名称排序）
    pub fn list_teams(&self) -> Vec<String> {
        let entries = match fs::read_dir(self.storage.teams_dir()) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut teams: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| self.team_exists(name))
            .collect();

        teams.sort();
        teams
    }

    /// 在 team 锁保护下执行配置的读-改-写
    fn with_locked_config<F, T>(&self, name: &str, operation: F) -> Result<T>
    where
        F: FnOnce(&mut TeamConfig) -> Result<T>,
    {
        let config_path = self.storage.team_config_path(name)?;
        if !self.storage.team_dir(name)?.is_dir() {
            return Err(TeamError::TeamNotFound(name.to_string()));
        }
        let lock = self.storage.lock(&self.storage.team_lock_path(name)?)?;

        let mut config: TeamConfig = read_json_strict(&config_path)?
            .ok_or_else(|| TeamError::TeamNotFound(name.to_string()))?;
        let before = config.clone();

        let result = operation(&mut config)?;

        if config.name != before.name {
            warn!(team = %name, attempted = %config.name, "Team name is immutable, keeping original");
            config.name = before.name.clone();
        }
        if config != before {
            write_json_atomic(&config_path, &config)?;
        }

        lock.release()?;
        Ok(result)
    }

    /// 通用更新（名称不可变）
    pub fn update_team_config<F>(&self, name: &str, update: F) -> Result<TeamConfig>
    where
        F: FnOnce(&mut TeamConfig),
    {
        self.with_locked_config(name, |config| {
            update(config);
            Ok(())
        })?;
        self.require_team(name)
    }

    /// 添加成员
    pub fn add_teammate(&self, team: &str, member: TeamMember) -> Result<()> {
        validate_agent_id(&member.agent_id)?;

        self.with_locked_config(team, |config| {
            if config.member(&member.agent_id).is_some() {
                return Err(TeamError::DuplicateMember {
                    team: team.to_string(),
                    agent_id: member.agent_id.clone(),
                });
            }
            info!(team = %team, agent_id = %member.agent_id, category = %member.category, "Teammate added");
            config.members.push(member);
            Ok(())
        })
    }

    /// 移除成员，返回被移除的记录
    pub fn remove_teammate(&self, team: &str, agent_id: &str) -> Result<TeamMember> {
        self.with_locked_config(team, |config| {
            let index = config
                .members
                .iter()
                .position(|m| m.agent_id == agent_id)
                .ok_or_else(|| TeamError::MemberNotFound {
                    team: team.to_string(),
                    agent_id: agent_id.to_string(),
                })?;
            info!(team = %team, agent_id = %agent_id, "Teammate removed");
            Ok(config.members.remove(index))
        })
    }

    /// 更新成员状态
    pub fn update_teammate_status(
        &self,
        team: &str,
        agent_id: &str,
        status: MemberStatus,
    ) -> Result<()> {
        self.with_locked_config(team, |config| {
            let member = config
                .members
                .iter_mut()
                .find(|m| m.agent_id == agent_id)
                .ok_or_else(|| TeamError::MemberNotFound {
                    team: team.to_string(),
                    agent_id: agent_id.to_string(),
                })?;
            if member.status != status {
                info!(team = %team, agent_id = %agent_id, from = %member.status, to = %status, "Teammate status changed");
                member.status = status;
            }
            Ok(())
        })
    }

    pub fn get_member(&self, team: &str, agent_id: &str) -> Result<Option<TeamMember>> {
        Ok(self.require_team(team)?.member(agent_id).cloned())
    }

    pub fn is_team_lead(&self, team: &str, agent_id: &str) -> Result<bool> {
        Ok(self.require_team(team)?.is_lead(agent_id))
    }

    pub fn is_participant(&self, team: &str, agent_id: &str) -> Result<bool> {
        Ok(self.require_team(team)?.is_participant(agent_id))
    }

    /// 是否还有 active / idle / shutting_down 的成员
    pub fn has_active_members(&self, team: &str) -> Result<bool> {
        Ok(self.require_team(team)?.has_active_members())
    }

    /// 删除 team（仍有活跃成员时拒绝）
    pub fn delete_team(&self, team: &str) -> Result<()> {
        self.delete_team_inner(team, false)
    }

    /// 强制删除 team，跳过活跃成员检查（管理清理用）
    pub fn force_delete_team(&self, team: &str) -> Result<()> {
        self.delete_team_inner(team, true)
    }

    fn delete_team_inner(&self, team: &str, force: bool) -> Result<()> {
        let config_path = self.storage.team_config_path(team)?;
        if !self.storage.team_dir(team)?.is_dir() {
            return Err(TeamError::TeamNotFound(team.to_string()));
        }
        let lock = self.storage.lock(&self.storage.team_lock_path(team)?)?;

        let config: Option<TeamConfig> = read_json_opt(&config_path);
        match config {
            Some(config) => {
                let live = config.live_member_count();
                if live > 0 && !force {
                    return Err(TeamError::ActiveMembers {
                        team: team.to_string(),
                        count: live,
                    });
                }
                if live > 0 {
                    warn!(team = %team, live, "Force deleting team with live members");
                }
            }
            None if force && config_path.exists() => {
                warn!(team = %team, "Force deleting team with unreadable config");
            }
            None => return Err(TeamError::TeamNotFound(team.to_string())),
        }

        // 先删配置：之后拿到任务锁或 inbox 锁的写入方都会得到 TeamNotFound
        fs::remove_file(&config_path)?;
        self.drain_documents(team)?;

        for dir in [
            self.storage.tasks_dir(team)?,
            self.storage.mailboxes_dir(team)?,
            self.storage.team_dir(team)?,
        ] {
            // 只剩锁文件；等锁的进程可能刚重建了目录
            if let Err(e) = remove_dir_if_exists(&dir) {
                warn!(team = %team, dir = %dir.display(), error = %e, "Leftover team directory not removed");
            }
        }
        lock.release()?;

        info!(team = %team, force, "Team deleted");
        Ok(())
    }

    /// 在各自的锁下删除任务列表和所有 inbox 文档，等待进行中的写入结束
    fn drain_documents(&self, team: &str) -> Result<()> {
        let task_lock = self.storage.lock(&self.storage.task_lock_path(team)?)?;
        remove_file_if_exists(&self.storage.task_list_path(team)?)?;
        task_lock.release()?;

        let entries = match fs::read_dir(self.storage.mailboxes_dir(team)?) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(agent_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_agent_id(&agent_id).is_err() {
                continue;
            }
            let inbox_lock = self.storage.lock(&self.storage.mailbox_lock_path(team, &agent_id)?)?;
            remove_file_if_exists(&self.storage.mailbox_path(team, &agent_id)?)?;
            inbox_lock.release()?;
        }
        Ok(())
    }
}
