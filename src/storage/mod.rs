//! Storage 模块 - 目录布局、标识符校验、文档读写与文件锁
//!
//! 所有状态都存放在一个显式的根目录下：
//!
//! ```text
//! <root>/teams/<team>/config.json
//! <root>/tasks/<team>/tasks.json
//! <root>/tasks/<team>/.lock
//! <root>/mailboxes/<team>/<agentId>/messages.json
//! ```
//!
//! 每个生成路径的函数都会重新校验输入，调用方无法绕过校验。

pub mod document;
pub mod lock;

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Result, TeamError};

pub use document::{read_json_opt, read_json_strict, write_json_atomic};
pub use lock::{FileLock, LockOptions, LockStrategy};

const TEAMS_DIR: &str = "teams";
const TASKS_DIR: &str = "tasks";
const MAILBOXES_DIR: &str = "mailboxes";
const CONFIG_FILE: &str = "config.json";
const TASKS_FILE: &str = "tasks.json";
const MESSAGES_FILE: &str = "messages.json";
const LOCK_FILE: &str = ".lock";

fn team_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{3,64}$").unwrap())
}

fn agent_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_@-][A-Za-z0-9_.@-]{0,127}$").unwrap())
}

/// 校验 team 名称（`^[A-Za-z0-9-]{3,64}$`）
pub fn validate_name(name: &str) -> Result<()> {
    if team_name_regex().is_match(name) {
        Ok(())
    } else {
        Err(TeamError::InvalidName(name.to_string()))
    }
}

/// 校验 agent id，它会成为 mailbox 的目录名
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    if agent_id_regex().is_match(agent_id) {
        Ok(())
    } else {
        Err(TeamError::InvalidAgentId(agent_id.to_string()))
    }
}

/// 幂等地创建目录
pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// 删除目录（不存在时视为成功）
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 删除文件（不存在时视为成功）
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 存储上下文：根目录 + 锁参数
///
/// 显式传递给每个 store，测试可以各自使用独立的临时根目录并行运行。
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    lock_options: LockOptions,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_options: LockOptions::default(),
        }
    }

    pub fn with_lock_options(root: impl Into<PathBuf>, lock_options: LockOptions) -> Self {
        Self {
            root: root.into(),
            lock_options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_options(&self) -> &LockOptions {
        &self.lock_options
    }

    /// `<root>/teams`
    pub fn teams_dir(&self) -> PathBuf {
        self.root.join(TEAMS_DIR)
    }

    pub fn team_dir(&self, team: &str) -> Result<PathBuf> {
        validate_name(team)?;
        Ok(self.teams_dir().join(team))
    }

    pub fn team_config_path(&self, team: &str) -> Result<PathBuf> {
        Ok(self.team_dir(team)?.join(CONFIG_FILE))
    }

    pub fn team_lock_path(&self, team: &str) -> Result<PathBuf> {
        Ok(self.team_dir(team)?.join(LOCK_FILE))
    }

    pub fn tasks_dir(&self, team: &str) -> Result<PathBuf> {
        validate_name(team)?;
        Ok(self.root.join(TASKS_DIR).join(team))
    }

    pub fn task_list_path(&self, team: &str) -> Result<PathBuf> {
        Ok(self.tasks_dir(team)?.join(TASKS_FILE))
    }

    pub fn task_lock_path(&self, team: &str) -> Result<PathBuf> {
        Ok(self.tasks_dir(team)?.join(LOCK_FILE))
    }

    /// `<root>/mailboxes/<team>`，包含该 team 所有成员的 inbox
    pub fn mailboxes_dir(&self, team: &str) -> Result<PathBuf> {
        validate_name(team)?;
        Ok(self.root.join(MAILBOXES_DIR).join(team))
    }

    pub fn mailbox_dir(&self, team: &str, agent_id: &str) -> Result<PathBuf> {
        validate_agent_id(agent_id)?;
        Ok(self.mailboxes_dir(team)?.join(agent_id))
    }

    pub fn mailbox_path(&self, team: &str, agent_id: &str) -> Result<PathBuf> {
        Ok(self.mailbox_dir(team, agent_id)?.join(MESSAGES_FILE))
    }

    pub fn mailbox_lock_path(&self, team: &str, agent_id: &str) -> Result<PathBuf> {
        Ok(self.mailbox_dir(team, agent_id)?.join(LOCK_FILE))
    }

    /// 在指定锁文件上获取排他锁
    pub fn lock(&self, lock_path: &Path) -> Result<FileLock> {
        FileLock::acquire(lock_path, &self.lock_options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_name_accepts_grammar() {
        assert!(validate_name("abc").is_ok());
        assert!(validate_name("demo-team-1").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_name_rejects() {
        for bad in ["", "ab", "has space", "under_score", "../etc", "team/x", "tëam"] {
            assert!(
                matches!(validate_name(bad), Err(TeamError::InvalidName(_))),
                "expected rejection for {:?}",
                bad
            );
        }
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_agent_id() {
        assert!(validate_agent_id("A").is_ok());
        assert!(validate_agent_id("developer@alpha-team").is_ok());
        assert!(validate_agent_id("worker_1.v2").is_ok());
        assert!(validate_agent_id("").is_err());
        assert!(validate_agent_id(".").is_err());
        assert!(validate_agent_id("..").is_err());
        assert!(validate_agent_id("a/b").is_err());
        assert!(validate_agent_id("*").is_err());
    }

    #[test]
    fn test_paths_follow_layout() {
        let storage = Storage::new("/data");
        assert_eq!(
            storage.team_config_path("alpha-team").unwrap(),
            PathBuf::from("/data/teams/alpha-team/config.json")
        );
        assert_eq!(
            storage.task_list_path("alpha-team").unwrap(),
            PathBuf::from("/data/tasks/alpha-team/tasks.json")
        );
        assert_eq!(
            storage.task_lock_path("alpha-team").unwrap(),
            PathBuf::from("/data/tasks/alpha-team/.lock")
        );
        assert_eq!(
            storage.mailbox_path("alpha-team", "dev-1").unwrap(),
            PathBuf::from("/data/mailboxes/alpha-team/dev-1/messages.json")
        );
    }

    #[test]
    fn test_paths_revalidate_inputs() {
        let storage = Storage::new("/data");
        assert!(storage.task_list_path("..").is_err());
        assert!(storage.mailbox_path("alpha-team", "../x").is_err());
        assert!(storage.mailbox_dir("no", "dev-1").is_err());
    }

    #[test]
    fn test_ensure_directory_idempotent() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("a").join("b");
        ensure_directory(&dir).unwrap();
        ensure_directory(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_remove_dir_if_exists_missing() {
        let temp = tempdir().unwrap();
        assert!(remove_dir_if_exists(&temp.path().join("missing")).is_ok());
    }
}
