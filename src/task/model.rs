//! 任务数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use crate::error::TeamError;

/// 任务状态：pending → in_progress → completed / cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(TeamError::UnknownVariant {
                kind: "task status",
                value: s.to_string(),
            }),
        }
    }
}

/// 任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    /// 认领者；仅在 in_progress / completed 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Task {
    pub(crate) fn new(id: String, description: &str, dependencies: BTreeSet<String>) -> Self {
        Self {
            id,
            description: description.to_string(),
            status: TaskStatus::Pending,
            assignee: None,
            dependencies,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// 尚未完成的依赖（按 id 排序）
    pub fn unresolved_dependencies(&self, completed: &HashSet<&str>) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|dep| !completed.contains(dep.as_str()))
            .cloned()
            .collect()
    }

    /// pending 且所有依赖都已 completed
    pub fn is_claimable(&self, completed: &HashSet<&str>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|dep| completed.contains(dep.as_str()))
    }
}

/// `tasks/{team}/tasks.json` 的文档结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskListFile {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskListFile {
    /// 分配下一个顺序 id（跳过手工写入的冲突 id）
    pub fn allocate_id(&mut self) -> String {
        let mut next = self.next_id.max(1);
        while self.find(&next.to_string()).is_some() {
            next += 1;
        }
        self.next_id = next + 1;
        next.to_string()
    }

    pub fn find(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn find_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }
}

/// 已完成任务的 id 集合
pub(crate) fn completed_ids(tasks: &[Task]) -> HashSet<&str> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.as_str())
        .collect()
}

/// 各状态任务数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        tasks.iter().fold(Self::default(), |mut counts, task| {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.cancelled
    }
}
