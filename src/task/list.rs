//! Task List - team 共享任务队列
//!
//! 每个 team 一个 `tasks/{team}/tasks.json`。每个修改操作都先获取 team 级排他锁，
//! 在锁内完成 读 → 检查 → 写，因此并发认领同一任务时只有一个调用者得到 `true`。
//! 查询操作不加锁，仅供参考；认领的正确性始终以 `claim_task` 为准。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::graph::find_cycle;
use super::model::{completed_ids, Task, TaskCounts, TaskListFile, TaskStatus};
use crate::error::{Result, TeamError};
use crate::storage::{read_json_opt, read_json_strict, validate_agent_id, write_json_atomic, Storage};
use crate::team::TeamRegistry;

/// 完成任务的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub task: Task,
    /// 因本次完成而变为可认领的任务 id
    pub unblocked: Vec<String>,
}

/// Task List
#[derive(Debug, Clone)]
pub struct TaskList {
    storage: Storage,
    registry: TeamRegistry,
}

impl TaskList {
    pub fn new(storage: Storage) -> Self {
        Self {
            registry: TeamRegistry::new(storage.clone()),
            storage,
        }
    }

    /// 在任务锁保护下执行读-改-写；文档未变化时不落盘
    fn with_locked_tasks<F, T>(&self, team: &str, operation: F) -> Result<T>
    where
        F: FnOnce(&mut TaskListFile) -> Result<T>,
    {
        let path = self.storage.task_list_path(team)?;
        if !self.registry.team_exists(team) {
            return Err(TeamError::TeamNotFound(team.to_string()));
        }

        let lock = self.storage.lock(&self.storage.task_lock_path(team)?)?;
        // 等锁期间 team 可能已被删除
        if !self.registry.team_exists(team) {
            lock.release()?;
            return Err(TeamError::TeamNotFound(team.to_string()));
        }

        let mut file: TaskListFile = read_json_strict(&path)?.unwrap_or_default();
        let before = file.clone();

        let result = operation(&mut file)?;

        if file != before {
            write_json_atomic(&path, &file)?;
        }
        lock.release()?;
        Ok(result)
    }

    /// 读取已存在 team 的任务列表
    fn read_team_tasks(&self, team: &str) -> Result<Vec<Task>> {
        self.registry.require_team(team)?;
        self.read_tasks(team)
    }

    /// 读取任务列表（不加锁）；损坏的文档降级为空列表
    fn read_tasks(&self, team: &str) -> Result<Vec<Task>> {
        let path = self.storage.task_list_path(team)?;
        Ok(read_json_opt::<TaskListFile>(&path)
            .map(|file| file.tasks)
            .unwrap_or_default())
    }

    /// 创建 pending 任务，返回新 id
    ///
    /// 依赖可以引用尚未创建的任务，但闭合依赖环会被拒绝。
    pub fn create_task(&self, team: &str, description: &str, dependencies: &[String]) -> Result<String> {
        let dependencies: BTreeSet<String> = dependencies.iter().cloned().collect();

        let id = self.with_locked_tasks(team, |file| {
            let id = file.allocate_id();

            if let Some(path) = find_cycle(&file.tasks, &id, &dependencies) {
                return Err(TeamError::DependencyCycle { path });
            }

            let unknown: Vec<&str> = dependencies
                .iter()
                .filter(|dep| file.find(dep).is_none())
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                warn!(team = %team, task_id = %id, unknown = ?unknown, "Task depends on ids that do not exist yet");
            }

            file.tasks.push(Task::new(id.clone(), description, dependencies));
            Ok(id)
        })?;

        info!(team = %team, task_id = %id, "Task created");
        Ok(id)
    }

    /// 原子认领任务
    ///
    /// - 任务不存在 → `TaskNotFound`
    /// - 状态不是 pending → `Ok(false)`，不做修改（并发认领者之间的协商结果）
    /// - 有未完成依赖 → `UnresolvedDependency`
    /// - 否则置为 in_progress 并记录认领者 → `Ok(true)`
    pub fn claim_task(&self, team: &str, task_id: &str, agent_id: &str) -> Result<bool> {
        validate_agent_id(agent_id)?;
        if !self.registry.require_team(team)?.is_participant(agent_id) {
            return Err(TeamError::NotAMember {
                team: team.to_string(),
                agent_id: agent_id.to_string(),
            });
        }

        let claimed = self.with_locked_tasks(team, |file| {
            let completed = completed_ids(&file.tasks);
            let task = file.find(task_id).ok_or_else(|| TeamError::TaskNotFound {
                team: team.to_string(),
                task_id: task_id.to_string(),
            })?;

            if task.status != TaskStatus::Pending {
                debug!(team = %team, task_id = %task_id, status = %task.status, "Task not claimable");
                return Ok(false);
            }

            let pending = task.unresolved_dependencies(&completed);
            if !pending.is_empty() {
                return Err(TeamError::UnresolvedDependency {
                    task_id: task_id.to_string(),
                    pending,
                });
            }

            let Some(task) = file.find_mut(task_id) else {
                return Ok(false);
            };
            task.status = TaskStatus::InProgress;
            task.assignee = Some(agent_id.to_string());
            task.claimed_at = Some(Utc::now());
            Ok(true)
        })?;

        if claimed {
            info!(team = %team, task_id = %task_id, agent_id = %agent_id, "Task claimed");
        }
        Ok(claimed)
    }

    /// 完成任务
    ///
    /// 已完成的任务再次完成是幂等的（保留原结果）；pending / cancelled 的任务不能直接完成。
    /// 完成后（锁外，只读）找出因此解除阻塞的任务，仅用于日志和返回值，不主动通知。
    pub fn complete_task(&self, team: &str, task_id: &str, result: Option<&str>) -> Result<Completion> {
        let task = self.with_locked_tasks(team, |file| {
            let task = file.find_mut(task_id).ok_or_else(|| TeamError::TaskNotFound {
                team: team.to_string(),
                task_id: task_id.to_string(),
            })?;

            match task.status {
                TaskStatus::InProgress => {
                    task.status = TaskStatus::Completed;
                    task.completed_at = Some(Utc::now());
                    task.result = result.map(str::to_string);
                }
                TaskStatus::Completed => {
                    info!(team = %team, task_id = %task_id, "Task already completed, keeping original result");
                }
                from => {
                    return Err(TeamError::InvalidTransition {
                        task_id: task_id.to_string(),
                        from,
                        to: TaskStatus::Completed,
                    });
                }
            }
            Ok(task.clone())
        })?;

        let tasks = self.read_tasks(team)?;
        let completed = completed_ids(&tasks);
        let unblocked: Vec<String> = tasks
            .iter()
            .filter(|t| t.dependencies.contains(task_id) && t.is_claimable(&completed))
            .map(|t| t.id.clone())
            .collect();

        info!(team = %team, task_id = %task_id, unblocked = ?unblocked, "Task completed");
        Ok(Completion { task, unblocked })
    }

    /// 取消任务（无依赖副作用，依赖它的任务将无法认领）
    pub fn cancel_task(&self, team: &str, task_id: &str) -> Result<Task> {
        let task = self.with_locked_tasks(team, |file| {
            let task = file.find_mut(task_id).ok_or_else(|| TeamError::TaskNotFound {
                team: team.to_string(),
                task_id: task_id.to_string(),
            })?;

            match task.status {
                TaskStatus::Pending | TaskStatus::InProgress => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    task.assignee = None;
                }
                TaskStatus::Cancelled => {}
                TaskStatus::Completed => {
                    return Err(TeamError::InvalidTransition {
                        task_id: task_id.to_string(),
                        from: TaskStatus::Completed,
                        to: TaskStatus::Cancelled,
                    });
                }
            }
            Ok(task.clone())
        })?;

        let stranded: Vec<String> = self
            .read_tasks(team)?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending && t.dependencies.contains(task_id))
            .map(|t| t.id)
            .collect();
        if !stranded.is_empty() {
            warn!(team = %team, task_id = %task_id, stranded = ?stranded, "Cancelled task leaves dependents unclaimable");
        }

        info!(team = %team, task_id = %task_id, "Task cancelled");
        Ok(task)
    }

    /// 列出任务，可按状态过滤
    pub fn get_tasks(&self, team: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let tasks = self.read_team_tasks(team)?;
        Ok(match status {
            Some(status) => tasks.into_iter().filter(|t| t.status == status).collect(),
            None => tasks,
        })
    }

    pub fn get_task(&self, team: &str, task_id: &str) -> Result<Option<Task>> {
        Ok(self.read_team_tasks(team)?.into_iter().find(|t| t.id == task_id))
    }

    /// pending 且依赖全部完成的任务
    pub fn get_claimable_tasks(&self, team: &str) -> Result<Vec<Task>> {
        let tasks = self.read_team_tasks(team)?;
        let completed = completed_ids(&tasks);
        let claimable: Vec<Task> = tasks
            .iter()
            .filter(|t| t.is_claimable(&completed))
            .cloned()
            .collect();
        Ok(claimable)
    }

    pub fn task_counts(&self, team: &str) -> Result<TaskCounts> {
        Ok(TaskCounts::from_tasks(&self.read_team_tasks(team)?))
    }
}
