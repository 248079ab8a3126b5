//! Task 模块 - team 共享任务队列与依赖管理

mod graph;
pub mod list;
pub mod model;

pub use list::{Completion, TaskList};
pub use model::{Task, TaskCounts, TaskStatus};
