//! Team 模块 - team 名册与统一入口
//!
//! ## 子模块
//!
//! - `registry` - Team 配置和成员管理
//! - `bridge` - 绑定 registry / task list / mailbox 的统一入口
//!
//! ## 数据存储
//!
//! Team 配置存储在 `<root>/teams/{team-name}/config.json`。

pub mod bridge;
pub mod registry;

pub use bridge::{TeamBridge, TeamMemberStatus, TeamStatus};
pub use registry::{MemberStatus, TeamConfig, TeamMember, TeamRegistry};
