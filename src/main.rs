//! Teamwork CLI
//!
//! 多 agent team 的共享任务队列与 mailbox 协调工具

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use teamwork::{
    CoordConfig, McpServer, MemberStatus, MessageType, TaskStatus, TeamBridge, TeamMember,
};

#[derive(Parser)]
#[command(name = "teamwork")]
#[command(about = "Teamwork - 多 agent team 的任务队列与消息协调")]
#[command(version)]
struct Cli {
    /// 数据根目录（覆盖配置文件和 TEAMWORK_ROOT）
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 创建 Team
    TeamCreate {
        /// Team 名称
        name: String,
        /// Lead 的 Agent ID
        lead: String,
        /// Team 描述
        #[arg(long, short)]
        description: Option<String>,
    },
    /// 删除 Team（仍有活跃成员时失败）
    TeamDelete {
        /// Team 名称
        name: String,
        /// 跳过活跃成员检查
        #[arg(long)]
        force: bool,
    },
    /// 列出所有 Team
    Teams {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查看 Team 配置和成员
    TeamShow {
        /// Team 名称
        name: String,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查看 Team 状态（成员、未读消息、任务统计）
    TeamStatus {
        /// Team 名称
        name: String,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 添加 Team 成员
    MemberAdd {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
        /// 成员名称（默认与 Agent ID 相同）
        #[arg(long, short)]
        name: Option<String>,
        /// worker 类别
        #[arg(long, short, default_value = "general-purpose")]
        category: String,
        /// 外部会话 ID
        #[arg(long)]
        session: Option<String>,
    },
    /// 移除 Team 成员
    MemberRemove {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
    },
    /// 更新成员状态 (active / idle / shutting_down / shutdown)
    MemberStatus {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
        /// 新状态
        status: String,
    },
    /// 创建任务
    TaskCreate {
        /// Team 名称
        team: String,
        /// 任务描述
        description: String,
        /// 依赖的任务 ID（可重复）
        #[arg(long = "dep")]
        deps: Vec<String>,
    },
    /// 认领任务
    TaskClaim {
        /// Team 名称
        team: String,
        /// 任务 ID
        task_id: String,
        /// 认领者 Agent ID
        agent_id: String,
    },
    /// 完成任务
    TaskComplete {
        /// Team 名称
        team: String,
        /// 任务 ID
        task_id: String,
        /// 任务结果
        #[arg(long, short)]
        result: Option<String>,
    },
    /// 取消任务
    TaskCancel {
        /// Team 名称
        team: String,
        /// 任务 ID
        task_id: String,
    },
    /// 列出任务
    Tasks {
        /// Team 名称
        team: String,
        /// 按状态过滤 (pending / in_progress / completed / cancelled)
        #[arg(long, short)]
        status: Option<String>,
        /// 只列出可认领的任务
        #[arg(long)]
        claimable: bool,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 发送消息
    InboxSend {
        /// Team 名称
        team: String,
        /// 发送方 Agent ID
        #[arg(long)]
        from: String,
        /// 接收方 Agent ID
        #[arg(long)]
        to: String,
        /// 消息内容
        message: String,
        /// 消息类型
        #[arg(long = "type", default_value = "message")]
        message_type: String,
    },
    /// 广播消息给所有成员（不含发送方）
    Broadcast {
        /// Team 名称
        team: String,
        /// 发送方 Agent ID
        #[arg(long)]
        from: String,
        /// 消息内容
        message: String,
    },
    /// 读取 inbox
    Inbox {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
        /// 只显示未读消息
        #[arg(long, short)]
        unread: bool,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 标记消息已读（不指定消息 ID 时全部标记）
    InboxMarkRead {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
        /// 消息 ID
        message_id: Option<String>,
    },
    /// 清空 inbox
    InboxClear {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
    },
    /// 请求 agent 关闭
    ShutdownRequest {
        /// Team 名称
        team: String,
        /// 发送方 Agent ID
        #[arg(long)]
        from: String,
        /// 接收方 Agent ID
        #[arg(long)]
        to: String,
        /// 原因
        #[arg(long)]
        reason: Option<String>,
    },
    /// 回复 shutdown 请求
    ShutdownRespond {
        /// Team 名称
        team: String,
        /// 回复方 Agent ID
        #[arg(long)]
        from: String,
        /// 请求方 Agent ID
        #[arg(long)]
        to: String,
        /// 请求 ID
        request_id: String,
        /// 拒绝关闭
        #[arg(long)]
        reject: bool,
        /// 原因
        #[arg(long)]
        reason: Option<String>,
    },
    /// 查看最早的未读 shutdown 请求
    ShutdownPending {
        /// Team 名称
        team: String,
        /// Agent ID
        agent_id: String,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 显示生效的配置
    Config,
    /// 启动 MCP Server 模式 (stdio)
    Serve,
}

#[tokio::main]
async fn main() {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug teamwork serve
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("teamwork=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    let mut config = CoordConfig::auto_load();
    if let Some(root) = cli.root {
        config = config.with_root(root);
    }
    debug!(root = %config.root.display(), strategy = %config.lock.strategy, "Configuration loaded");

    if let Err(e) = run(cli.command, config).await {
        eprintln!("错误: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: CoordConfig) -> Result<()> {
    let bridge = TeamBridge::from_config(&config);
    let registry = bridge.registry();
    let tasks = bridge.tasks();
    let mailbox = bridge.mailbox();

    match command {
        Commands::TeamCreate { name, lead, description } => {
            let team = registry
                .create_team_with_description(&name, &lead, description.as_deref())
                .context("创建 Team 失败")?;
            println!("已创建 Team: {}", team.name);
            println!("  Lead: {}", team.lead_agent_id);
            if let Some(desc) = &team.description {
                println!("  描述: {}", desc);
            }
        }
        Commands::TeamDelete { name, force } => {
            let deleted = if force {
                registry.force_delete_team(&name)
            } else {
                registry.delete_team(&name)
            };
            deleted.context("删除 Team 失败")?;
            println!("已删除 Team: {}", name);
        }
        Commands::Teams { json } => {
            let teams = registry.list_teams();
            if json {
                println!("{}", serde_json::to_string_pretty(&teams)?);
            } else if teams.is_empty() {
                println!("未发现任何 Team");
            } else {
                println!("发现 {} 个 Team:\n", teams.len());
                for team in teams {
                    println!("  {}", team);
                }
            }
        }
        Commands::TeamShow { name, json } => {
            let team = registry.require_team(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&team)?);
            } else {
                println!("Team: {}", team.name);
                if let Some(desc) = &team.description {
                    println!("  描述: {}", desc);
                }
                println!("  Lead: {}", team.lead_agent_id);
                println!("  创建时间: {}", team.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  成员 ({}):", team.members.len());
                for member in &team.members {
                    println!(
                        "    - {} | ID: {} | 类别: {} | 状态: {}",
                        member.name, member.agent_id, member.category, member.status
                    );
                }
            }
        }
        Commands::TeamStatus { name, json } => {
            let status = bridge.get_team_status(&name).context("获取 Team 状态失败")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Team: {}", status.team_name);
                if let Some(desc) = &status.description {
                    println!("  描述: {}", desc);
                }
                println!("  Lead: {} [未读: {}]", status.lead_agent_id, status.lead_unread_count);
                println!("  成员: {} 人", status.members.len());
                for member in &status.members {
                    println!(
                        "    - {} ({}) [{}] [未读: {}]",
                        member.name, member.agent_id, member.status, member.unread_count
                    );
                }
                println!(
                    "  任务: {} 待处理, {} 进行中, {} 已完成, {} 已取消",
                    status.tasks.pending,
                    status.tasks.in_progress,
                    status.tasks.completed,
                    status.tasks.cancelled
                );
                println!("  未读消息: {}", status.unread_messages);
            }
        }
        Commands::MemberAdd { team, agent_id, name, category, session } => {
            let name = name.unwrap_or_else(|| agent_id.clone());
            let mut member = TeamMember::new(&name, &agent_id, &category);
            if let Some(session) = session.as_deref() {
                member = member.with_session(session);
            }
            registry.add_teammate(&team, member).context("添加成员失败")?;
            println!("已添加成员 {} ({}) 到 Team {}", name, agent_id, team);
        }
        Commands::MemberRemove { team, agent_id } => {
            let member = registry.remove_teammate(&team, &agent_id).context("移除成员失败")?;
            println!("已移除成员 {} ({})", member.name, member.agent_id);
        }
        Commands::MemberStatus { team, agent_id, status } => {
            let status: MemberStatus = status.parse()?;
            registry
                .update_teammate_status(&team, &agent_id, status)
                .context("更新成员状态失败")?;
            println!("成员 {} 状态已更新为 {}", agent_id, status);
        }
        Commands::TaskCreate { team, description, deps } => {
            let id = tasks.create_task(&team, &description, &deps).context("创建任务失败")?;
            println!("已创建任务 #{}", id);
        }
        Commands::TaskClaim { team, task_id, agent_id } => {
            if tasks.claim_task(&team, &task_id, &agent_id).context("认领任务失败")? {
                println!("{} 已认领任务 #{}", agent_id, task_id);
            } else {
                println!("任务 #{} 已被认领或不再是 pending", task_id);
            }
        }
        Commands::TaskComplete { team, task_id, result } => {
            let completion = tasks
                .complete_task(&team, &task_id, result.as_deref())
                .context("完成任务失败")?;
            println!("任务 #{} 已完成", completion.task.id);
            if !completion.unblocked.is_empty() {
                println!("  可认领: #{}", completion.unblocked.join(", #"));
            }
        }
        Commands::TaskCancel { team, task_id } => {
            tasks.cancel_task(&team, &task_id).context("取消任务失败")?;
            println!("任务 #{} 已取消", task_id);
        }
        Commands::Tasks { team, status, claimable, json } => {
            let list = if claimable {
                tasks.get_claimable_tasks(&team)?
            } else {
                let status: Option<TaskStatus> = status.as_deref().map(str::parse::<TaskStatus>).transpose()?;
                tasks.get_tasks(&team, status)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("Team '{}' 没有任务", team);
            } else {
                println!("Team '{}' 的任务 ({}):\n", team, list.len());
                for task in list {
                    let owner_str = task.assignee.as_deref().unwrap_or("-");
                    let deps_str = if task.dependencies.is_empty() {
                        String::new()
                    } else {
                        let deps: Vec<&str> = task.dependencies.iter().map(String::as_str).collect();
                        format!(" [depends on: {}]", deps.join(", "))
                    };
                    println!(
                        "  #{} [{}] {} (owner: {}){}",
                        task.id, task.status, task.description, owner_str, deps_str
                    );
                }
            }
        }
        Commands::InboxSend { team, from, to, message, message_type } => {
            let message_type: MessageType = message_type.parse()?;
            let id = mailbox
                .send_message(&team, &from, &to, &message, message_type, None)
                .context("发送消息失败")?;
            println!("已发送消息给 {}: {}", to, id);
        }
        Commands::Broadcast { team, from, message } => {
            let ids = mailbox.broadcast(&team, &from, &message, None).context("广播失败")?;
            println!("已广播给 {} 个成员", ids.len());
        }
        Commands::Inbox { team, agent_id, unread, json } => {
            let messages = mailbox.get_messages(&team, &agent_id, unread).context("读取 inbox 失败")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else if messages.is_empty() {
                println!("{} 没有{}消息", agent_id, if unread { "未读" } else { "" });
            } else {
                println!("{} 的消息 ({}):\n", agent_id, messages.len());
                for msg in messages {
                    let read_mark = if msg.read { "✓" } else { "●" };
                    println!(
                        "{} [{}] <{}> {}: {}",
                        read_mark,
                        msg.timestamp.format("%H:%M"),
                        msg.message_type,
                        msg.from,
                        msg.content
                    );
                    println!("    id: {}", msg.id);
                }
            }
        }
        Commands::InboxMarkRead { team, agent_id, message_id } => match message_id {
            Some(message_id) => {
                if mailbox.mark_read(&team, &agent_id, &message_id)? {
                    println!("已标记消息 {} 为已读", message_id);
                } else {
                    println!("消息 {} 已经是已读", message_id);
                }
            }
            None => {
                let marked = mailbox.mark_all_read(&team, &agent_id)?;
                println!("已标记 {} 条消息为已读", marked);
            }
        },
        Commands::InboxClear { team, agent_id } => {
            let cleared = mailbox.clear_mailbox(&team, &agent_id).context("清空 inbox 失败")?;
            println!("已清空 {} 条消息", cleared);
        }
        Commands::ShutdownRequest { team, from, to, reason } => {
            let id = mailbox.request_shutdown(&team, &from, &to, reason.as_deref())?;
            println!("已向 {} 发送 shutdown 请求: {}", to, id);
        }
        Commands::ShutdownRespond { team, from, to, request_id, reject, reason } => {
            mailbox.respond_shutdown(&team, &from, &to, &request_id, !reject, reason.as_deref())?;
            println!("已{} shutdown 请求 {}", if reject { "拒绝" } else { "批准" }, request_id);
        }
        Commands::ShutdownPending { team, agent_id, json } => {
            let pending = mailbox.get_pending_shutdown_request(&team, &agent_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else {
                match pending {
                    Some(msg) => println!("{} 请求关闭 ({}): {}", msg.from, msg.id, msg.content),
                    None => println!("没有待处理的 shutdown 请求"),
                }
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Serve => {
            let server = McpServer::new(bridge.clone());
            server.run().await?;
        }
    }

    Ok(())
}
