//! MCP 工具 - 每个协调操作对应一个工具
//!
//! 工具结果统一包装为 `{"content": [{"type": "text", "text": ...}]}`，
//! 其中 text 是结果的 JSON 文本。

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::types::{McpTool, INTERNAL_ERROR, INVALID_PARAMS, LOCK_TIMEOUT, METHOD_NOT_FOUND, STATE_ERROR};
use crate::error::{ErrorKind, TeamError};
use crate::mailbox::MessageType;
use crate::task::TaskStatus;
use crate::team::{MemberStatus, TeamBridge, TeamMember};

/// 参数错误（区别于协调层自身的错误）
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParam(&'static str),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// 把工具调用错误映射为 JSON-RPC 错误码
pub fn error_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<ToolError>() {
        return match err {
            ToolError::UnknownTool(_) => METHOD_NOT_FOUND,
            _ => INVALID_PARAMS,
        };
    }
    match err.downcast_ref::<TeamError>().map(TeamError::kind) {
        Some(ErrorKind::Validation) | Some(ErrorKind::Capacity) => INVALID_PARAMS,
        Some(ErrorKind::NotFound) | Some(ErrorKind::Conflict) | Some(ErrorKind::Precondition) => {
            STATE_ERROR
        }
        Some(ErrorKind::Concurrency) => LOCK_TIMEOUT,
        Some(ErrorKind::Internal) | None => INTERNAL_ERROR,
    }
}

fn required_str<'a>(args: &'a Value, name: &'static str) -> Result<&'a str> {
    Ok(args[name].as_str().ok_or(ToolError::MissingParam(name))?)
}

fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args[name].as_str()
}

fn parse_param<T>(args: &Value, name: &'static str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = TeamError>,
{
    match args[name].as_str() {
        Some(raw) => Ok(Some(raw.parse::<T>().map_err(|e| ToolError::InvalidParam {
            name,
            reason: e.to_string(),
        })?)),
        None => Ok(None),
    }
}

fn string_list(args: &Value, name: &'static str) -> Result<Vec<String>> {
    match &args[name] {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| -> Result<String> {
                match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(ToolError::InvalidParam {
                        name,
                        reason: format!("expected string, got {}", other),
                    }
                    .into()),
                }
            })
            .collect(),
        other => Err(ToolError::InvalidParam {
            name,
            reason: format!("expected array, got {}", other),
        }
        .into()),
    }
}

/// task id 既可以是字符串也可以是数字
fn task_id(args: &Value) -> Result<String> {
    match &args["task_id"] {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ToolError::MissingParam("task_id").into()),
    }
}

fn text_result<T: Serialize>(value: &T) -> Result<Value> {
    Ok(json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(value)?
        }]
    }))
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> McpTool {
    McpTool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required
        }),
    }
}

/// tools/list 返回的工具定义
pub fn tool_definitions() -> Vec<McpTool> {
    let team = json!({ "type": "string", "description": "Team 名称" });
    let agent_id = json!({ "type": "string", "description": "Agent ID" });
    let task_id = json!({ "type": ["string", "integer"], "description": "任务 ID" });

    vec![
        tool(
            "team_create",
            "创建 team（空成员列表）",
            json!({
                "name": team,
                "lead_agent_id": { "type": "string", "description": "Lead 的 Agent ID" },
                "description": { "type": "string", "description": "Team 描述" }
            }),
            &["name", "lead_agent_id"],
        ),
        tool(
            "team_delete",
            "删除 team 及其任务和 inbox；仍有活跃成员时需 force",
            json!({
                "name": team,
                "force": { "type": "boolean", "description": "跳过活跃成员检查" }
            }),
            &["name"],
        ),
        tool("team_list", "列出所有 team", json!({}), &[]),
        tool("team_show", "查看 team 配置和成员", json!({ "name": team }), &["name"]),
        tool(
            "team_status",
            "查看 team 状态：成员、未读消息、任务统计",
            json!({ "name": team }),
            &["name"],
        ),
        tool(
            "team_add_member",
            "注册 team 成员",
            json!({
                "team": team,
                "name": { "type": "string", "description": "成员名称" },
                "agent_id": agent_id,
                "category": { "type": "string", "description": "worker 类别" },
                "session_id": { "type": "string", "description": "外部会话 ID" }
            }),
            &["team", "name", "agent_id"],
        ),
        tool(
            "team_remove_member",
            "移除 team 成员",
            json!({ "team": team, "agent_id": agent_id }),
            &["team", "agent_id"],
        ),
        tool(
            "team_update_member_status",
            "更新成员状态",
            json!({
                "team": team,
                "agent_id": agent_id,
                "status": {
                    "type": "string",
                    "enum": ["active", "idle", "shutting_down", "shutdown"]
                }
            }),
            &["team", "agent_id", "status"],
        ),
        tool(
            "team_is_lead",
            "判断 agent 是否为 team lead",
            json!({ "team": team, "agent_id": agent_id }),
            &["team", "agent_id"],
        ),
        tool(
            "team_has_active_members",
            "是否还有 active / idle / shutting_down 的成员",
            json!({ "team": team }),
            &["team"],
        ),
        tool(
            "task_create",
            "创建 pending 任务",
            json!({
                "team": team,
                "description": { "type": "string", "description": "任务描述" },
                "dependencies": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "依赖的任务 ID"
                }
            }),
            &["team", "description"],
        ),
        tool(
            "task_claim",
            "原子认领任务；已被认领时返回 claimed=false",
            json!({ "team": team, "task_id": task_id, "agent_id": agent_id }),
            &["team", "task_id", "agent_id"],
        ),
        tool(
            "task_complete",
            "完成任务并返回解除阻塞的任务",
            json!({
                "team": team,
                "task_id": task_id,
                "result": { "type": "string", "description": "任务结果" }
            }),
            &["team", "task_id"],
        ),
        tool(
            "task_cancel",
            "取消任务",
            json!({ "team": team, "task_id": task_id }),
            &["team", "task_id"],
        ),
        tool(
            "task_list",
            "列出任务，可按状态过滤",
            json!({
                "team": team,
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed", "cancelled"]
                }
            }),
            &["team"],
        ),
        tool(
            "task_get",
            "查看单个任务",
            json!({ "team": team, "task_id": task_id }),
            &["team", "task_id"],
        ),
        tool(
            "task_claimable",
            "列出可认领的任务（pending 且依赖全部完成）",
            json!({ "team": team }),
            &["team"],
        ),
        tool(
            "inbox_send",
            "发送消息给 team 内的 agent",
            json!({
                "team": team,
                "from": agent_id,
                "to": agent_id,
                "content": { "type": "string", "description": "消息内容（≤10 KiB）" },
                "type": {
                    "type": "string",
                    "enum": ["message", "notification", "shutdown_request", "shutdown_response"]
                },
                "metadata": { "type": "object" }
            }),
            &["team", "from", "to", "content"],
        ),
        tool(
            "inbox_broadcast",
            "广播给所有成员（不含发送方）",
            json!({
                "team": team,
                "from": agent_id,
                "content": { "type": "string" },
                "metadata": { "type": "object" }
            }),
            &["team", "from", "content"],
        ),
        tool(
            "inbox_read",
            "读取 inbox",
            json!({
                "team": team,
                "agent_id": agent_id,
                "unread_only": { "type": "boolean" }
            }),
            &["team", "agent_id"],
        ),
        tool(
            "inbox_unread_count",
            "未读消息数",
            json!({ "team": team, "agent_id": agent_id }),
            &["team", "agent_id"],
        ),
        tool(
            "inbox_mark_read",
            "标记单条消息已读",
            json!({
                "team": team,
                "agent_id": agent_id,
                "message_id": { "type": "string" }
            }),
            &["team", "agent_id", "message_id"],
        ),
        tool(
            "inbox_mark_all_read",
            "全部标记已读",
            json!({ "team": team, "agent_id": agent_id }),
            &["team", "agent_id"],
        ),
        tool(
            "inbox_clear",
            "清空 inbox",
            json!({ "team": team, "agent_id": agent_id }),
            &["team", "agent_id"],
        ),
        tool(
            "shutdown_request",
            "请求 agent 关闭",
            json!({
                "team": team,
                "from": agent_id,
                "to": agent_id,
                "reason": { "type": "string" }
            }),
            &["team", "from", "to"],
        ),
        tool(
            "shutdown_respond",
            "回复 shutdown 请求",
            json!({
                "team": team,
                "from": agent_id,
                "to": agent_id,
                "request_id": { "type": "string" },
                "approved": { "type": "boolean" },
                "reason": { "type": "string" }
            }),
            &["team", "from", "to", "request_id", "approved"],
        ),
        tool(
            "shutdown_pending",
            "获取最早的未读 shutdown 请求",
            json!({ "team": team, "agent_id": agent_id }),
            &["team", "agent_id"],
        ),
    ]
}

/// 执行工具调用（同步，会获取文件锁）
pub fn call_tool(bridge: &TeamBridge, name: &str, args: &Value) -> Result<Value> {
    let registry = bridge.registry();
    let tasks = bridge.tasks();
    let mailbox = bridge.mailbox();

    match name {
        "team_create" => {
            let config = registry.create_team_with_description(
                required_str(args, "name")?,
                required_str(args, "lead_agent_id")?,
                optional_str(args, "description"),
            )?;
            text_result(&config)
        }
        "team_delete" => {
            let team = required_str(args, "name")?;
            if args["force"].as_bool().unwrap_or(false) {
                registry.force_delete_team(team)?;
            } else {
                registry.delete_team(team)?;
            }
            text_result(&json!({ "deleted": team }))
        }
        "team_list" => text_result(&registry.list_teams()),
        "team_show" => text_result(&registry.require_team(required_str(args, "name")?)?),
        "team_status" => text_result(&bridge.get_team_status(required_str(args, "name")?)?),
        "team_add_member" => {
            let team = required_str(args, "team")?;
            let mut member = TeamMember::new(
                required_str(args, "name")?,
                required_str(args, "agent_id")?,
                optional_str(args, "category").unwrap_or("general-purpose"),
            );
            if let Some(session_id) = optional_str(args, "session_id") {
                member = member.with_session(session_id);
            }
            registry.add_teammate(team, member.clone())?;
            text_result(&member)
        }
        "team_remove_member" => text_result(&registry.remove_teammate(
            required_str(args, "team")?,
            required_str(args, "agent_id")?,
        )?),
        "team_update_member_status" => {
            let team = required_str(args, "team")?;
            let agent_id = required_str(args, "agent_id")?;
            let status: MemberStatus =
                parse_param(args, "status")?.ok_or(ToolError::MissingParam("status"))?;
            registry.update_teammate_status(team, agent_id, status)?;
            text_result(&registry.get_member(team, agent_id)?)
        }
        "team_is_lead" => {
            let is_lead =
                registry.is_team_lead(required_str(args, "team")?, required_str(args, "agent_id")?)?;
            text_result(&json!({ "is_lead": is_lead }))
        }
        "team_has_active_members" => {
            let active = registry.has_active_members(required_str(args, "team")?)?;
            text_result(&json!({ "has_active_members": active }))
        }
        "task_create" => {
            let id = tasks.create_task(
                required_str(args, "team")?,
                required_str(args, "description")?,
                &string_list(args, "dependencies")?,
            )?;
            text_result(&json!({ "task_id": id }))
        }
        "task_claim" => {
            let id = task_id(args)?;
            let claimed =
                tasks.claim_task(required_str(args, "team")?, &id, required_str(args, "agent_id")?)?;
            text_result(&json!({ "task_id": id, "claimed": claimed }))
        }
        "task_complete" => text_result(&tasks.complete_task(
            required_str(args, "team")?,
            &task_id(args)?,
            optional_str(args, "result"),
        )?),
        "task_cancel" => text_result(&tasks.cancel_task(required_str(args, "team")?, &task_id(args)?)?),
        "task_list" => {
            let status: Option<TaskStatus> = parse_param(args, "status")?;
            text_result(&tasks.get_tasks(required_str(args, "team")?, status)?)
        }
        "task_get" => text_result(&tasks.get_task(required_str(args, "team")?, &task_id(args)?)?),
        "task_claimable" => text_result(&tasks.get_claimable_tasks(required_str(args, "team")?)?),
        "inbox_send" => {
            let message_type: MessageType = parse_param(args, "type")?.unwrap_or_default();
            let metadata = args.get("metadata").filter(|m| !m.is_null()).cloned();
            let id = mailbox.send_message(
                required_str(args, "team")?,
                required_str(args, "from")?,
                required_str(args, "to")?,
                required_str(args, "content")?,
                message_type,
                metadata,
            )?;
            text_result(&json!({ "message_id": id }))
        }
        "inbox_broadcast" => {
            let metadata = args.get("metadata").filter(|m| !m.is_null()).cloned();
            let ids = mailbox.broadcast(
                required_str(args, "team")?,
                required_str(args, "from")?,
                required_str(args, "content")?,
                metadata,
            )?;
            text_result(&json!({ "message_ids": ids, "count": ids.len() }))
        }
        "inbox_read" => text_result(&mailbox.get_messages(
            required_str(args, "team")?,
            required_str(args, "agent_id")?,
            args["unread_only"].as_bool().unwrap_or(false),
        )?),
        "inbox_unread_count" => {
            let count = mailbox
                .get_unread_count(required_str(args, "team")?, required_str(args, "agent_id")?)?;
            text_result(&json!({ "unread": count }))
        }
        "inbox_mark_read" => {
            let changed = mailbox.mark_read(
                required_str(args, "team")?,
                required_str(args, "agent_id")?,
                required_str(args, "message_id")?,
            )?;
            text_result(&json!({ "changed": changed }))
        }
        "inbox_mark_all_read" => {
            let marked = mailbox
                .mark_all_read(required_str(args, "team")?, required_str(args, "agent_id")?)?;
            text_result(&json!({ "marked": marked }))
        }
        "inbox_clear" => {
            let cleared = mailbox
                .clear_mailbox(required_str(args, "team")?, required_str(args, "agent_id")?)?;
            text_result(&json!({ "cleared": cleared }))
        }
        "shutdown_request" => {
            let id = mailbox.request_shutdown(
                required_str(args, "team")?,
                required_str(args, "from")?,
                required_str(args, "to")?,
                optional_str(args, "reason"),
            )?;
            text_result(&json!({ "request_id": id }))
        }
        "shutdown_respond" => {
            let approved = args["approved"]
                .as_bool()
                .ok_or(ToolError::MissingParam("approved"))?;
            let id = mailbox.respond_shutdown(
                required_str(args, "team")?,
                required_str(args, "from")?,
                required_str(args, "to")?,
                required_str(args, "request_id")?,
                approved,
                optional_str(args, "reason"),
            )?;
            text_result(&json!({ "message_id": id }))
        }
        "shutdown_pending" => text_result(&mailbox.get_pending_shutdown_request(
            required_str(args, "team")?,
            required_str(args, "agent_id")?,
        )?),
        _ => Err(ToolError::UnknownTool(name.to_string()).into()),
    }
}
