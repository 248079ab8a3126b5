//! End-to-end tests: team 生命周期、任务流转、消息与 MCP 工具

use serde_json::{json, Value};
use teamwork::mcp::{McpRequest, McpServer};
use teamwork::{
    MemberStatus, MessageType, Storage, TaskStatus, TeamBridge, TeamError, TeamMember,
};
use tempfile::tempdir;

fn create_test_bridge() -> (TeamBridge, tempfile::TempDir) {
    let temp = tempdir().unwrap();
    let bridge = TeamBridge::new(Storage::new(temp.path()));
    (bridge, temp)
}

fn ids(tasks: &[teamwork::Task]) -> Vec<String> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

#[test]
fn test_alpha_team_scenario() {
    let (bridge, _temp) = create_test_bridge();
    let registry = bridge.registry();
    let tasks = bridge.tasks();

    // 1. 创建 team，添加成员 A 和 B
    registry.create_team("alpha-team", "lead").unwrap();
    registry
        .add_teammate("alpha-team", TeamMember::new("A", "A", "general-purpose"))
        .unwrap();
    registry
        .add_teammate("alpha-team", TeamMember::new("B", "B", "general-purpose"))
        .unwrap();

    // 2. T1 无依赖，T2 依赖 T1
    let t1 = tasks.create_task("alpha-team", "T1", &[]).unwrap();
    let t2 = tasks.create_task("alpha-team", "T2", &[t1.clone()]).unwrap();

    assert_eq!(ids(&tasks.get_claimable_tasks("alpha-team").unwrap()), vec![t1.clone()]);

    // 3. A 认领成功，B 认领失败
    assert!(tasks.claim_task("alpha-team", &t1, "A").unwrap());
    assert!(!tasks.claim_task("alpha-team", &t1, "B").unwrap());

    // 4. A 完成 T1，T2 变为可认领
    let completion = tasks.complete_task("alpha-team", &t1, Some("done")).unwrap();
    assert_eq!(completion.unblocked, vec![t2.clone()]);
    assert_eq!(ids(&tasks.get_claimable_tasks("alpha-team").unwrap()), vec![t2]);

    let task = tasks.get_task("alpha-team", &t1).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.assignee.as_deref(), Some("A"));
    assert_eq!(task.result.as_deref(), Some("done"));
}

#[test]
fn test_team_teardown_flow() {
    let (bridge, temp) = create_test_bridge();
    let registry = bridge.registry();
    let mailbox = bridge.mailbox();

    registry.create_team("demo-team-1", "lead-1").unwrap();
    assert!(matches!(
        registry.create_team("demo-team-1", "lead-2"),
        Err(TeamError::AlreadyExists(_))
    ));

    for id in ["w1", "w2"] {
        registry
            .add_teammate("demo-team-1", TeamMember::new(id, id, "coder"))
            .unwrap();
    }
    bridge.tasks().create_task("demo-team-1", "work", &[]).unwrap();

    // lead 请求每个 worker 关闭，worker 轮询后回复并把自己标记为 shutdown
    for id in ["w1", "w2"] {
        mailbox.request_shutdown("demo-team-1", "lead-1", id, None).unwrap();
    }
    assert!(matches!(
        registry.delete_team("demo-team-1"),
        Err(TeamError::ActiveMembers { count: 2, .. })
    ));

    for id in ["w1", "w2"] {
        let request = mailbox
            .get_pending_shutdown_request("demo-team-1", id)
            .unwrap()
            .expect("shutdown request");
        mailbox
            .respond_shutdown("demo-team-1", id, "lead-1", &request.id, true, None)
            .unwrap();
        registry
            .update_teammate_status("demo-team-1", id, MemberStatus::Shutdown)
            .unwrap();
        assert!(mailbox
            .get_pending_shutdown_request("demo-team-1", id)
            .unwrap()
            .is_none());
    }

    let responses = mailbox.get_messages("demo-team-1", "lead-1", true).unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses
        .iter()
        .all(|m| m.message_type == MessageType::ShutdownResponse));

    registry.delete_team("demo-team-1").unwrap();
    assert!(registry.list_teams().is_empty());
    assert!(!temp.path().join("tasks").join("demo-team-1").exists());
    assert!(!temp.path().join("mailboxes").join("demo-team-1").exists());
}

#[test]
fn test_messaging_rules() {
    let (bridge, temp) = create_test_bridge();
    let registry = bridge.registry();
    let mailbox = bridge.mailbox();

    registry.create_team("msg-team", "lead").unwrap();
    for id in ["a", "b", "c"] {
        registry
            .add_teammate("msg-team", TeamMember::new(id, id, "coder"))
            .unwrap();
    }

    // 非成员
    assert!(matches!(
        mailbox.send_message("msg-team", "lead", "outsider", "hi", MessageType::Message, None),
        Err(TeamError::NotAMember { .. })
    ));
    assert!(!temp.path().join("mailboxes").join("msg-team").join("outsider").exists());

    // 广播计数
    assert_eq!(mailbox.broadcast("msg-team", "a", "from a", None).unwrap().len(), 2);
    assert_eq!(mailbox.broadcast("msg-team", "lead", "from lead", None).unwrap().len(), 3);

    // mark_read 只减少一条，重复为 no-op
    let unread = mailbox.get_messages("msg-team", "b", true).unwrap();
    assert_eq!(unread.len(), 2);
    mailbox.mark_read("msg-team", "b", &unread[0].id).unwrap();
    assert_eq!(mailbox.get_unread_count("msg-team", "b").unwrap(), 1);
    mailbox.mark_read("msg-team", "b", &unread[0].id).unwrap();
    assert_eq!(mailbox.get_unread_count("msg-team", "b").unwrap(), 1);

    let status = bridge.get_team_status("msg-team").unwrap();
    assert_eq!(status.unread_messages, 1 + 2 + 1);
}

#[test]
fn test_invalid_names_touch_nothing() {
    let (bridge, temp) = create_test_bridge();

    for bad in ["ab", "has space", "../escape", "under_score"] {
        assert!(matches!(
            bridge.registry().create_team(bad, "lead"),
            Err(TeamError::InvalidName(_))
        ));
        assert!(matches!(
            bridge.tasks().create_task(bad, "x", &[]),
            Err(TeamError::InvalidName(_))
        ));
    }
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> Value {
    let request = McpRequest {
        jsonrpc: "2.0".to_string(),
        id: Some(json!(1)),
        method: "tools/call".to_string(),
        params: Some(json!({ "name": name, "arguments": arguments })),
    };
    let response = server.handle_request(request).await.unwrap();
    if let Some(error) = response.error {
        panic!("MCP error: {} (code: {})", error.message, error.code);
    }
    let text = response.result.unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_e2e_mcp_flow() {
    let temp = tempdir().unwrap();
    let server = McpServer::new(TeamBridge::new(Storage::new(temp.path())));

    call_tool(&server, "team_create", json!({ "name": "mcp-team", "lead_agent_id": "lead" })).await;
    call_tool(
        &server,
        "team_add_member",
        json!({ "team": "mcp-team", "name": "dev", "agent_id": "dev@mcp-team" }),
    )
    .await;

    let first = call_tool(&server, "task_create", json!({ "team": "mcp-team", "description": "build" })).await;
    let first_id = first["task_id"].as_str().unwrap().to_string();
    call_tool(
        &server,
        "task_create",
        json!({ "team": "mcp-team", "description": "test", "dependencies": [first_id] }),
    )
    .await;

    let claimable = call_tool(&server, "task_claimable", json!({ "team": "mcp-team" })).await;
    assert_eq!(claimable.as_array().unwrap().len(), 1);

    let claimed = call_tool(
        &server,
        "task_claim",
        json!({ "team": "mcp-team", "task_id": first_id, "agent_id": "dev@mcp-team" }),
    )
    .await;
    assert_eq!(claimed["claimed"], true);

    let completion = call_tool(
        &server,
        "task_complete",
        json!({ "team": "mcp-team", "task_id": first_id, "result": "ok" }),
    )
    .await;
    assert_eq!(completion["unblocked"], json!(["2"]));

    call_tool(
        &server,
        "inbox_send",
        json!({ "team": "mcp-team", "from": "dev@mcp-team", "to": "lead", "content": "build done" }),
    )
    .await;
    let inbox = call_tool(&server, "inbox_read", json!({ "team": "mcp-team", "agent_id": "lead" })).await;
    assert_eq!(inbox[0]["content"], "build done");
    assert_eq!(inbox[0]["type"], "message");

    let status = call_tool(&server, "team_status", json!({ "name": "mcp-team" })).await;
    assert_eq!(status["tasks"]["completed"], 1);
    assert_eq!(status["tasks"]["pending"], 1);
    assert_eq!(status["unread_messages"], 1);
}
