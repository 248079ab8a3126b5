//! MCP Server - stdio 上的 JSON-RPC 循环

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::tools::{call_tool, error_code, tool_definitions};
use super::types::{McpRequest, McpResponse, INTERNAL_ERROR, INVALID_PARAMS, PARSE_ERROR};
use crate::team::TeamBridge;

/// MCP Server
pub struct McpServer {
    bridge: Arc<TeamBridge>,
}

impl McpServer {
    pub fn new(bridge: TeamBridge) -> Self {
        Self {
            bridge: Arc::new(bridge),
        }
    }

    /// 运行 MCP Server (stdio 模式)，读到 EOF 时退出
    pub async fn run(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        info!(root = %self.bridge.storage().root().display(), "MCP server started (stdio)");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<McpRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    warn!(error = %e, "Failed to parse request");
                    Some(McpResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e)))
                }
            };

            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        info!("MCP server stopped (stdin closed)");
        Ok(())
    }

    /// 处理 MCP 请求；通知（无 id）不返回响应
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => McpResponse::success(id, self.handle_initialize()),
            "tools/list" => McpResponse::success(id, json!({ "tools": tool_definitions() })),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "ping" => McpResponse::success(id, json!({})),
            method => McpResponse::method_not_found(id, method),
        };
        Some(response)
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    /// 处理 tools/call；文件锁会阻塞，放到 blocking 线程池执行
    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let params = params.unwrap_or_else(|| json!({}));
        let name = match params["name"].as_str() {
            Some(name) => name.to_string(),
            None => return McpResponse::error(id, INVALID_PARAMS, "Missing tool name".to_string()),
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let bridge = Arc::clone(&self.bridge);
        let tool = name.clone();
        let result = tokio::task::spawn_blocking(move || call_tool(&bridge, &tool, &arguments)).await;

        match result {
            Ok(Ok(value)) => McpResponse::success(id, value),
            Ok(Err(e)) => {
                debug!(tool = %name, error = %e, "Tool call failed");
                McpResponse::error(id, error_code(&e), e.to_string())
            }
            Err(e) => {
                error!(tool = %name, error = %e, "Tool call panicked");
                McpResponse::error(id, INTERNAL_ERROR, format!("Tool '{}' aborted: {}", name, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{METHOD_NOT_FOUND, STATE_ERROR};
    use crate::storage::Storage;
    use tempfile::tempdir;

    fn create_test_server() -> (McpServer, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let server = McpServer::new(TeamBridge::new(Storage::new(temp.path())));
        (server, temp)
    }

    fn request(id: i64, method: &str, params: Value) -> McpRequest {
        McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn call(id: i64, tool: &str, arguments: Value) -> McpRequest {
        request(id, "tools/call", json!({ "name": tool, "arguments": arguments }))
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (server, _temp) = create_test_server();

        let response = server.handle_request(request(1, "initialize", json!({}))).await.unwrap();
        assert_eq!(response.result.unwrap()["serverInfo"]["name"], "teamwork");

        let response = server.handle_request(request(2, "tools/list", json!({}))).await.unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert!(tools.iter().any(|t| t["name"] == "task_claim"));
        assert!(tools.iter().any(|t| t["name"] == "team_status"));
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let (server, _temp) = create_test_server();
        let notification = McpRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        assert!(server.handle_request(notification).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (server, _temp) = create_test_server();
        let response = server.handle_request(request(1, "agent/start", json!({}))).await.unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let (server, _temp) = create_test_server();

        let response = server
            .handle_request(call(1, "team_create", json!({ "name": "mcp-team", "lead_agent_id": "lead" })))
            .await
            .unwrap();
        assert!(response.error.is_none());

        let response = server
            .handle_request(call(
                2,
                "inbox_send",
                json!({ "team": "mcp-team", "from": "lead", "to": "lead", "content": "note to self" }),
            ))
            .await
            .unwrap();
        assert!(response.error.is_none());

        let response = server
            .handle_request(call(3, "team_status", json!({ "name": "mcp-team" })))
            .await
            .unwrap();
        let text = response.result.unwrap()["content"][0]["text"].as_str().unwrap().to_string();
        let status: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(status["lead_agent_id"], "lead");
        assert_eq!(status["unread_messages"], 1);
    }

    #[tokio::test]
    async fn test_tool_error_codes() {
        let (server, _temp) = create_test_server();

        let response = server
            .handle_request(call(1, "task_claim", json!({ "team": "ghost-team", "task_id": "1", "agent_id": "a" })))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, STATE_ERROR);

        let response = server
            .handle_request(request(2, "tools/call", json!({ "arguments": {} })))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }
}
