//! MCP server implementation for the echo fixture

use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    ErrorData as McpError,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The echo fixture server
#[derive(Clone)]
pub struct EchoMcpServer {
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Parameter Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EchoParams {
    #[schemars(description = "Text to echo back")]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SleepParams {
    #[schemars(description = "How long to sleep, in milliseconds")]
    pub millis: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FailParams {
    #[schemars(description = "Error message to report back")]
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// Tool Router Implementation
// ============================================================================

#[tool_router]
impl EchoMcpServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Echo a message back to the caller")]
    async fn echo(
        &self,
        Parameters(params): Parameters<EchoParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(params.message)]))
    }

    #[tool(description = "Sleep for the given number of milliseconds, then confirm")]
    async fn sleep(
        &self,
        Parameters(params): Parameters<SleepParams>,
    ) -> Result<CallToolResult, McpError> {
        tokio::time::sleep(Duration::from_millis(params.millis)).await;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "slept {}ms",
            params.millis
        ))]))
    }

    #[tool(description = "Report a tool failure with the given message")]
    async fn fail(
        &self,
        Parameters(params): Parameters<FailParams>,
    ) -> Result<CallToolResult, McpError> {
        let message = params
            .message
            .unwrap_or_else(|| "requested failure".to_string());
        Ok(CallToolResult::error(vec![Content::text(message)]))
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for EchoMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Fixture tool server: echo a message, sleep for a duration, \
                 or fail on demand."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

impl Default for EchoMcpServer {
    fn default() -> Self {
        Self::new()
    }
}
