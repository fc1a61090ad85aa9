pub mod tools;

use std::sync::Arc;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};

use crate::dispatch::{ToolOutput, Toolbox};
use crate::error::ToolError;
use crate::AppState;

use tools::ToolCallParams;

/// Convert a [`ToolError`] into an MCP error carrying the machine code.
fn tool_error(e: ToolError) -> ErrorData {
    let data = Some(serde_json::json!({ "code": e.code() }));
    match e {
        ToolError::Document(_) => ErrorData::internal_error(e.to_string(), data),
        _ => ErrorData::invalid_params(e.to_string(), data),
    }
}

fn to_call_result(output: &ToolOutput) -> Result<CallToolResult, ErrorData> {
    let text = serde_json::to_string_pretty(output)
        .map_err(|e| ErrorData::internal_error(format!("failed to encode result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

// ── MCP server ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DocopsMcpServer {
    state: AppState,
    toolbox: Arc<Toolbox>,
    tool_router: ToolRouter<DocopsMcpServer>,
}

impl DocopsMcpServer {
    pub fn new(state: AppState, toolbox: Arc<Toolbox>) -> Self {
        Self {
            state,
            toolbox,
            tool_router: Self::tool_router(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run one toolbox call on the blocking pool. Document loads and saves
    /// are synchronous file I/O.
    pub async fn dispatch(
        &self,
        tool: &'static str,
        params: ToolCallParams,
    ) -> Result<ToolOutput, ToolError> {
        let (operation, params) = params.into_parts();
        let state = self.state.clone();
        let toolbox = Arc::clone(&self.toolbox);
        let result = tokio::task::spawn_blocking(move || {
            toolbox.call(tool, &operation, &state, &params)
        })
        .await;
        match result {
            Ok(result) => result,
            Err(e) => Err(ToolError::InvalidOperationState(format!(
                "{tool} task failed: {e}"
            ))),
        }
    }

    async fn call(
        &self,
        tool: &'static str,
        params: ToolCallParams,
    ) -> Result<CallToolResult, ErrorData> {
        match self.dispatch(tool, params).await {
            Ok(output) => to_call_result(&output),
            Err(e) => {
                tracing::debug!(tool, code = e.code(), error = %e, "tool call failed");
                Err(tool_error(e))
            }
        }
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocopsMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "docops".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Spreadsheet and email document editing over a uniform operation interface."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Each tool takes an 'operation' plus named parameters. Edit a file directly with \
                 'path' (add 'output_path' to keep the original), or call session/open once and \
                 pass the returned 'session_id' to every later call; session edits stay in \
                 memory until session/save. session_id always takes precedence over path. \
                 Close sessions with session/close when done."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl DocopsMcpServer {
    /// Session lifecycle.
    #[tool(description = "Manage in-memory document sessions. Operations: 'open' (path: .json workbook or .eml message) returns a session_id; 'new' (kind: workbook | mail) creates a blank document; 'info' and 'close' (session_id); 'list'; 'save' (session_id, output_path optional, defaults to the opened file).")]
    async fn session(
        &self,
        Parameters(params): Parameters<ToolCallParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.call("session", params).await
    }

    /// Workbook editing.
    #[tool(description = "Read and edit .json workbooks. Operations: 'list_sheets'; 'add_sheet' (name, index?); 'remove_sheet' (sheet); 'rename_sheet' (sheet, new_name); 'set_value' (cell, value, sheet?, type?: auto | text | number | boolean); 'get_value' (cell, sheet?); 'get_range' (range like A1:C3, sheet?); 'clear_range' (range, sheet?); 'append_row' (values: list, sheet?). Use path or session_id.")]
    async fn spreadsheet(
        &self,
        Parameters(params): Parameters<ToolCallParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.call("spreadsheet", params).await
    }

    /// Message editing.
    #[tool(description = "Read and edit .eml messages. Operations: 'get_headers'; 'get_header' (name); 'set_header' (name, value); 'remove_header' (name); 'add_recipient' (field: to | cc | bcc, address); 'get_body'; 'set_body' (body); 'summary'. Use path or session_id.")]
    async fn email(
        &self,
        Parameters(params): Parameters<ToolCallParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.call("email", params).await
    }
}
