//! rmcp server exposing the `search_context` tool.
//!
//! The tool router is the closed dispatch surface: only the tools declared
//! here exist, and unknown tool names are rejected by rmcp itself.

use crate::{config::Config, tasks::TaskManager};
use parking_lot::Mutex;
use reqwest::Client;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars, tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SearchArgs {
    /// Absolute path to the project root (use forward slashes on Windows)
    pub project_root_path: String,
    /// Natural language query
    pub query: String,
}

#[derive(Clone)]
pub struct BridgeServer {
    cfg: Arc<Mutex<Config>>, // snapshot taken per call
    client: Client,
    tasks: TaskManager,
    tool_router: ToolRouter<BridgeServer>,
}

impl BridgeServer {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg: Arc::new(Mutex::new(cfg)),
            client: crate::backend::http_client(),
            tasks: TaskManager::new(),
            tool_router: Self::tool_router(),
        }
    }

    /// Immutable settings snapshot for one call.
    pub fn get_cfg(&self) -> Config {
        self.cfg.lock().clone()
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn tasks(&self) -> TaskManager {
        self.tasks.clone()
    }
}

#[tool_router]
impl BridgeServer {
    /// Incrementally index the project, then query the remote retrieval API
    /// with the project's accumulated blob identities.
    #[tool(
        description = "Search the project for code relevant to the query. Indexes new or changed files first, then performs semantic retrieval."
    )]
    pub async fn search_context(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let cfg = self.get_cfg();
        let text = match crate::service::search_context(
            &cfg,
            &self.client,
            &self.tasks,
            &args.project_root_path,
            &args.query,
        )
        .await
        {
            Ok(s) => s,
            Err(e) => format!("Error: {}", e),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "ctxmcp tool: search_context(project_root_path, query). Indexes the project incrementally, then returns relevant code context. Use forward slashes on Windows."
                    .to_string(),
            ),
        }
    }
}
