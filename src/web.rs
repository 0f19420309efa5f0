//! Admin router, mounted only when `--web-port` is given: health, pass
//! status, sanitized config, and a search endpoint mirroring the tool.

use crate::{server::BridgeServer, service, tasks::PassProgress};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone)]
pub struct AppState {
    pub server: BridgeServer,
}

#[derive(Serialize)]
struct HealthResp {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct SearchReq {
    project_root_path: String,
    query: String,
}

#[derive(Debug, Serialize)]
struct SearchResp {
    status: String,
    result: String,
}

#[derive(Serialize)]
struct StatusResp {
    status: &'static str,
    passes: HashMap<String, PassProgress>,
}

#[derive(Serialize)]
struct ConfigResp {
    batch_size: usize,
    max_lines_per_blob: usize,
    max_concurrent_uploads: usize,
    max_retries: usize,
    retry_base_delay: f64,
    base_url: String,
    token: &'static str,
    text_extensions: Vec<String>,
    exclude_patterns: Vec<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/healthz",
            get(|| async {
                Json(HealthResp {
                    status: "ok",
                    version: env!("CARGO_PKG_VERSION"),
                })
            }),
        )
        .route(
            "/api/status",
            get(|State(app): State<AppState>| async move {
                Json(StatusResp {
                    status: "success",
                    passes: app.server.tasks().snapshot(),
                })
            }),
        )
        .route(
            "/api/config",
            get(|State(app): State<AppState>| async move {
                let s = app.server.get_cfg().settings;
                Json(ConfigResp {
                    batch_size: s.batch_size,
                    max_lines_per_blob: s.max_lines_per_blob,
                    max_concurrent_uploads: s.max_concurrent_uploads,
                    max_retries: s.max_retries,
                    retry_base_delay: s.retry_base_delay,
                    base_url: s.base_url,
                    token: "***",
                    text_extensions: s.text_extensions,
                    exclude_patterns: s.exclude_patterns,
                })
            }),
        )
        .route(
            "/api/search",
            post(|State(app): State<AppState>, Json(req): Json<SearchReq>| async move {
                let cfg = app.server.get_cfg();
                let client = app.server.client();
                let tasks = app.server.tasks();
                tracing::info!(path = %req.project_root_path, "/api/search invoked");
                match service::search_context(
                    &cfg,
                    &client,
                    &tasks,
                    &req.project_root_path,
                    &req.query,
                )
                .await
                {
                    Ok(result) => Json(SearchResp {
                        status: "success".into(),
                        result,
                    }),
                    Err(e) => Json(SearchResp {
                        status: "error".into(),
                        result: format!("Error: {}", e),
                    }),
                }
            }),
        )
        .with_state(app_state)
}
