use crate::config::EngineConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Configuration is resolved before the database is touched so that a bad
    // config file leaves the previous workspace selected.
    let config = match EngineConfig::load(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!(workspace = %path.display(), error = %e, "workspace config rejected");
            return err(&req.id, "config_invalid", e.to_string(), None);
        }
    };

    match db::open_db(&path) {
        Ok(conn) => {
            info!(
                workspace = %path.display(),
                grading = ?config.grading.policy,
                "workspace selected"
            );
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.config = config;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
