use crate::db;
use crate::grade::{grade_or_sentinel, GradingPolicy, GradingTable};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{grading_table, workspace, GRADING_TABLE_KEY};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_grading_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let source = match db::settings_get_json(ws.conn, GRADING_TABLE_KEY) {
        Ok(Some(_)) => "workspace",
        Ok(None) => "config",
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match grading_table(ws.conn, ws.config) {
        Ok(table) => ok(
            &req.id,
            json!({
                "table": table,
                "source": source,
            }),
        ),
        Err(e) => err(&req.id, "config_invalid", format!("{e:#}"), None),
    }
}

/// Accepts exactly one of `table`, `policy` or `reset: true`.
fn handle_grading_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    if req.params.get("reset").and_then(|v| v.as_bool()) == Some(true) {
        if let Err(e) = db::settings_delete(ws.conn, GRADING_TABLE_KEY) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        info!("grading table reset to configuration");
        return match grading_table(ws.conn, ws.config) {
            Ok(table) => ok(&req.id, json!({ "table": table, "source": "config" })),
            Err(e) => err(&req.id, "config_invalid", format!("{e:#}"), None),
        };
    }

    let table = if let Some(raw) = req.params.get("table") {
        match serde_json::from_value::<GradingTable>(raw.clone()) {
            Ok(t) => t,
            Err(e) => return err(&req.id, "bad_params", format!("table: {e}"), None),
        }
    } else if let Some(raw) = req.params.get("policy") {
        match serde_json::from_value::<GradingPolicy>(raw.clone()) {
            Ok(p) => p.table(),
            Err(e) => return err(&req.id, "bad_params", format!("policy: {e}"), None),
        }
    } else {
        return err(&req.id, "bad_params", "expected table, policy or reset", None);
    };

    if let Err(e) = table.validate() {
        return err(&req.id, "bad_params", e.to_string(), None);
    }
    let value = match serde_json::to_value(&table) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Err(e) = db::settings_set_json(ws.conn, GRADING_TABLE_KEY, &value) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(bands = table.bands.len(), floor = %table.floor, "grading table saved");
    ok(&req.id, json!({ "table": table, "source": "workspace" }))
}

fn mark_param(req: &Request, key: &str) -> Result<u32, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_u64()) {
        Some(n) if n <= u64::from(u32::MAX) => Ok(n as u32),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be a non-negative integer"),
            None,
        )),
    }
}

fn handle_grading_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let obtained = match mark_param(req, "totalObtained") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let full = match mark_param(req, "totalFull") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if obtained > full {
        return err(
            &req.id,
            "bad_params",
            "totalObtained must not exceed totalFull",
            None,
        );
    }
    match grading_table(ws.conn, ws.config) {
        Ok(table) => ok(&req.id, json!(grade_or_sentinel(&table, obtained, full))),
        Err(e) => err(&req.id, "config_invalid", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.get" => Some(handle_grading_get(state, req)),
        "grading.update" => Some(handle_grading_update(state, req)),
        "grading.preview" => Some(handle_grading_preview(state, req)),
        _ => None,
    }
}
