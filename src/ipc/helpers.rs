use rusqlite::Connection;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::config::EngineConfig;
use crate::db::{self, SqliteStore};
use crate::gateway::LocalDocumentGateway;
use crate::grade::GradingTable;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::{LifecycleController, LifecycleOptions};
use crate::model::{EnrollmentNo, ListFilter, MarksheetKey};

pub const GRADING_TABLE_KEY: &str = "grading.table";

pub type Engine<'a> = LifecycleController<SqliteStore<'a>, LocalDocumentGateway>;

pub struct Workspace<'a> {
    pub path: &'a Path,
    pub conn: &'a Connection,
    pub config: &'a EngineConfig,
}

pub fn workspace<'a>(state: &'a AppState, req: &Request) -> Result<Workspace<'a>, serde_json::Value> {
    match (state.workspace.as_deref(), state.db.as_ref()) {
        (Some(path), Some(conn)) => Ok(Workspace {
            path,
            conn,
            config: &state.config,
        }),
        _ => Err(err(&req.id, "no_workspace", "select a workspace first", None)),
    }
}

/// The grading table in force: the one saved in the workspace if any,
/// otherwise the configured one.
pub fn grading_table(conn: &Connection, config: &EngineConfig) -> anyhow::Result<GradingTable> {
    if let Some(v) = db::settings_get_json(conn, GRADING_TABLE_KEY)? {
        let table: GradingTable = serde_json::from_value(v)?;
        table.validate()?;
        return Ok(table);
    }
    Ok(config.grading.table()?)
}

/// Builds a controller over the selected workspace. Cheap; done per request.
pub fn engine<'a>(state: &'a AppState, req: &Request) -> Result<Engine<'a>, serde_json::Value> {
    let ws = workspace(state, req)?;
    let grading = grading_table(ws.conn, ws.config)
        .map_err(|e| err(&req.id, "config_invalid", format!("{e:#}"), None))?;
    Ok(LifecycleController::new(
        SqliteStore::new(ws.conn),
        LocalDocumentGateway::new(ws.config.documents_dir(ws.path)),
        grading,
        LifecycleOptions {
            reverify_on_edit: ws.config.lifecycle.reverify_on_edit,
        },
    ))
}

pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, serde_json::Value> {
    serde_json::from_value(req.params.clone())
        .map_err(|e| err(&req.id, "bad_params", e.to_string(), None))
}

pub fn str_param<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn enrollment_no_param(req: &Request) -> Result<EnrollmentNo, serde_json::Value> {
    let raw = str_param(req, "enrollmentNo")?;
    EnrollmentNo::parse(raw).map_err(|e| err(&req.id, "bad_params", e.to_string(), None))
}

/// Marksheets are addressed by `id`, or by `enrollmentNo` plus `year`.
pub fn marksheet_key(req: &Request) -> Result<MarksheetKey, serde_json::Value> {
    if let Some(id) = req.params.get("id").and_then(|v| v.as_str()) {
        return Ok(MarksheetKey::Id(id.to_string()));
    }
    if req.params.get("enrollmentNo").is_none() {
        return Err(err(
            &req.id,
            "bad_params",
            "missing id (or enrollmentNo and year)",
            None,
        ));
    }
    let enrollment_no = enrollment_no_param(req)?;
    let year = str_param(req, "year")?.trim().to_string();
    Ok(MarksheetKey::Natural {
        enrollment_no,
        year,
    })
}

pub fn list_filter(req: &Request, config: &EngineConfig) -> Result<ListFilter, serde_json::Value> {
    let page = match req.params.get("page") {
        None => 1,
        Some(v) if v.is_null() => 1,
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 && n <= u64::from(u32::MAX) => n as u32,
            _ => return Err(err(&req.id, "bad_params", "page must be a positive integer", None)),
        },
    };
    let page_size = match req.params.get("pageSize") {
        None => config.listing.page_size,
        Some(v) if v.is_null() => config.listing.page_size,
        Some(v) => match v.as_u64() {
            Some(n) if (1..=500).contains(&n) => n as u32,
            _ => return Err(err(&req.id, "bad_params", "pageSize must be in 1..=500", None)),
        },
    };
    let center_search = req
        .params
        .get("search")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(ListFilter {
        center_search,
        page,
        page_size,
    })
}
