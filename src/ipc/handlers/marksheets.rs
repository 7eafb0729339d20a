use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{
    engine, enrollment_no_param, list_filter, marksheet_key, parse_params, str_param,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{DocType, MarksheetInput};
use serde_json::json;

fn handle_marksheets_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let no = match enrollment_no_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let input: MarksheetInput = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.submit(&no, &input) {
        Ok(marksheet) => ok(&req.id, json!({ "marksheet": marksheet })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_marksheets_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let key = match marksheet_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match engine.marksheet(&key) {
        Ok(marksheet) => ok(&req.id, json!({ "marksheet": marksheet })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_marksheets_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let filter = match list_filter(req, &state.config) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match engine.list_marksheets(&filter) {
        Ok(page) => ok(&req.id, json!(page)),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_marksheets_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let key = match marksheet_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match engine.status(&key) {
        Ok(status) => ok(&req.id, json!(status)),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_marksheets_verify(state: &mut AppState, req: &Request, verified: bool) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let key = match marksheet_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let result = if verified {
        engine.verify(&key)
    } else {
        engine.unverify(&key)
    };
    match result {
        Ok(marksheet) => ok(&req.id, json!({ "marksheet": marksheet })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_marksheets_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let key = match marksheet_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let input: MarksheetInput = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.edit(&key, &input) {
        Ok(marksheet) => ok(&req.id, json!({ "marksheet": marksheet })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_marksheets_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let key = match marksheet_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let doc_type = match str_param(req, "docType").map(DocType::parse) {
        Ok(Ok(t)) => t,
        Ok(Err(e)) => return err(&req.id, "bad_params", e.to_string(), None),
        Err(resp) => return resp,
    };
    match engine.generate(&key, doc_type) {
        Ok(document) => ok(&req.id, json!({ "document": document })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marksheets.submit" => Some(handle_marksheets_submit(state, req)),
        "marksheets.get" => Some(handle_marksheets_get(state, req)),
        "marksheets.list" => Some(handle_marksheets_list(state, req)),
        "marksheets.status" => Some(handle_marksheets_status(state, req)),
        "marksheets.verify" => Some(handle_marksheets_verify(state, req, true)),
        "marksheets.unverify" => Some(handle_marksheets_verify(state, req, false)),
        "marksheets.edit" => Some(handle_marksheets_edit(state, req)),
        "marksheets.generate" => Some(handle_marksheets_generate(state, req)),
        _ => None,
    }
}
