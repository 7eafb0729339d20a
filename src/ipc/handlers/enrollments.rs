use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{engine, enrollment_no_param, list_filter, parse_params};
use crate::ipc::types::{AppState, Request};
use crate::model::EnrollmentInput;
use serde_json::json;

fn handle_enrollments_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let input: EnrollmentInput = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.register_enrollment(input) {
        Ok(enrollment) => ok(&req.id, json!({ "enrollment": enrollment })),
        Err(e) => engine_err(&req.id, e),
    }
}

/// Enrollment details plus the course subjects, as shown before marks entry.
fn handle_enrollments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let no = match enrollment_no_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.lookup_enrollment(&no) {
        Ok(lookup) => ok(&req.id, json!(lookup)),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let filter = match list_filter(req, &state.config) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match engine.list_enrollments(&filter) {
        Ok(page) => ok(&req.id, json!(page)),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_enrollments_set_activated(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let no = match enrollment_no_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(activated) = req.params.get("activated").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "activated must be boolean", None);
    };
    match engine.set_activated(&no, activated) {
        Ok(change) => ok(&req.id, json!(change)),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.register" => Some(handle_enrollments_register(state, req)),
        "enrollments.get" => Some(handle_enrollments_get(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.setActivated" => Some(handle_enrollments_set_activated(state, req)),
        _ => None,
    }
}
