use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{engine, parse_params, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::Course;
use serde_json::json;

fn handle_courses_define(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let course: Course = match parse_params(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match engine.define_course(course) {
        Ok(course) => ok(&req.id, json!({ "course": course })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let engine = match engine(state, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let code = match str_param(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.course(code) {
        Ok(course) => ok(
            &req.id,
            json!({ "course": course, "totalFull": course.total_full() }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.define" => Some(handle_courses_define(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        _ => None,
    }
}
