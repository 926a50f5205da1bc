use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, semester_param, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{GradeStore, SqliteStore};
use serde_json::json;

fn handle_semesters_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "validatedSemesters": [] }));
    };
    match SqliteStore::new(conn).list_validations() {
        Ok(records) => ok(&req.id, json!({ "validatedSemesters": records })),
        Err(e) => store_err(req, e),
    }
}

fn handle_semesters_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let semester = match semester_param(req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match required_str(req, "actor") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match SqliteStore::new(conn).record_validation(semester, &actor) {
        Ok(outcome) => ok(
            &req.id,
            json!({ "status": outcome.status(), "validation": outcome.record() }),
        ),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.status" => Some(handle_semesters_status(state, req)),
        "semesters.validate" => Some(handle_semesters_validate(state, req)),
        _ => None,
    }
}
