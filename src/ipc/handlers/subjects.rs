use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, letter_code, optional_str, parse_optional_score, required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    let series = optional_str(req, "series").map(|s| letter_code(&s));
    let teacher = optional_str(req, "teacher");
    match SqliteStore::new(conn).list_subjects(series.as_deref(), teacher.as_deref()) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => store_err(req, e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let series = match required_str(req, "series") {
        Ok(v) => letter_code(&v),
        Err(e) => return e,
    };
    let coefficient = match parse_optional_score(req.params.get("coefficient")) {
        Ok(Some(v)) if v >= 0.0 => v,
        Ok(None) => 1.0,
        Ok(Some(v)) => {
            return err(
                &req.id,
                "bad_params",
                "coefficient must be >= 0",
                Some(json!({ "coefficient": v })),
            )
        }
        Err(message) => return err(&req.id, "bad_params", message, None),
    };
    let teacher = optional_str(req, "teacher");

    match SqliteStore::new(conn).create_subject(&name, &series, coefficient, teacher.as_deref()) {
        Ok(subject_id) => ok(
            &req.id,
            json!({ "subjectId": subject_id, "name": name, "coefficient": coefficient }),
        ),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        _ => None,
    }
}
