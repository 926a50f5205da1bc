use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::lock::LockedSemesterError;
use crate::model::Subject;
use crate::store::StoreError;
use rusqlite::Connection;
use serde_json::json;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Trimmed, non-empty string param.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Single-letter code (sex, series): first character, upper-cased.
pub fn letter_code(s: &str) -> String {
    s.trim()
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default()
}

/// Semester number: a positive integer, given as a number or numeric string.
pub fn semester_param(req: &Request, default: Option<i64>) -> Result<i64, serde_json::Value> {
    let raw = req.params.get("semester");
    let parsed = match raw {
        None => default,
        Some(v) if v.is_null() => default,
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok())),
    };
    match parsed {
        Some(n) if n >= 1 => Ok(n),
        _ => Err(err(
            &req.id,
            "bad_params",
            "semester must be a positive integer",
            raw.map(|v| json!({ "semester": v })),
        )),
    }
}

/// Optional score field: null or "" is absent; numbers and numeric strings
/// are accepted.
pub fn parse_optional_score(v: Option<&serde_json::Value>) -> Result<Option<f64>, String> {
    let Some(v) = v else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let parsed = if let Some(n) = v.as_f64() {
        Some(n)
    } else if let Some(s) = v.as_str() {
        let t = s.trim();
        if t.is_empty() {
            return Ok(None);
        }
        t.parse::<f64>().ok()
    } else {
        None
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(format!("invalid score: {}", v)),
    }
}

/// Owned subjects are only open to their teacher.
pub fn ensure_owner(req: &Request, subject: &Subject, actor: &str) -> Result<(), serde_json::Value> {
    match subject.teacher.as_deref() {
        Some(owner) if owner != actor => Err(err(
            &req.id,
            "forbidden",
            "subject belongs to another teacher",
            Some(json!({ "subjectId": subject.id })),
        )),
        _ => Ok(()),
    }
}

pub fn locked_details(e: &LockedSemesterError) -> serde_json::Value {
    json!({
        "semester": e.semester,
        "validatedBy": e.validated_by,
        "validatedAt": e.validated_at,
    })
}

pub fn store_err(req: &Request, e: StoreError) -> serde_json::Value {
    let details = match &e {
        StoreError::Locked(l) => Some(locked_details(l)),
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}
