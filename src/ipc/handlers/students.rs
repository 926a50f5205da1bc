use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, letter_code, optional_str, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{GradeStore, NewStudent, SqliteStore};
use serde_json::json;
use std::collections::HashMap;

const IMPORT_COLUMNS: [&str; 6] = ["matricule", "nom", "prenom", "sexe", "serie", "lv2"];

fn capitalize(s: &str) -> String {
    let lower = s.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn cell_text(v: Option<&serde_json::Value>) -> String {
    match v {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let store = SqliteStore::new(conn);
    let students = match optional_str(req, "series") {
        Some(series) => store.list_students_in_series(&letter_code(&series)),
        None => store.list_students(),
    };
    match students {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => store_err(req, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut fields: Vec<String> = Vec::with_capacity(5);
    for key in ["rollCode", "lastName", "firstName", "sex", "series"] {
        match required_str(req, key) {
            Ok(v) => fields.push(v),
            Err(e) => return e,
        }
    }
    let student = NewStudent {
        roll_code: fields[0].clone(),
        last_name: fields[1].clone(),
        first_name: fields[2].clone(),
        sex: letter_code(&fields[3]),
        series: letter_code(&fields[4]),
        lv2_choice: optional_str(req, "lv2").map(|v| capitalize(&v)),
    };

    match SqliteStore::new(conn).create_student(&student) {
        Ok(student_id) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => store_err(req, e),
    }
}

fn handle_students_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows[]", None);
    };

    let mut parsed: Vec<NewStudent> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            return err(
                &req.id,
                "bad_params",
                format!("row at index {} must be an object", i),
                None,
            );
        };
        // Column names are matched case-insensitively.
        let lowered: HashMap<String, &serde_json::Value> = obj
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        let missing: Vec<&str> = IMPORT_COLUMNS
            .iter()
            .copied()
            .filter(|c| !lowered.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return err(
                &req.id,
                "bad_params",
                format!("expected columns: {}", IMPORT_COLUMNS.join(", ")),
                Some(json!({ "row": i, "missing": missing })),
            );
        }

        let lv2 = cell_text(lowered.get("lv2").copied());
        parsed.push(NewStudent {
            roll_code: cell_text(lowered.get("matricule").copied()),
            last_name: cell_text(lowered.get("nom").copied()),
            first_name: cell_text(lowered.get("prenom").copied()),
            sex: letter_code(&cell_text(lowered.get("sexe").copied())),
            series: letter_code(&cell_text(lowered.get("serie").copied())),
            lv2_choice: if lv2.is_empty() {
                None
            } else {
                Some(capitalize(&lv2))
            },
        });
    }

    match SqliteStore::new(conn).import_students(&parsed) {
        Ok((imported, skipped)) => {
            tracing::info!(imported, skipped, "students imported");
            ok(&req.id, json!({ "imported": imported, "skipped": skipped }))
        }
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.import" => Some(handle_students_import(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_cells_are_normalised() {
        assert_eq!(capitalize("ESPAGNOL"), "Espagnol");
        assert_eq!(capitalize(" allemand "), "Allemand");
        assert_eq!(cell_text(Some(&json!(20231))), "20231");
        assert_eq!(cell_text(Some(&json!(null))), "");
    }
}
