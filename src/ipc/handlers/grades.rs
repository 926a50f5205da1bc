use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_owner, parse_optional_score, required_str, semester_param, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::lock;
use crate::model::{GradeEntry, GradeInput, Subject};
use crate::store::{GradeStore, SqliteStore};
use serde_json::json;
use std::collections::{HashMap, HashSet};

const GRADES_SAVE_MAX_ROWS: usize = 2000;

fn average_json(entry: &GradeEntry) -> (serde_json::Value, serde_json::Value) {
    match calc::entry_average(entry) {
        Ok(avg) => (json!(avg), serde_json::Value::Null),
        Err(e) => (
            serde_json::Value::Null,
            json!({ "code": e.code(), "message": e.to_string() }),
        ),
    }
}

fn load_subject(
    store: &SqliteStore<'_>,
    req: &Request,
) -> Result<Subject, serde_json::Value> {
    let subject_id = required_str(req, "subjectId")?;
    match store.find_subject(&subject_id) {
        Ok(Some(s)) => Ok(s),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "subject not found",
            Some(json!({ "subjectId": subject_id })),
        )),
        Err(e) => Err(store_err(req, e)),
    }
}

fn handle_grades_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let subject = match load_subject(&store, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let semester = match semester_param(req, Some(1)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let loaded = store
        .list_students_in_series(&subject.series)
        .and_then(|students| Ok((students, store.list_grade_entries(semester)?)))
        .and_then(|(students, entries)| {
            Ok((students, entries, store.is_semester_validated(semester)?))
        });
    let (students, entries, validated) = match loaded {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let by_student: HashMap<&str, &GradeEntry> = entries
        .iter()
        .filter(|e| e.subject_id == subject.id)
        .map(|e| (e.student_id.as_str(), e))
        .collect();

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let entry = by_student.get(s.id.as_str()).copied();
            let (average, average_error) = entry
                .map(average_json)
                .unwrap_or((serde_json::Value::Null, serde_json::Value::Null));
            json!({
                "studentId": s.id,
                "rollCode": s.roll_code,
                "lastName": s.last_name,
                "firstName": s.first_name,
                "quizzes": entry.and_then(|e| e.quizzes.clone()),
                "exam1": entry.and_then(|e| e.exam1),
                "exam2": entry.and_then(|e| e.exam2),
                "updatedBy": entry.map(|e| e.updated_by.clone()),
                "updatedAt": entry.map(|e| e.updated_at.clone()),
                "average": average,
                "averageError": average_error,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subject": subject,
            "semester": semester,
            "validated": validated,
            "rows": rows
        }),
    )
}

fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let subject = match load_subject(&store, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let semester = match semester_param(req, Some(1)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match required_str(req, "actor") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = ensure_owner(req, &subject, &actor) {
        return e;
    }

    // Checked before looking at the rows; re-checked inside the write
    // transaction.
    if let Err(e) = lock::ensure_open(&store, semester) {
        return store_err(req, e);
    }

    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows[]", None);
    };
    if rows.len() > GRADES_SAVE_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            "too many rows",
            Some(json!({ "rows": rows.len(), "maxRows": GRADES_SAVE_MAX_ROWS })),
        );
    }

    let eligible: HashSet<String> = match store.list_students_in_series(&subject.series) {
        Ok(students) => students.into_iter().map(|s| s.id).collect(),
        Err(e) => return store_err(req, e),
    };

    let mut inputs: Vec<GradeInput> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            return err(
                &req.id,
                "bad_params",
                format!("row at index {} must be an object", i),
                None,
            );
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                format!("row at index {} missing studentId", i),
                None,
            );
        };
        if !eligible.contains(student_id) {
            return err(
                &req.id,
                "bad_params",
                "student is not enrolled in the subject's series",
                Some(json!({ "row": i, "studentId": student_id, "series": subject.series })),
            );
        }
        let quizzes = match obj.get("quizzes") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("row at index {}: quizzes must be text", i),
                    None,
                )
            }
        };
        let mut exams = [None, None];
        for (slot, key) in exams.iter_mut().zip(["exam1", "exam2"]) {
            match parse_optional_score(obj.get(key)) {
                Ok(v) => *slot = v,
                Err(message) => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("row at index {}: {}", i, message),
                        Some(json!({ "row": i, "field": key })),
                    )
                }
            }
        }
        inputs.push(GradeInput {
            student_id: student_id.to_string(),
            quizzes,
            exam1: exams[0],
            exam2: exams[1],
        });
    }

    match store.upsert_grade_entries(&subject.id, semester, &inputs, &actor) {
        Ok(saved) => {
            tracing::info!(
                subject = %subject.name,
                semester,
                actor = %actor,
                saved,
                "grade sheet saved"
            );
            ok(&req.id, json!({ "saved": saved, "semester": semester }))
        }
        Err(e) => store_err(req, e),
    }
}

fn handle_grades_subject_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match semester_param(req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let entry = match SqliteStore::new(conn).find_grade_entry(&student_id, &subject_id, semester) {
        Ok(Some(e)) => e,
        Ok(None) => return err(&req.id, "not_found", "no grades entered yet", None),
        Err(e) => return store_err(req, e),
    };

    match calc::entry_average(&entry) {
        Ok(avg) => ok(
            &req.id,
            json!({ "subjectName": entry.subject_name, "average": avg }),
        ),
        Err(e) => {
            let details = match &e {
                calc::SubjectAverageError::Parse(p) => Some(json!({ "token": p.token })),
                calc::SubjectAverageError::QuizCount { count } => Some(json!({ "count": count })),
                calc::SubjectAverageError::MissingExam => None,
            };
            err(&req.id, e.code(), e.to_string(), details)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.open" => Some(handle_grades_open(state, req)),
        "grades.save" => Some(handle_grades_save(state, req)),
        "grades.subjectAverage" => Some(handle_grades_subject_average(state, req)),
        _ => None,
    }
}
