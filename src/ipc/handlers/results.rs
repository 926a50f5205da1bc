use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_owner, required_str, semester_param, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{compute_semester_results, GradeStore, SqliteStore};
use serde_json::json;

fn handle_results_semester(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let semester = match semester_param(req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let computed = compute_semester_results(&store, semester)
        .and_then(|rows| Ok((rows, store.is_semester_validated(semester)?)));
    match computed {
        Ok((rows, validated)) => {
            tracing::debug!(semester, students = rows.len(), "semester results computed");
            ok(
                &req.id,
                json!({ "semester": semester, "validated": validated, "rows": rows }),
            )
        }
        Err(e) => store_err(req, e),
    }
}

fn handle_results_bulletin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match semester_param(req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);

    let student = match store.find_student(&student_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "student not found",
                Some(json!({ "studentId": student_id })),
            )
        }
        Err(e) => return store_err(req, e),
    };

    let loaded = store
        .list_grade_entries(semester)
        .and_then(|entries| Ok((entries, compute_semester_results(&store, semester)?)))
        .and_then(|(entries, results)| {
            Ok((entries, results, store.is_semester_validated(semester)?))
        });
    let (entries, results, validated) = match loaded {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let mut lines: Vec<serde_json::Value> = Vec::new();
    let mut excluded: Vec<serde_json::Value> = Vec::new();
    for e in entries.iter().filter(|e| e.student_id == student.id) {
        match calc::entry_average(e) {
            Ok(avg) => lines.push(json!({
                "subjectId": e.subject_id,
                "subjectName": e.subject_name,
                "mi": avg.mi,
                "moyenne": avg.moyenne,
                "coefficient": avg.coefficient,
                "ponderee": avg.ponderee,
            })),
            Err(reason) => excluded.push(json!({
                "subjectId": e.subject_id,
                "subjectName": e.subject_name,
                "code": reason.code(),
                "message": reason.to_string(),
            })),
        }
    }

    // The ranked roster is the single source for overall average and rank.
    let Some(row) = results.iter().find(|r| r.student_id == student.id) else {
        return err(&req.id, "not_found", "student not ranked", None);
    };

    ok(
        &req.id,
        json!({
            "student": student,
            "semester": semester,
            "validated": validated,
            "lines": lines,
            "excluded": excluded,
            "overallAverage": row.overall_average,
            "subjectsCounted": row.subjects_counted,
            "rank": row.rank,
            "classSize": results.len(),
        }),
    )
}

fn handle_results_gradebook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = match required_str(req, "actor") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);

    let subject = match store.find_subject(&subject_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "subject not found",
                Some(json!({ "subjectId": subject_id })),
            )
        }
        Err(e) => return store_err(req, e),
    };
    if let Err(e) = ensure_owner(req, &subject, &actor) {
        return e;
    }

    let loaded = store
        .list_subject_entries(&subject.id)
        .and_then(|entries| Ok((entries, store.list_students()?)));
    let (entries, students) = match loaded {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let rows: Vec<serde_json::Value> = entries
        .iter()
        .filter_map(|e| {
            let s = students.iter().find(|s| s.id == e.student_id)?;
            Some(json!({
                "semester": e.semester,
                "studentId": s.id,
                "rollCode": s.roll_code,
                "lastName": s.last_name,
                "firstName": s.first_name,
                "quizzes": e.quizzes,
                "exam1": e.exam1,
                "exam2": e.exam2,
                "updatedBy": e.updated_by,
                "updatedAt": e.updated_at,
            }))
        })
        .collect();

    ok(&req.id, json!({ "subject": subject, "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.semester" => Some(handle_results_semester(state, req)),
        "results.bulletin" => Some(handle_results_bulletin(state, req)),
        "results.gradebook" => Some(handle_results_gradebook(state, req)),
        _ => None,
    }
}
