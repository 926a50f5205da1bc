use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn assert_close(v: &serde_json::Value, expected: f64) {
    let actual = v.as_f64().unwrap_or_else(|| panic!("not a number: {}", v));
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_gradesd");
        let mut child = Command::new(exe)
            .env_remove("GRADESD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn gradesd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.call(method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
        resp["result"].clone()
    }

    fn call_err(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.call(method, params);
        assert_eq!(resp["ok"], json!(false), "{} unexpectedly succeeded", method);
        resp["error"].clone()
    }

    fn create_student(&mut self, roll: &str, last: &str, first: &str, series: &str) -> String {
        let result = self.call_ok(
            "students.create",
            json!({
                "rollCode": roll,
                "lastName": last,
                "firstName": first,
                "sex": "M",
                "series": series
            }),
        );
        result["studentId"].as_str().expect("studentId").to_string()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn subject(sc: &mut Sidecar, name: &str, coefficient: f64, teacher: Option<&str>) -> String {
    sc.call_ok(
        "subjects.create",
        json!({ "name": name, "series": "C", "coefficient": coefficient, "teacher": teacher }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string()
}

fn save(sc: &mut Sidecar, subject_id: &str, actor: &str, rows: serde_json::Value) {
    let saved = sc.call_ok(
        "grades.save",
        json!({ "subjectId": subject_id, "semester": 1, "actor": actor, "rows": rows }),
    );
    assert!(saved["saved"].as_u64().is_some());
}

struct Class {
    ba: String,
    diop: String,
    fall: String,
    sow: String,
    math: String,
}

/// Four students in series C:
/// - Ba: 13.67 in maths (weight 2) and 10 in physics, overall 12.45
/// - Diop and Fall: 15 everywhere, tied
/// - Sow: unparseable maths quizzes, nothing counted
fn seed_class(sc: &mut Sidecar) -> Class {
    // Created out of roster order on purpose.
    let sow = sc.create_student("C-04", "Sow", "Ibrahima", "C");
    let fall = sc.create_student("C-03", "Fall", "Ndeye", "C");
    let diop = sc.create_student("C-02", "Diop", "Moussa", "C");
    let ba = sc.create_student("C-01", "Ba", "Awa", "C");
    let math = subject(sc, "Mathématiques", 2.0, Some("mme.diallo"));
    let physics = subject(sc, "Physique", 1.0, None);

    save(
        sc,
        &math,
        "mme.diallo",
        json!([
            { "studentId": ba, "quizzes": "12,14", "exam1": 13, "exam2": 15 },
            { "studentId": diop, "quizzes": "15,15", "exam1": 15, "exam2": 15 },
            { "studentId": fall, "quizzes": "15;15", "exam1": 15, "exam2": 15 },
            { "studentId": sow, "quizzes": "12,abc", "exam1": 10, "exam2": 10 }
        ]),
    );
    save(
        sc,
        &physics,
        "m.ndiaye",
        json!([
            { "studentId": ba, "quizzes": "10;10", "exam1": 10, "exam2": 10 },
            { "studentId": diop, "quizzes": "15,15", "exam1": 15, "exam2": 15 },
            { "studentId": fall, "quizzes": "15,15,15", "exam1": 15, "exam2": 15 }
        ]),
    );

    Class {
        ba,
        diop,
        fall,
        sow,
        math,
    }
}

#[test]
fn semester_results_use_competition_ranking() {
    let workspace = temp_dir("gradesd-results-rank");
    let mut sc = Sidecar::spawn();
    sc.call_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_class(&mut sc);

    let results = sc.call_ok("results.semester", json!({ "semester": 1 }));
    assert_eq!(results["validated"], json!(false));
    let rows = results["rows"].as_array().expect("rows");
    let order: Vec<&str> = rows
        .iter()
        .map(|r| r["studentId"].as_str().expect("studentId"))
        .collect();
    // Ties keep roster order (Diop before Fall).
    assert_eq!(
        order,
        vec![
            class.diop.as_str(),
            class.fall.as_str(),
            class.ba.as_str(),
            class.sow.as_str()
        ]
    );
    let ranks: Vec<u64> = rows
        .iter()
        .map(|r| r["rank"].as_u64().expect("rank"))
        .collect();
    assert_eq!(ranks, vec![1, 1, 3, 4]);

    assert_close(&rows[0]["overallAverage"], 15.0);
    assert_close(&rows[2]["overallAverage"], 12.45);
    assert_eq!(rows[2]["subjectsCounted"], json!(2));
    assert_close(&rows[3]["overallAverage"], 0.0);
    assert_eq!(rows[3]["subjectsCounted"], json!(0));

    // Recomputed from stored entries every time.
    let again = sc.call_ok("results.semester", json!({ "semester": 1 }));
    assert_eq!(again["rows"], results["rows"]);

    let empty = sc.call_ok("results.semester", json!({ "semester": 2 }));
    let empty_rows = empty["rows"].as_array().expect("rows");
    assert_eq!(empty_rows.len(), 4);
    assert!(empty_rows.iter().all(|r| r["rank"] == json!(1)));

    let missing = sc.call_err("results.semester", json!({}));
    assert_eq!(missing["code"], json!("bad_params"));

    // Changing a mark changes the ranking on the next read.
    save(
        &mut sc,
        &class.math,
        "mme.diallo",
        json!([ { "studentId": class.ba, "quizzes": "20,20", "exam1": 20, "exam2": 20 } ]),
    );
    let updated = sc.call_ok("results.semester", json!({ "semester": 1 }));
    assert_eq!(updated["rows"][0]["studentId"], json!(class.ba));
    assert_close(&updated["rows"][0]["overallAverage"], 16.67);

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulletin_and_gradebook_follow_semester_results() {
    let workspace = temp_dir("gradesd-results-bulletin");
    let mut sc = Sidecar::spawn();
    sc.call_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_class(&mut sc);

    let bulletin = sc.call_ok(
        "results.bulletin",
        json!({ "studentId": class.ba, "semester": 1 }),
    );
    assert_eq!(bulletin["student"]["rollCode"], json!("C-01"));
    let lines = bulletin["lines"].as_array().expect("lines");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["subjectName"], json!("Mathématiques"));
    assert_close(&lines[0]["mi"], 13.0);
    assert_close(&lines[0]["moyenne"], 13.67);
    assert_close(&lines[0]["coefficient"], 2.0);
    assert_close(&lines[0]["ponderee"], 27.34);
    assert_eq!(lines[1]["subjectName"], json!("Physique"));
    assert_close(&lines[1]["ponderee"], 10.0);
    assert_close(&bulletin["overallAverage"], 12.45);
    assert_eq!(bulletin["subjectsCounted"], json!(2));
    assert_eq!(bulletin["rank"], json!(3));
    assert_eq!(bulletin["classSize"], json!(4));

    let sow = sc.call_ok(
        "results.bulletin",
        json!({ "studentId": class.sow, "semester": 1 }),
    );
    assert_eq!(sow["lines"], json!([]));
    assert_eq!(sow["excluded"][0]["code"], json!("quiz_parse_failed"));
    assert_close(&sow["overallAverage"], 0.0);
    assert_eq!(sow["rank"], json!(4));

    let unknown = sc.call_err(
        "results.bulletin",
        json!({ "studentId": "nobody", "semester": 1 }),
    );
    assert_eq!(unknown["code"], json!("not_found"));

    sc.call_ok(
        "grades.save",
        json!({
            "subjectId": class.math,
            "semester": 2,
            "actor": "mme.diallo",
            "rows": [ { "studentId": class.diop, "quizzes": "9,9", "exam1": 9, "exam2": 9 } ]
        }),
    );

    let denied = sc.call_err(
        "results.gradebook",
        json!({ "subjectId": class.math, "actor": "m.ndiaye" }),
    );
    assert_eq!(denied["code"], json!("forbidden"));
    let no_actor = sc.call_err("results.gradebook", json!({ "subjectId": class.math }));
    assert_eq!(no_actor["code"], json!("bad_params"));

    let book = sc.call_ok(
        "results.gradebook",
        json!({ "subjectId": class.math, "actor": "mme.diallo" }),
    );
    let rows = book["rows"].as_array().expect("rows");
    let listed: Vec<(u64, &str)> = rows
        .iter()
        .map(|r| {
            (
                r["semester"].as_u64().expect("semester"),
                r["lastName"].as_str().expect("lastName"),
            )
        })
        .collect();
    assert_eq!(
        listed,
        vec![(1, "Ba"), (1, "Diop"), (1, "Fall"), (1, "Sow"), (2, "Diop")]
    );
    assert_eq!(rows[3]["quizzes"], json!("12,abc"));
    assert_eq!(rows[3]["updatedBy"], json!("mme.diallo"));

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
