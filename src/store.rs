use crate::calc;
use crate::lock::{self, LockedSemesterError, ValidationLedger, ValidationOutcome};
use crate::model::{
    GradeEntry, GradeInput, SemesterValidation, Student, StudentResult, Subject,
};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Locked(#[from] LockedSemesterError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Db(_) => "db_query_failed",
            StoreError::Locked(_) => "semester_locked",
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict(_) => "conflict",
        }
    }
}

/// What the semester engine reads from and writes to.
pub trait GradeStore: ValidationLedger<Error = StoreError> {
    /// Roster order: last name, then first name.
    fn list_students(&self) -> Result<Vec<Student>, StoreError>;

    /// Entries for one semester, joined with subject name and weight.
    fn list_grade_entries(&self, semester: i64) -> Result<Vec<GradeEntry>, StoreError>;

    fn find_grade_entry(
        &self,
        student_id: &str,
        subject_id: &str,
        semester: i64,
    ) -> Result<Option<GradeEntry>, StoreError>;

    /// Writes one entry unless the semester is validated.
    fn upsert_grade_entry(
        &self,
        subject_id: &str,
        semester: i64,
        input: &GradeInput,
        actor: &str,
    ) -> Result<(), StoreError>;

    fn is_semester_validated(&self, semester: i64) -> Result<bool, StoreError> {
        lock::is_validated(self, semester)
    }

    fn record_validation(
        &self,
        semester: i64,
        actor: &str,
    ) -> Result<ValidationOutcome, StoreError> {
        lock::validate(self, semester, actor)
    }
}

/// Fresh ranked roster for `semester`. Never cached.
pub fn compute_semester_results<S>(store: &S, semester: i64) -> Result<Vec<StudentResult>, StoreError>
where
    S: GradeStore + ?Sized,
{
    let students = store.list_students()?;
    let entries = store.list_grade_entries(semester)?;
    Ok(calc::aggregate_semester(&students, &entries))
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub roll_code: String,
    pub last_name: String,
    pub first_name: String,
    pub sex: String,
    pub series: String,
    pub lv2_choice: Option<String>,
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

const STUDENT_COLUMNS: &str = "id, roll_code, last_name, first_name, sex, series, lv2_choice";

const ENTRY_SELECT: &str = "SELECT ge.id, ge.student_id, ge.subject_id, sub.name, sub.coefficient,
        ge.semester, ge.quizzes, ge.exam1, ge.exam2, ge.updated_by, ge.updated_at
     FROM grade_entries ge
     JOIN subjects sub ON sub.id = ge.subject_id";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        roll_code: r.get(1)?,
        last_name: r.get(2)?,
        first_name: r.get(3)?,
        sex: r.get(4)?,
        series: r.get(5)?,
        lv2_choice: r.get(6)?,
    })
}

fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        name: r.get(1)?,
        series: r.get(2)?,
        coefficient: r.get(3)?,
        teacher: r.get(4)?,
    })
}

fn entry_from_row(r: &Row<'_>) -> rusqlite::Result<GradeEntry> {
    Ok(GradeEntry {
        id: r.get(0)?,
        student_id: r.get(1)?,
        subject_id: r.get(2)?,
        subject_name: r.get(3)?,
        coefficient: r.get(4)?,
        semester: r.get(5)?,
        quizzes: r.get(6)?,
        exam1: r.get(7)?,
        exam2: r.get(8)?,
        updated_by: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn list_students_in_series(&self, series: &str) -> Result<Vec<Student>, StoreError> {
        let sql = format!(
            "SELECT {} FROM students WHERE series = ? ORDER BY last_name, first_name, rowid",
            STUDENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([series], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [student_id], student_from_row)
            .optional()?)
    }

    pub fn roll_code_exists(&self, roll_code: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM students WHERE roll_code = ?",
                [roll_code],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn create_student(&self, s: &NewStudent) -> Result<String, StoreError> {
        if self.roll_code_exists(&s.roll_code)? {
            return Err(StoreError::Conflict(format!(
                "roll code already registered: {}",
                s.roll_code
            )));
        }
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO students(id, roll_code, last_name, first_name, sex, series, lv2_choice)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &s.roll_code,
                &s.last_name,
                &s.first_name,
                &s.sex,
                &s.series,
                &s.lv2_choice,
            ),
        )?;
        Ok(id)
    }

    /// Inserts every student whose roll code is new, in one transaction.
    /// Returns `(imported, skipped)`.
    pub fn import_students(&self, rows: &[NewStudent]) -> Result<(usize, usize), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let (mut imported, mut skipped) = (0_usize, 0_usize);
        {
            let scoped = SqliteStore::new(&tx);
            for s in rows {
                if s.roll_code.is_empty() || scoped.roll_code_exists(&s.roll_code)? {
                    skipped += 1;
                    continue;
                }
                scoped.create_student(s)?;
                imported += 1;
            }
        }
        tx.commit()?;
        Ok((imported, skipped))
    }

    pub fn list_subjects(
        &self,
        series: Option<&str>,
        teacher: Option<&str>,
    ) -> Result<Vec<Subject>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, series, coefficient, teacher
             FROM subjects
             WHERE (?1 IS NULL OR series = ?1) AND (?2 IS NULL OR teacher = ?2)
             ORDER BY series, name, rowid",
        )?;
        let rows = stmt
            .query_map((series, teacher), subject_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_subject(&self, subject_id: &str) -> Result<Option<Subject>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, series, coefficient, teacher FROM subjects WHERE id = ?",
                [subject_id],
                subject_from_row,
            )
            .optional()?)
    }

    pub fn create_subject(
        &self,
        name: &str,
        series: &str,
        coefficient: f64,
        teacher: Option<&str>,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO subjects(id, name, series, coefficient, teacher) VALUES(?, ?, ?, ?, ?)",
            (&id, name, series, coefficient, teacher),
        )?;
        Ok(id)
    }

    /// Every entry of one subject, all semesters (grade book order).
    pub fn list_subject_entries(&self, subject_id: &str) -> Result<Vec<GradeEntry>, StoreError> {
        let sql = format!(
            "{} JOIN students st ON st.id = ge.student_id
             WHERE ge.subject_id = ?
             ORDER BY ge.semester, st.last_name, st.first_name, st.rowid",
            ENTRY_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([subject_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_validations(&self) -> Result<Vec<SemesterValidation>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT semester, validated_by, validated_at FROM semester_validations ORDER BY semester",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(SemesterValidation {
                    semester: r.get(0)?,
                    validated_by: r.get(1)?,
                    validated_at: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Applies a whole grade sheet in one transaction. A validated semester
    /// or any failing row leaves every entry untouched.
    pub fn upsert_grade_entries(
        &self,
        subject_id: &str,
        semester: i64,
        inputs: &[GradeInput],
        actor: &str,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let scoped = SqliteStore::new(&tx);
            lock::ensure_open(&scoped, semester)?;
            for input in inputs {
                scoped.write_entry(subject_id, semester, input, actor)?;
            }
        }
        tx.commit()?;
        Ok(inputs.len())
    }

    fn write_entry(
        &self,
        subject_id: &str,
        semester: i64,
        input: &GradeInput,
        actor: &str,
    ) -> Result<(), StoreError> {
        let entry_id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO grade_entries(
               id, student_id, subject_id, semester, quizzes, exam1, exam2, updated_by, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, semester) DO UPDATE SET
               quizzes = excluded.quizzes,
               exam1 = excluded.exam1,
               exam2 = excluded.exam2,
               updated_by = excluded.updated_by,
               updated_at = excluded.updated_at",
            (
                &entry_id,
                &input.student_id,
                subject_id,
                semester,
                &input.quizzes,
                input.exam1,
                input.exam2,
                actor,
                now_rfc3339(),
            ),
        )?;
        Ok(())
    }
}

impl ValidationLedger for SqliteStore<'_> {
    type Error = StoreError;

    fn find_validation(&self, semester: i64) -> Result<Option<SemesterValidation>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT semester, validated_by, validated_at
                 FROM semester_validations WHERE semester = ?",
                [semester],
                |r| {
                    Ok(SemesterValidation {
                        semester: r.get(0)?,
                        validated_by: r.get(1)?,
                        validated_at: r.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn insert_validation_if_absent(&self, record: &SemesterValidation) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "INSERT INTO semester_validations(semester, validated_by, validated_at)
             VALUES(?, ?, ?)
             ON CONFLICT(semester) DO NOTHING",
            (record.semester, &record.validated_by, &record.validated_at),
        )?;
        Ok(changed == 1)
    }
}

impl GradeStore for SqliteStore<'_> {
    fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let sql = format!(
            "SELECT {} FROM students ORDER BY last_name, first_name, rowid",
            STUDENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_grade_entries(&self, semester: i64) -> Result<Vec<GradeEntry>, StoreError> {
        // Stable per-student subject order keeps the weighted sums reproducible.
        let sql = format!(
            "{} WHERE ge.semester = ? ORDER BY ge.student_id, sub.name, sub.id",
            ENTRY_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([semester], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_grade_entry(
        &self,
        student_id: &str,
        subject_id: &str,
        semester: i64,
    ) -> Result<Option<GradeEntry>, StoreError> {
        let sql = format!(
            "{} WHERE ge.student_id = ? AND ge.subject_id = ? AND ge.semester = ?",
            ENTRY_SELECT
        );
        Ok(self
            .conn
            .query_row(&sql, (student_id, subject_id, semester), entry_from_row)
            .optional()?)
    }

    fn upsert_grade_entry(
        &self,
        subject_id: &str,
        semester: i64,
        input: &GradeInput,
        actor: &str,
    ) -> Result<(), StoreError> {
        self.upsert_grade_entries(subject_id, semester, std::slice::from_ref(input), actor)
            .map(|_| ())
    }
}
