use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub roll_code: String,
    pub last_name: String,
    pub first_name: String,
    pub sex: String,
    pub series: String,
    pub lv2_choice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub series: String,
    pub coefficient: f64,
    pub teacher: Option<String>,
}

/// One (student, subject, semester) line, already joined with the subject
/// name and weight that were current when it was read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub coefficient: f64,
    pub semester: i64,
    pub quizzes: Option<String>,
    pub exam1: Option<f64>,
    pub exam2: Option<f64>,
    pub updated_by: String,
    pub updated_at: String,
}

/// Raw grade input for an upsert. Quiz text is stored as typed.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeInput {
    pub student_id: String,
    pub quizzes: Option<String>,
    pub exam1: Option<f64>,
    pub exam2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterValidation {
    pub semester: i64,
    pub validated_by: String,
    pub validated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub mi: f64,
    pub moyenne: f64,
    pub coefficient: f64,
    pub ponderee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject_id: String,
    pub subject_name: String,
    pub moyenne: f64,
}

/// Ranked semester row for one student.
///
/// `subjects_counted == 0` distinguishes "nothing computable yet" from a
/// genuine overall average of zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub roll_code: String,
    pub last_name: String,
    pub first_name: String,
    pub sex: String,
    pub series: String,
    pub overall_average: f64,
    pub subjects_counted: usize,
    pub details: Vec<SubjectLine>,
    pub rank: usize,
}
