use crate::model::{GradeEntry, Student, StudentResult, SubjectAverage, SubjectLine};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

pub const MIN_QUIZ_COUNT: usize = 2;
pub const MAX_QUIZ_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quiz score: '{token}'")]
pub struct QuizParseError {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectAverageError {
    #[error(transparent)]
    Parse(#[from] QuizParseError),
    #[error("invalid quiz scores: 2 to 4 required, got {count}")]
    QuizCount { count: usize },
    #[error("both exam scores are required")]
    MissingExam,
}

impl SubjectAverageError {
    pub fn code(&self) -> &'static str {
        match self {
            SubjectAverageError::Parse(_) => "quiz_parse_failed",
            SubjectAverageError::QuizCount { .. } | SubjectAverageError::MissingExam => {
                "incomplete_subject"
            }
        }
    }
}

/// Rounds to hundredths from the exact binary value of `x`. `2.675` is
/// stored as `2.67499...` and gives `2.67`; scaling by 100 first would
/// turn it into an exact half.
pub fn round_2_decimals(x: f64) -> f64 {
    format!("{:.2}", x).parse().unwrap_or(x)
}

/// Splits quiz text on `,` or `;`. Blank tokens are skipped; the first
/// token that is not a finite number fails the whole list.
pub fn parse_quiz_scores(raw: Option<&str>) -> Result<Vec<f64>, QuizParseError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut scores = Vec::new();
    for token in raw.split(&[',', ';'][..]) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => scores.push(v),
            _ => {
                return Err(QuizParseError {
                    token: token.to_string(),
                })
            }
        }
    }
    Ok(scores)
}

pub fn subject_average(
    quizzes: &[f64],
    exam1: Option<f64>,
    exam2: Option<f64>,
    coefficient: f64,
) -> Result<SubjectAverage, SubjectAverageError> {
    if quizzes.len() < MIN_QUIZ_COUNT || quizzes.len() > MAX_QUIZ_COUNT {
        return Err(SubjectAverageError::QuizCount {
            count: quizzes.len(),
        });
    }
    let (Some(exam1), Some(exam2)) = (exam1, exam2) else {
        return Err(SubjectAverageError::MissingExam);
    };

    let mi = round_2_decimals(quizzes.iter().sum::<f64>() / quizzes.len() as f64);
    let moyenne = round_2_decimals((mi + exam1 + exam2) / 3.0);
    let ponderee = round_2_decimals(moyenne * coefficient);

    Ok(SubjectAverage {
        mi,
        moyenne,
        coefficient,
        ponderee,
    })
}

pub fn entry_average(entry: &GradeEntry) -> Result<SubjectAverage, SubjectAverageError> {
    let quizzes = parse_quiz_scores(entry.quizzes.as_deref())?;
    subject_average(&quizzes, entry.exam1, entry.exam2, entry.coefficient)
}

/// Competition ranks ("1,1,3") for scores already sorted descending.
pub fn competition_ranks(sorted_scores: &[f64]) -> Vec<usize> {
    let mut ranks = Vec::with_capacity(sorted_scores.len());
    let mut previous: Option<(f64, usize)> = None;
    for (i, score) in sorted_scores.iter().copied().enumerate() {
        let rank = match previous {
            Some((prev_score, prev_rank)) if prev_score == score => prev_rank,
            _ => i + 1,
        };
        ranks.push(rank);
        previous = Some((score, rank));
    }
    ranks
}

/// Builds the ranked roster for one semester.
///
/// `students` must already be in roster order (last name, first name);
/// that order is the only tie-break between equal averages. Entries that
/// cannot be averaged are left out of the student's totals.
pub fn aggregate_semester(students: &[Student], entries: &[GradeEntry]) -> Vec<StudentResult> {
    let mut entries_by_student: HashMap<&str, Vec<&GradeEntry>> = HashMap::new();
    for e in entries {
        entries_by_student
            .entry(e.student_id.as_str())
            .or_default()
            .push(e);
    }

    let mut rows: Vec<StudentResult> = Vec::with_capacity(students.len());
    for s in students {
        let mut weighted_sum = 0.0_f64;
        let mut weight_sum = 0.0_f64;
        let mut details: Vec<SubjectLine> = Vec::new();

        for e in entries_by_student.get(s.id.as_str()).into_iter().flatten() {
            let avg = match entry_average(e) {
                Ok(v) => v,
                Err(err) => {
                    tracing::debug!(
                        student = %s.roll_code,
                        subject = %e.subject_name,
                        semester = e.semester,
                        reason = %err,
                        "subject excluded from semester average"
                    );
                    continue;
                }
            };
            weighted_sum += avg.ponderee;
            weight_sum += avg.coefficient;
            details.push(SubjectLine {
                subject_id: e.subject_id.clone(),
                subject_name: e.subject_name.clone(),
                moyenne: avg.moyenne,
            });
        }

        let overall_average = if weight_sum > 0.0 {
            round_2_decimals(weighted_sum / weight_sum)
        } else {
            0.0
        };

        rows.push(StudentResult {
            student_id: s.id.clone(),
            roll_code: s.roll_code.clone(),
            last_name: s.last_name.clone(),
            first_name: s.first_name.clone(),
            sex: s.sex.clone(),
            series: s.series.clone(),
            overall_average,
            subjects_counted: details.len(),
            details,
            rank: 0,
        });
    }

    // Vec::sort_by is stable, so roster order survives among ties.
    rows.sort_by(|a, b| {
        b.overall_average
            .partial_cmp(&a.overall_average)
            .unwrap_or(Ordering::Equal)
    });
    let scores: Vec<f64> = rows.iter().map(|r| r.overall_average).collect();
    for (row, rank) in rows.iter_mut().zip(competition_ranks(&scores)) {
        row.rank = rank;
    }
    rows
}
