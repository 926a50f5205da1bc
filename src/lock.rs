//! Semester validation lock.
//!
//! A semester is `Open` until an administrator validates it; from then on it
//! is `Validated` for good. The marker record is the only source of truth,
//! and nothing here removes one.

use crate::model::SemesterValidation;
use chrono::{SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("semester {semester} is validated: grades can no longer be modified")]
pub struct LockedSemesterError {
    pub semester: i64,
    pub validated_by: String,
    pub validated_at: String,
}

impl From<SemesterValidation> for LockedSemesterError {
    fn from(v: SemesterValidation) -> Self {
        Self {
            semester: v.semester,
            validated_by: v.validated_by,
            validated_at: v.validated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SemesterState {
    Open,
    Validated(SemesterValidation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Validated(SemesterValidation),
    /// Second validation attempt; carries the record that was already there.
    AlreadyValidated(SemesterValidation),
}

impl ValidationOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            ValidationOutcome::Validated(_) => "validated",
            ValidationOutcome::AlreadyValidated(_) => "already_validated",
        }
    }

    pub fn record(&self) -> &SemesterValidation {
        match self {
            ValidationOutcome::Validated(r) | ValidationOutcome::AlreadyValidated(r) => r,
        }
    }
}

/// Storage for validation markers.
pub trait ValidationLedger {
    type Error;

    fn find_validation(&self, semester: i64) -> Result<Option<SemesterValidation>, Self::Error>;

    /// Stores `record` unless its semester already has one. Returns whether
    /// the record was written.
    fn insert_validation_if_absent(&self, record: &SemesterValidation)
        -> Result<bool, Self::Error>;
}

pub fn semester_state<L>(ledger: &L, semester: i64) -> Result<SemesterState, L::Error>
where
    L: ValidationLedger + ?Sized,
{
    Ok(match ledger.find_validation(semester)? {
        Some(v) => SemesterState::Validated(v),
        None => SemesterState::Open,
    })
}

pub fn is_validated<L>(ledger: &L, semester: i64) -> Result<bool, L::Error>
where
    L: ValidationLedger + ?Sized,
{
    Ok(matches!(
        semester_state(ledger, semester)?,
        SemesterState::Validated(_)
    ))
}

/// Gate for every grade mutation.
pub fn ensure_open<L>(ledger: &L, semester: i64) -> Result<(), L::Error>
where
    L: ValidationLedger + ?Sized,
    L::Error: From<LockedSemesterError>,
{
    match semester_state(ledger, semester)? {
        SemesterState::Open => Ok(()),
        SemesterState::Validated(v) => {
            tracing::warn!(
                semester,
                validated_by = %v.validated_by,
                "grade mutation rejected: semester is validated"
            );
            Err(LockedSemesterError::from(v).into())
        }
    }
}

pub fn validate<L>(ledger: &L, semester: i64, actor: &str) -> Result<ValidationOutcome, L::Error>
where
    L: ValidationLedger + ?Sized,
{
    if let Some(existing) = ledger.find_validation(semester)? {
        tracing::info!(semester, "semester already validated");
        return Ok(ValidationOutcome::AlreadyValidated(existing));
    }

    let record = SemesterValidation {
        semester,
        validated_by: actor.to_string(),
        validated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    if ledger.insert_validation_if_absent(&record)? {
        tracing::info!(semester, actor, "semester validated");
        return Ok(ValidationOutcome::Validated(record));
    }

    // Lost a race with another writer; report theirs.
    match ledger.find_validation(semester)? {
        Some(existing) => Ok(ValidationOutcome::AlreadyValidated(existing)),
        None => Ok(ValidationOutcome::AlreadyValidated(record)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemLedger {
        records: RefCell<HashMap<i64, SemesterValidation>>,
    }

    #[derive(Debug, PartialEq)]
    enum MemError {
        Locked(LockedSemesterError),
    }

    impl From<LockedSemesterError> for MemError {
        fn from(e: LockedSemesterError) -> Self {
            MemError::Locked(e)
        }
    }

    impl ValidationLedger for MemLedger {
        type Error = MemError;

        fn find_validation(&self, semester: i64) -> Result<Option<SemesterValidation>, MemError> {
            Ok(self.records.borrow().get(&semester).cloned())
        }

        fn insert_validation_if_absent(
            &self,
            record: &SemesterValidation,
        ) -> Result<bool, MemError> {
            let mut records = self.records.borrow_mut();
            if records.contains_key(&record.semester) {
                return Ok(false);
            }
            records.insert(record.semester, record.clone());
            Ok(true)
        }
    }

    #[test]
    fn open_until_validated() {
        let ledger = MemLedger::default();
        assert_eq!(semester_state(&ledger, 1), Ok(SemesterState::Open));
        assert_eq!(is_validated(&ledger, 1), Ok(false));
        assert_eq!(ensure_open(&ledger, 1), Ok(()));

        let outcome = validate(&ledger, 1, "pp").expect("validate");
        assert_eq!(outcome.status(), "validated");
        assert_eq!(outcome.record().validated_by, "pp");

        assert_eq!(is_validated(&ledger, 1), Ok(true));
        // Other semesters stay open.
        assert_eq!(is_validated(&ledger, 2), Ok(false));
    }

    #[test]
    fn locked_semester_rejects_mutation() {
        let ledger = MemLedger::default();
        validate(&ledger, 2, "pp").expect("validate");
        let Err(MemError::Locked(e)) = ensure_open(&ledger, 2) else {
            panic!("expected locked semester");
        };
        assert_eq!(e.semester, 2);
        assert_eq!(e.validated_by, "pp");
    }

    #[test]
    fn second_validation_keeps_first_record() {
        let ledger = MemLedger::default();
        let first = validate(&ledger, 1, "pp").expect("first");
        let second = validate(&ledger, 1, "someone-else").expect("second");
        assert_eq!(second.status(), "already_validated");
        assert_eq!(second.record(), first.record());
        assert_eq!(
            ledger.records.borrow().get(&1).map(|r| r.validated_by.clone()),
            Some("pp".to_string())
        );
    }
}
