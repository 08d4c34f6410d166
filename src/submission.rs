//! Per (course, month) submission state: `Open -> Finalized`, never back.
//!
//! The checks here decide whether an action is allowed. Making the
//! check-then-write atomic is the database's job (see `db::finalize_month`).

use chrono::{DateTime, Utc};

use crate::error::SubmissionError;
use crate::models::{CourseMonth, EvaluationStatus, StudentEvaluation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Open,
    Finalized { submitted_at: DateTime<Utc> },
}

impl SubmissionState {
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SubmissionState::Open => None,
            SubmissionState::Finalized { submitted_at } => Some(*submitted_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionAction {
    Save,
    Submit,
}

pub fn authorize(
    key: &CourseMonth,
    state: SubmissionState,
    action: SubmissionAction,
) -> Result<(), SubmissionError> {
    match (state, action) {
        (SubmissionState::Open, _) => Ok(()),
        (SubmissionState::Finalized { .. }, SubmissionAction::Submit) => {
            Err(SubmissionError::AlreadyFinalized(key.clone()))
        }
        (SubmissionState::Finalized { .. }, SubmissionAction::Save) => {
            Err(SubmissionError::EditAfterFinalize(key.clone()))
        }
    }
}

/// Submission state as seen from loaded rows: finalized once any row in the
/// scope is submitted.
pub fn state_of(key: &CourseMonth, rows: &[StudentEvaluation]) -> SubmissionState {
    rows.iter()
        .filter(|row| &row.key == key && row.status == EvaluationStatus::Submitted)
        .map(|row| row.updated_at)
        .min()
        .map(|submitted_at| SubmissionState::Finalized { submitted_at })
        .unwrap_or(SubmissionState::Open)
}

/// Marks every row of the scope submitted. Rejected without touching any row
/// when the scope is already finalized.
pub fn finalize(
    key: &CourseMonth,
    rows: &mut [StudentEvaluation],
    now: DateTime<Utc>,
) -> Result<usize, SubmissionError> {
    authorize(key, state_of(key, rows), SubmissionAction::Submit)?;

    let mut finalized = 0;
    for row in rows.iter_mut().filter(|row| &row.key == key) {
        row.status = EvaluationStatus::Submitted;
        row.updated_at = now;
        finalized += 1;
    }
    Ok(finalized)
}

/// Replaces or appends a draft row, keyed by (student, course month, task).
pub fn save_draft(
    rows: &mut Vec<StudentEvaluation>,
    mut draft: StudentEvaluation,
) -> Result<(), SubmissionError> {
    authorize(&draft.key, state_of(&draft.key, rows), SubmissionAction::Save)?;

    draft.status = EvaluationStatus::Draft;
    match rows.iter_mut().find(|row| {
        row.key == draft.key
            && row.student_id == draft.student_id
            && row.task_title == draft.task_title
    }) {
        Some(existing) => {
            draft.id = existing.id;
            *existing = draft;
        }
        None => rows.push(draft),
    }
    Ok(())
}
