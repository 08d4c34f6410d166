use thiserror::Error;

use crate::models::{Category, CourseMonth};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("rubric {version} option {id} for {category} has rating {rating} outside 0.00-4.00")]
    RatingOutOfRange {
        version: String,
        category: Category,
        id: i64,
        rating: f64,
    },
    #[error("rubric {version} lists option {id} twice for {category}")]
    DuplicateOption {
        version: String,
        category: Category,
        id: i64,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("scores for {0} have already been submitted")]
    AlreadyFinalized(CourseMonth),
    #[error("scores for {0} are submitted and can no longer be edited")]
    EditAfterFinalize(CourseMonth),
}

impl SubmissionError {
    /// Message shown next to the disabled action.
    pub fn user_message(&self) -> &'static str {
        match self {
            SubmissionError::AlreadyFinalized(_) => {
                "This month has already been submitted. Submitting again is disabled."
            }
            SubmissionError::EditAfterFinalize(_) => {
                "This month has been submitted. Scores are read-only."
            }
        }
    }
}
