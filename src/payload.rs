use std::collections::HashMap;

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{
    parse_month, Category, CategorySelections, CourseMonth, EvaluationStatus, Selection,
    StudentEvaluation,
};
use crate::rubric::RubricCatalog;
use crate::scoring::{self, ScoreCard, ScoringPolicy};

/// Client-sent derived fields further than this from the recomputed value
/// are reported.
const HINT_TOLERANCE: f64 = 0.005;

/// Everything an evaluator enters for one row.
#[derive(Debug, Clone)]
pub struct DraftInput {
    pub student_id: String,
    pub key: CourseMonth,
    pub semester: String,
    pub task_title: String,
    pub rubric_version: String,
    pub comment: String,
    pub selections: CategorySelections,
}

/// Scores a row against its rubric version and returns it as a draft. The
/// derived fields always come from this computation.
pub fn build_draft(
    input: DraftInput,
    catalog: &RubricCatalog,
    policy: ScoringPolicy,
) -> (StudentEvaluation, ScoreCard) {
    let version = catalog.version(&input.rubric_version);
    if version.is_none() {
        tracing::warn!(
            rubric_version = %input.rubric_version,
            "rubric version not loaded, option selections score as 0"
        );
    }

    let card = scoring::score_selections(version, &input.selections, policy);
    let evaluation = StudentEvaluation {
        id: Uuid::new_v4(),
        student_id: input.student_id,
        key: input.key,
        semester: input.semester,
        task_title: input.task_title,
        rubric_version: input.rubric_version,
        comment: input.comment,
        ratings: card.ratings.clone(),
        pronunciation_average: card.pronunciation_average,
        grammar_average: card.grammar_average,
        fluency_average: card.fluency_average,
        epgf_average: card.epgf_average,
        proficiency_level: card.proficiency_level().to_string(),
        cefr_level: card.cefr.to_string(),
        status: EvaluationStatus::Draft,
        updated_at: Utc::now(),
    };
    (evaluation, card)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayloadRating {
    pub option_id: Option<i64>,
    pub rating: Option<f64>,
}

/// Evaluation row as posted by the scoring table. The derived fields are
/// display hints only.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationPayload {
    pub student_id: String,
    pub course_code: String,
    pub school_year: String,
    #[serde(default)]
    pub semester: String,
    pub month: String,
    pub task_title: String,
    #[serde(default)]
    pub comment: String,
    pub rubric_version: String,
    #[serde(default)]
    pub categories: HashMap<Category, PayloadRating>,
    pub pronunciation_average: Option<f64>,
    pub grammar_average: Option<f64>,
    pub fluency_average: Option<f64>,
    pub epgf_average: Option<f64>,
    pub proficiency_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HintMismatch {
    pub field: &'static str,
    pub sent: String,
    pub computed: String,
}

impl EvaluationPayload {
    pub fn into_draft_input(self) -> anyhow::Result<(DraftInput, ClientHints)> {
        let month = parse_month(&self.month)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("payload for student {}", self.student_id))?;

        let mut selections = CategorySelections::new();
        for (category, value) in &self.categories {
            // An option id wins over a raw rating when both are sent.
            if let Some(id) = value.option_id {
                selections.set(*category, Selection::Option(id));
            } else if let Some(rating) = value.rating {
                selections.set(*category, Selection::Rating(rating));
            }
        }

        let hints = ClientHints {
            pronunciation_average: self.pronunciation_average,
            grammar_average: self.grammar_average,
            fluency_average: self.fluency_average,
            epgf_average: self.epgf_average,
            proficiency_level: self.proficiency_level,
        };
        let input = DraftInput {
            student_id: self.student_id,
            key: CourseMonth::new(self.course_code, self.school_year, month),
            semester: self.semester,
            task_title: self.task_title,
            rubric_version: self.rubric_version,
            comment: self.comment,
            selections,
        };
        Ok((input, hints))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientHints {
    pub pronunciation_average: Option<f64>,
    pub grammar_average: Option<f64>,
    pub fluency_average: Option<f64>,
    pub epgf_average: Option<f64>,
    pub proficiency_level: Option<String>,
}

impl ClientHints {
    pub fn compare(&self, card: &ScoreCard) -> Vec<HintMismatch> {
        let mut mismatches = Vec::new();
        let numeric = [
            ("pronunciation_average", self.pronunciation_average, card.pronunciation_average),
            ("grammar_average", self.grammar_average, card.grammar_average),
            ("fluency_average", self.fluency_average, card.fluency_average),
            ("epgf_average", self.epgf_average, card.epgf_average),
        ];

        for (field, sent, computed) in numeric {
            if let Some(sent) = sent {
                if (sent - computed).abs() > HINT_TOLERANCE {
                    mismatches.push(HintMismatch {
                        field,
                        sent: format!("{sent:.2}"),
                        computed: format!("{computed:.2}"),
                    });
                }
            }
        }

        if let Some(level) = &self.proficiency_level {
            if !level.trim().eq_ignore_ascii_case(card.proficiency_level()) {
                mismatches.push(HintMismatch {
                    field: "proficiency_level",
                    sent: level.clone(),
                    computed: card.proficiency_level().to_string(),
                });
            }
        }

        mismatches
    }
}

/// Parses a JSON file holding one payload object or an array of them.
pub fn parse_payloads(raw: &str) -> anyhow::Result<Vec<EvaluationPayload>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    let payloads = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(payloads)
}
