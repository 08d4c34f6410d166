use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Month, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the nine scored rubric dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Consistency,
    Clarity,
    Articulation,
    IntonationAndStress,
    Accuracy,
    ClarityOfThought,
    Syntax,
    QualityOfResponse,
    DetailOfResponse,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Consistency,
        Category::Clarity,
        Category::Articulation,
        Category::IntonationAndStress,
        Category::Accuracy,
        Category::ClarityOfThought,
        Category::Syntax,
        Category::QualityOfResponse,
        Category::DetailOfResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Consistency => "consistency",
            Category::Clarity => "clarity",
            Category::Articulation => "articulation",
            Category::IntonationAndStress => "intonation-and-stress",
            Category::Accuracy => "accuracy",
            Category::ClarityOfThought => "clarity-of-thought",
            Category::Syntax => "syntax",
            Category::QualityOfResponse => "quality-of-response",
            Category::DetailOfResponse => "detail-of-response",
        }
    }

    pub fn sub_score(self) -> SubScore {
        match self {
            Category::Consistency
            | Category::Clarity
            | Category::Articulation
            | Category::IntonationAndStress => SubScore::Pronunciation,
            Category::Accuracy | Category::ClarityOfThought | Category::Syntax => {
                SubScore::Grammar
            }
            Category::QualityOfResponse | Category::DetailOfResponse => SubScore::Fluency,
        }
    }

    /// Dense index used by per-category arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        let category = match normalized.as_str() {
            "consistency" => Category::Consistency,
            "clarity" => Category::Clarity,
            "articulation" => Category::Articulation,
            "intonation-and-stress" | "intonation" => Category::IntonationAndStress,
            "accuracy" => Category::Accuracy,
            "clarity-of-thought" => Category::ClarityOfThought,
            "syntax" => Category::Syntax,
            "quality-of-response" => Category::QualityOfResponse,
            "detail-of-response" => Category::DetailOfResponse,
            _ => return Err(format!("unknown rubric category '{value}'")),
        };
        Ok(category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubScore {
    Pronunciation,
    Grammar,
    Fluency,
}

impl SubScore {
    pub fn categories(self) -> &'static [Category] {
        match self {
            SubScore::Pronunciation => &[
                Category::Consistency,
                Category::Clarity,
                Category::Articulation,
                Category::IntonationAndStress,
            ],
            SubScore::Grammar => &[
                Category::Accuracy,
                Category::ClarityOfThought,
                Category::Syntax,
            ],
            SubScore::Fluency => &[Category::QualityOfResponse, Category::DetailOfResponse],
        }
    }
}

/// What an evaluator picked for a category: a rubric option id, or a rating
/// that was already resolved upstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Option(i64),
    Rating(f64),
}

/// Category selections for one evaluation row; `None` means unselected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySelections {
    slots: [Option<Selection>; 9],
}

impl CategorySelections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: Category, selection: Selection) -> Self {
        self.set(category, selection);
        self
    }

    pub fn set(&mut self, category: Category, selection: Selection) {
        self.slots[category.index()] = Some(selection);
    }

    pub fn get(&self, category: Category) -> Option<Selection> {
        self.slots[category.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Draft,
    Submitted,
}

impl EvaluationStatus {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("submitted") {
            EvaluationStatus::Submitted
        } else {
            EvaluationStatus::Draft
        }
    }
}

/// Identifies the (course, month) unit that the submission guard finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CourseMonth {
    pub course_code: String,
    pub school_year: String,
    pub month: Month,
}

impl CourseMonth {
    pub fn new(
        course_code: impl Into<String>,
        school_year: impl Into<String>,
        month: Month,
    ) -> Self {
        Self {
            course_code: course_code.into(),
            school_year: school_year.into(),
            month,
        }
    }

    /// Stable text key used for row locking.
    pub fn lock_key(&self) -> String {
        format!("{}|{}|{}", self.course_code, self.school_year, self.month.name())
    }
}

impl fmt::Display for CourseMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.course_code,
            self.month.name(),
            self.school_year
        )
    }
}

#[derive(Debug, Clone)]
pub struct StudentEvaluation {
    pub id: Uuid,
    pub student_id: String,
    pub key: CourseMonth,
    pub semester: String,
    pub task_title: String,
    pub rubric_version: String,
    pub comment: String,
    pub ratings: Vec<RatingRecord>,
    pub pronunciation_average: f64,
    pub grammar_average: f64,
    pub fluency_average: f64,
    pub epgf_average: f64,
    pub proficiency_level: String,
    pub cefr_level: String,
    pub status: EvaluationStatus,
    pub updated_at: DateTime<Utc>,
}

/// Persisted per-category resolution of one evaluation row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingRecord {
    pub category: Category,
    pub option_id: Option<i64>,
    pub rating: f64,
    pub descriptor: String,
}

/// One evaluation row as read back for roll-ups, tagged with the grouping
/// attributes dashboards break down by.
#[derive(Debug, Clone)]
pub struct ScopedScore {
    pub student_id: String,
    pub student_name: String,
    pub course_code: String,
    pub month: Month,
    pub program: String,
    pub year_level: String,
    pub department: String,
    pub epgf_average: f64,
}

/// Month ordering within a school year that opens in August.
pub fn school_month_order(month: Month) -> u32 {
    (month.number_from_month() + 12 - Month::August.number_from_month()) % 12
}

pub fn parse_month(value: &str) -> Result<Month, String> {
    value
        .trim()
        .parse::<Month>()
        .map_err(|_| format!("unknown month '{value}'"))
}
