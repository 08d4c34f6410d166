use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Month, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::SubmissionError;
use crate::models::{
    parse_month, Category, CategorySelections, CourseMonth, EvaluationStatus, ScopedScore,
    Selection, StudentEvaluation,
};
use crate::payload::{self, DraftInput};
use crate::rollup::{EnrolledCounts, Grouping};
use crate::rubric::{CategoryOption, RubricCatalog, RubricVersion};
use crate::scoring::ScoringPolicy;
use crate::submission::{self, SubmissionAction, SubmissionState};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Filters shared by the roll-up queries. Only active enrollments count.
#[derive(Debug, Clone, Default)]
pub struct RollupScope {
    pub school_year: String,
    pub course_code: Option<String>,
    pub department: Option<String>,
    pub semester: Option<String>,
    pub month: Option<Month>,
}

impl RollupScope {
    pub fn label(&self) -> String {
        let mut parts = vec![self
            .course_code
            .clone()
            .or_else(|| self.department.clone())
            .unwrap_or_else(|| "all courses".to_string())];
        parts.push(self.school_year.clone());
        if let Some(semester) = &self.semester {
            parts.push(format!("{semester} semester"));
        }
        if let Some(month) = self.month {
            parts.push(month.name().to_string());
        }
        parts.join(", ")
    }
}

pub async fn seed(pool: &PgPool, policy: ScoringPolicy) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proficiency.rubric_versions (id, active)
        VALUES ('v3', TRUE)
        ON CONFLICT (id) DO UPDATE SET active = EXCLUDED.active
        "#,
    )
    .execute(pool)
    .await?;

    let levels = [
        (1.0, "Limited"),
        (2.0, "Developing"),
        (3.0, "Competent"),
        (4.0, "Native-like"),
    ];
    let mut option_id = 0i64;
    for category in Category::ALL {
        for (sort_order, (rating, level)) in levels.iter().enumerate() {
            option_id += 1;
            sqlx::query(
                r#"
                INSERT INTO proficiency.rubric_options
                (version_id, category, id, rating, descriptor, sort_order)
                VALUES ('v3', $1, $2, $3, $4, $5)
                ON CONFLICT (version_id, category, id) DO NOTHING
                "#,
            )
            .bind(category.as_str())
            .bind(option_id)
            .bind(*rating)
            .bind(format!("{level} {}", category.as_str().replace('-', " ")))
            .bind(sort_order as i32)
            .execute(pool)
            .await?;
        }
    }

    let students = [
        ("2025-0001", "Andrea Cruz", "BSEd English", "1", "Teacher Education"),
        ("2025-0002", "Miguel Santos", "BSEd English", "1", "Teacher Education"),
        ("2025-0003", "Lea Villanueva", "BS Nursing", "2", "Health Sciences"),
        ("2025-0004", "Paolo Reyes", "BS Nursing", "2", "Health Sciences"),
    ];
    for (id, name, program, year_level, department) in students {
        sqlx::query(
            r#"
            INSERT INTO proficiency.students (id, full_name, program, year_level, department)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, program = EXCLUDED.program,
                year_level = EXCLUDED.year_level, department = EXCLUDED.department
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(program)
        .bind(year_level)
        .bind(department)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO proficiency.enrollments (student_id, course_code, school_year, semester)
            VALUES ($1, 'PCOM101', '2025-2026', '1st')
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
    }

    let catalog = load_rubric_catalog(pool).await?;
    let samples = [
        ("2025-0001", [3, 3, 0, 0, 2, 2, 2, 2, 2]),
        ("2025-0002", [4, 4, 3, 4, 3, 3, 4, 4, 3]),
        ("2025-0003", [1, 2, 1, 1, 1, 2, 1, 1, 1]),
    ];
    for (student_id, levels) in samples {
        let mut selections = CategorySelections::new();
        for (category, level) in Category::ALL.into_iter().zip(levels) {
            if level > 0 {
                // Seeded ids run 1..=4 per category in catalog order.
                let id = (category.index() as i64) * 4 + level;
                selections.set(category, Selection::Option(id));
            }
        }
        let (draft, _) = payload::build_draft(
            DraftInput {
                student_id: student_id.to_string(),
                key: CourseMonth::new("PCOM101", "2025-2026", Month::August),
                semester: "1st".to_string(),
                task_title: "Oral recitation".to_string(),
                rubric_version: "v3".to_string(),
                comment: String::new(),
                selections,
            },
            &catalog,
            policy,
        );
        match save_evaluation(pool, draft).await {
            Ok(_) => {}
            // Re-seeding after the month was submitted leaves it as is.
            Err(err) if err.downcast_ref::<SubmissionError>().is_some() => {}
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

pub async fn load_rubric_catalog(pool: &PgPool) -> anyhow::Result<RubricCatalog> {
    let versions = sqlx::query("SELECT id, active FROM proficiency.rubric_versions")
        .fetch_all(pool)
        .await?;
    let option_rows = sqlx::query(
        r#"
        SELECT version_id, category, id, rating, descriptor
        FROM proficiency.rubric_options
        ORDER BY version_id, category, sort_order, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut options: HashMap<String, Vec<CategoryOption>> = HashMap::new();
    for row in option_rows {
        let version_id: String = row.get("version_id");
        let category_name: String = row.get("category");
        let category: Category = category_name
            .parse()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("rubric {version_id} has a bad category"))?;
        options.entry(version_id).or_default().push(CategoryOption {
            id: row.get("id"),
            category,
            rating: row.get("rating"),
            descriptor: row.get("descriptor"),
        });
    }

    let mut catalog = RubricCatalog::new();
    for row in versions {
        let id: String = row.get("id");
        let version_options = options.remove(&id).unwrap_or_default();
        let version = RubricVersion::new(id, row.get("active"), version_options)?;
        tracing::debug!(
            version = %version.id,
            options = version.option_count(),
            active = version.active,
            "rubric version loaded"
        );
        catalog.insert(version);
    }

    Ok(catalog)
}

/// Serializes save and finalize for one (course, month) until commit.
async fn lock_scope(conn: &mut PgConnection, key: &CourseMonth) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key.lock_key())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn submission_state(
    conn: &mut PgConnection,
    key: &CourseMonth,
) -> anyhow::Result<SubmissionState> {
    let row = sqlx::query(
        r#"
        SELECT submitted_at FROM proficiency.submissions
        WHERE course_code = $1 AND school_year = $2 AND month = $3
        "#,
    )
    .bind(&key.course_code)
    .bind(&key.school_year)
    .bind(key.month.name())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(match row {
        Some(row) => SubmissionState::Finalized {
            submitted_at: row.get("submitted_at"),
        },
        None => SubmissionState::Open,
    })
}

pub async fn submission_status(
    pool: &PgPool,
    key: &CourseMonth,
) -> anyhow::Result<SubmissionState> {
    let mut conn = pool.acquire().await?;
    submission_state(&mut *conn, key).await
}

/// Rows of one (course, month) without their per-category ratings.
async fn fetch_scope_rows(
    conn: &mut PgConnection,
    key: &CourseMonth,
) -> anyhow::Result<Vec<StudentEvaluation>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_id, semester, task_title, rubric_version, comment,
               pronunciation_average, grammar_average, fluency_average, epgf_average,
               proficiency_level, cefr_level, status, updated_at
        FROM proficiency.evaluations
        WHERE course_code = $1 AND school_year = $2 AND month = $3
        "#,
    )
    .bind(&key.course_code)
    .bind(&key.school_year)
    .bind(key.month.name())
    .fetch_all(&mut *conn)
    .await?;

    let mut evaluations = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.get("status");
        evaluations.push(StudentEvaluation {
            id: row.get("id"),
            student_id: row.get("student_id"),
            key: key.clone(),
            semester: row.get("semester"),
            task_title: row.get("task_title"),
            rubric_version: row.get("rubric_version"),
            comment: row.get("comment"),
            ratings: Vec::new(),
            pronunciation_average: row.get("pronunciation_average"),
            grammar_average: row.get("grammar_average"),
            fluency_average: row.get("fluency_average"),
            epgf_average: row.get("epgf_average"),
            proficiency_level: row.get("proficiency_level"),
            cefr_level: row.get("cefr_level"),
            status: EvaluationStatus::parse(&status),
            updated_at: row.get("updated_at"),
        });
    }
    Ok(evaluations)
}

/// Upserts a draft row. Rejected with [`SubmissionError`] once its
/// (course, month) is finalized.
pub async fn save_evaluation(pool: &PgPool, draft: StudentEvaluation) -> anyhow::Result<Uuid> {
    let key = draft.key.clone();
    let student_id = draft.student_id.clone();
    let task_title = draft.task_title.clone();

    let mut tx = pool.begin().await?;
    lock_scope(&mut *tx, &key).await?;
    submission::authorize(
        &key,
        submission_state(&mut *tx, &key).await?,
        SubmissionAction::Save,
    )?;

    let mut rows = fetch_scope_rows(&mut *tx, &key).await?;
    submission::save_draft(&mut rows, draft)?;
    let saved = rows
        .iter()
        .find(|row| row.student_id == student_id && row.task_title == task_title)
        .context("saved draft missing from scope rows")?;

    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO proficiency.evaluations
        (id, student_id, course_code, school_year, semester, month, task_title, rubric_version,
         comment, pronunciation_average, grammar_average, fluency_average, epgf_average,
         proficiency_level, cefr_level, status, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 'draft', $16)
        ON CONFLICT (student_id, course_code, school_year, month, task_title) DO UPDATE
        SET semester = EXCLUDED.semester,
            rubric_version = EXCLUDED.rubric_version,
            comment = EXCLUDED.comment,
            pronunciation_average = EXCLUDED.pronunciation_average,
            grammar_average = EXCLUDED.grammar_average,
            fluency_average = EXCLUDED.fluency_average,
            epgf_average = EXCLUDED.epgf_average,
            proficiency_level = EXCLUDED.proficiency_level,
            cefr_level = EXCLUDED.cefr_level,
            updated_at = EXCLUDED.updated_at
        WHERE proficiency.evaluations.status = 'draft'
        RETURNING id
        "#,
    )
    .bind(saved.id)
    .bind(&saved.student_id)
    .bind(&key.course_code)
    .bind(&key.school_year)
    .bind(&saved.semester)
    .bind(key.month.name())
    .bind(&saved.task_title)
    .bind(&saved.rubric_version)
    .bind(&saved.comment)
    .bind(saved.pronunciation_average)
    .bind(saved.grammar_average)
    .bind(saved.fluency_average)
    .bind(saved.epgf_average)
    .bind(&saved.proficiency_level)
    .bind(&saved.cefr_level)
    .bind(saved.updated_at)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| row.get("id"))
    .ok_or_else(|| SubmissionError::EditAfterFinalize(key.clone()))?;

    sqlx::query("DELETE FROM proficiency.evaluation_ratings WHERE evaluation_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    for rating in &saved.ratings {
        sqlx::query(
            r#"
            INSERT INTO proficiency.evaluation_ratings
            (evaluation_id, category, option_id, rating, descriptor)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(rating.category.as_str())
        .bind(rating.option_id)
        .bind(rating.rating)
        .bind(&rating.descriptor)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(%key, student_id = %student_id, task = %task_title, "draft saved");
    Ok(id)
}

/// Finalizes a (course, month). The submissions primary key guarantees only
/// one concurrent caller wins; later calls get [`SubmissionError::AlreadyFinalized`].
pub async fn finalize_month(
    pool: &PgPool,
    key: &CourseMonth,
    submitted_by: &str,
) -> anyhow::Result<usize> {
    let now: DateTime<Utc> = Utc::now();
    let mut tx = pool.begin().await?;
    lock_scope(&mut *tx, key).await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO proficiency.submissions
        (course_code, school_year, month, submitted_by, submitted_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (course_code, school_year, month) DO NOTHING
        "#,
    )
    .bind(&key.course_code)
    .bind(&key.school_year)
    .bind(key.month.name())
    .bind(submitted_by)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        tracing::warn!(%key, "finalize rejected, month already submitted");
        return Err(SubmissionError::AlreadyFinalized(key.clone()).into());
    }

    let mut rows = fetch_scope_rows(&mut *tx, key).await?;
    let finalized = submission::finalize(key, &mut rows, now)?;
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    sqlx::query(
        r#"
        UPDATE proficiency.evaluations
        SET status = 'submitted', updated_at = $2
        WHERE id = ANY($1)
        "#,
    )
    .bind(&ids)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(%key, rows = finalized, submitted_by, "month finalized");
    Ok(finalized)
}

pub async fn fetch_scope_scores(
    pool: &PgPool,
    scope: &RollupScope,
) -> anyhow::Result<Vec<ScopedScore>> {
    let rows = sqlx::query(
        r#"
        SELECT e.student_id, s.full_name, e.course_code, e.month,
               s.program, s.year_level, s.department, e.epgf_average
        FROM proficiency.evaluations e
        JOIN proficiency.students s ON s.id = e.student_id
        JOIN proficiency.enrollments en
          ON en.student_id = e.student_id
         AND en.course_code = e.course_code
         AND en.school_year = e.school_year
         AND en.semester = e.semester
        WHERE e.school_year = $1
          AND en.status = 'active'
          AND ($2::text IS NULL OR e.course_code = $2)
          AND ($3::text IS NULL OR s.department = $3)
          AND ($4::text IS NULL OR e.semester = $4)
          AND ($5::text IS NULL OR e.month = $5)
        "#,
    )
    .bind(&scope.school_year)
    .bind(scope.course_code.as_deref())
    .bind(scope.department.as_deref())
    .bind(scope.semester.as_deref())
    .bind(scope.month.map(|month| month.name()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(scoped_score_from_row).collect()
}

fn scoped_score_from_row(row: sqlx::postgres::PgRow) -> anyhow::Result<ScopedScore> {
    let month: String = row.get("month");
    Ok(ScopedScore {
        student_id: row.get("student_id"),
        student_name: row.get("full_name"),
        course_code: row.get("course_code"),
        month: parse_month(&month).map_err(anyhow::Error::msg)?,
        program: row.get("program"),
        year_level: row.get("year_level"),
        department: row.get("department"),
        epgf_average: row.get("epgf_average"),
    })
}

pub async fn fetch_enrolled_counts(
    pool: &PgPool,
    scope: &RollupScope,
    grouping: Grouping,
) -> anyhow::Result<EnrolledCounts> {
    let group_column = match grouping {
        Grouping::Month => "'all'",
        Grouping::Course => "en.course_code",
        Grouping::Program => "s.program",
        Grouping::YearLevel => "s.year_level",
        Grouping::Department => "s.department",
    };
    let query = format!(
        "SELECT {group_column} AS group_key, COUNT(DISTINCT en.student_id) AS enrolled \
         FROM proficiency.enrollments en \
         JOIN proficiency.students s ON s.id = en.student_id \
         WHERE en.status = 'active' AND en.school_year = $1 \
           AND ($2::text IS NULL OR en.course_code = $2) \
           AND ($3::text IS NULL OR s.department = $3) \
           AND ($4::text IS NULL OR en.semester = $4) \
         GROUP BY 1"
    );

    let rows = sqlx::query(&query)
        .bind(&scope.school_year)
        .bind(scope.course_code.as_deref())
        .bind(scope.department.as_deref())
        .bind(scope.semester.as_deref())
        .fetch_all(pool)
        .await?;

    let counts: HashMap<String, usize> = rows
        .into_iter()
        .map(|row| {
            let enrolled: i64 = row.get("enrolled");
            (row.get::<String, _>("group_key"), enrolled.max(0) as usize)
        })
        .collect();

    Ok(match grouping {
        Grouping::Month => EnrolledCounts::Uniform(counts.values().sum()),
        _ => EnrolledCounts::ByGroup(counts),
    })
}

pub async fn fetch_student_trend(
    pool: &PgPool,
    student_id: &str,
    course_code: &str,
    school_year: &str,
) -> anyhow::Result<Vec<ScopedScore>> {
    let rows = sqlx::query(
        r#"
        SELECT e.student_id, s.full_name, e.course_code, e.month,
               s.program, s.year_level, s.department, e.epgf_average
        FROM proficiency.evaluations e
        JOIN proficiency.students s ON s.id = e.student_id
        WHERE e.student_id = $1 AND e.course_code = $2 AND e.school_year = $3
        "#,
    )
    .bind(student_id)
    .bind(course_code)
    .bind(school_year)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(scoped_score_from_row).collect()
}
