use std::collections::{BTreeMap, HashMap};

use chrono::Month;
use serde::Serialize;

use crate::cefr::{self, CefrFallback, CefrLevel};
use crate::models::{school_month_order, ScopedScore};
use crate::scoring::{positive_mean, round2};
use crate::tier::{self, ProficiencyTier};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupStats {
    pub enrolled: usize,
    pub evaluated: usize,
    /// Fraction in [0, 1].
    pub completion_rate: f64,
    pub epgf_average: f64,
    pub tier_counts: BTreeMap<ProficiencyTier, usize>,
    pub cefr_counts: BTreeMap<CefrLevel, usize>,
}

impl RollupStats {
    pub fn completion_percent(&self) -> f64 {
        round2(self.completion_rate * 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Month,
    Course,
    Program,
    YearLevel,
    Department,
}

impl Grouping {
    fn key(self, row: &ScopedScore) -> String {
        match self {
            Grouping::Month => row.month.name().to_string(),
            Grouping::Course => row.course_code.clone(),
            Grouping::Program => row.program.clone(),
            Grouping::YearLevel => row.year_level.clone(),
            Grouping::Department => row.department.clone(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Grouping::Month => "month",
            Grouping::Course => "course",
            Grouping::Program => "program",
            Grouping::YearLevel => "year level",
            Grouping::Department => "department",
        }
    }
}

/// Roster sizes supplied by the enrollment records.
#[derive(Debug, Clone)]
pub enum EnrolledCounts {
    /// Every group shares one roster, e.g. the months of a single course.
    Uniform(usize),
    ByGroup(HashMap<String, usize>),
}

impl EnrolledCounts {
    fn for_group(&self, key: &str) -> usize {
        match self {
            EnrolledCounts::Uniform(count) => *count,
            EnrolledCounts::ByGroup(counts) => counts.get(key).copied().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub group: String,
    #[serde(flatten)]
    pub stats: RollupStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub month: String,
    pub epgf_average: f64,
    pub tier: ProficiencyTier,
}

/// One composite per student. Task rows within a month, then months within
/// the scope, are combined with the zero-exclusive mean.
pub fn student_composites(rows: &[ScopedScore]) -> BTreeMap<String, f64> {
    let mut by_month: BTreeMap<(&str, u32), Vec<f64>> = BTreeMap::new();
    for row in rows {
        by_month
            .entry((row.student_id.as_str(), row.month.number_from_month()))
            .or_default()
            .push(row.epgf_average);
    }

    let mut by_student: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for ((student_id, _), values) in by_month {
        by_student
            .entry(student_id.to_string())
            .or_default()
            .push(positive_mean(values));
    }

    by_student
        .into_iter()
        .map(|(student_id, values)| (student_id, positive_mean(values)))
        .collect()
}

/// Reduces per-student composites. Zeros stay in the average: they are
/// students not yet evaluated. Enrolled students without any composite are
/// counted as zeros as well.
pub fn summarize(composites: &[f64], enrolled: usize, fallback: CefrFallback) -> RollupStats {
    let mut tier_counts = BTreeMap::new();
    let mut cefr_counts = BTreeMap::new();
    let mut evaluated = 0usize;
    let mut total = 0.0;

    for composite in composites {
        total += composite;
        if *composite > 0.0 {
            evaluated += 1;
            *tier_counts.entry(tier::classify(*composite)).or_insert(0) += 1;
            *cefr_counts
                .entry(cefr::map_level(*composite, fallback))
                .or_insert(0) += 1;
        }
    }

    let population = enrolled.max(composites.len());
    let epgf_average = if population == 0 {
        0.0
    } else {
        total / population as f64
    };
    let completion_rate = if enrolled == 0 {
        0.0
    } else {
        (evaluated as f64 / enrolled as f64).min(1.0)
    };

    RollupStats {
        enrolled,
        evaluated,
        completion_rate,
        epgf_average,
        tier_counts,
        cefr_counts,
    }
}

pub fn summarize_scope(
    rows: &[ScopedScore],
    enrolled: usize,
    fallback: CefrFallback,
) -> RollupStats {
    let composites: Vec<f64> = student_composites(rows).into_values().collect();
    summarize(&composites, enrolled, fallback)
}

/// Same reduction keyed by one grouping attribute. Months come out in
/// school-year order, other groupings alphabetically.
pub fn breakdown(
    rows: &[ScopedScore],
    grouping: Grouping,
    enrolled: &EnrolledCounts,
    fallback: CefrFallback,
) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<String, Vec<ScopedScore>> = BTreeMap::new();
    for row in rows {
        groups.entry(grouping.key(row)).or_default().push(row.clone());
    }

    if let EnrolledCounts::ByGroup(counts) = enrolled {
        for group in counts.keys() {
            groups.entry(group.clone()).or_default();
        }
    }

    let mut summaries: Vec<GroupSummary> = groups
        .into_iter()
        .map(|(group, members)| {
            let stats = summarize_scope(&members, enrolled.for_group(&group), fallback);
            GroupSummary { group, stats }
        })
        .collect();

    if grouping == Grouping::Month {
        summaries.sort_by_key(|summary| {
            summary
                .group
                .parse::<Month>()
                .map(school_month_order)
                .unwrap_or(u32::MAX)
        });
    }

    summaries
}

/// Monthly composite series for one student's rows.
pub fn student_trend(rows: &[ScopedScore]) -> Vec<TrendPoint> {
    let mut by_month: BTreeMap<u32, (Month, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        by_month
            .entry(school_month_order(row.month))
            .or_insert_with(|| (row.month, Vec::new()))
            .1
            .push(row.epgf_average);
    }

    by_month
        .into_values()
        .map(|(month, values)| {
            let epgf_average = positive_mean(values);
            TrendPoint {
                month: month.name().to_string(),
                epgf_average,
                tier: tier::classify(epgf_average),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(student_id: &str, month: Month, program: &str, epgf: f64) -> ScopedScore {
        ScopedScore {
            student_id: student_id.to_string(),
            student_name: format!("Student {student_id}"),
            course_code: "ENG101".to_string(),
            month,
            program: program.to_string(),
            year_level: "1".to_string(),
            department: "Languages".to_string(),
            epgf_average: epgf,
        }
    }

    #[test]
    fn august_scope_counts_unevaluated_students_as_zero() {
        let composites = [2.0, 2.5, 3.0, 1.5, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0];
        let stats = summarize(&composites, 10, CefrFallback::Beginner);
        assert_eq!(stats.evaluated, 6);
        assert_eq!(stats.completion_percent(), 60.0);
        assert!((stats.epgf_average - 14.0 / 10.0).abs() < 1e-9);
    }

    #[test]
    fn missing_roster_rows_are_zeros() {
        let stats = summarize(&[2.0, 4.0], 4, CefrFallback::Beginner);
        assert_eq!(stats.epgf_average, 1.5);
        assert_eq!(stats.completion_rate, 0.5);
    }

    #[test]
    fn empty_scope_is_all_zero() {
        let stats = summarize(&[], 0, CefrFallback::Beginner);
        assert_eq!(stats.epgf_average, 0.0);
        assert_eq!(stats.completion_rate, 0.0);
        assert!(stats.tier_counts.is_empty());
    }

    #[test]
    fn distributions_count_only_evaluated_students() {
        let stats = summarize(&[2.0, 2.0, 0.9, 0.0], 4, CefrFallback::Beginner);
        assert_eq!(stats.tier_counts.get(&ProficiencyTier::Proficient), Some(&2));
        assert_eq!(stats.tier_counts.get(&ProficiencyTier::Emerging), Some(&1));
        assert_eq!(stats.cefr_counts.get(&CefrLevel::B1), Some(&2));
        assert_eq!(stats.cefr_counts.get(&CefrLevel::A1), Some(&1));
        assert_eq!(stats.tier_counts.values().sum::<usize>(), 3);
    }

    #[test]
    fn distributions_classify_unrounded_composites() {
        let stats = summarize(&[0.754, 0.996], 2, CefrFallback::Unknown);
        assert_eq!(stats.tier_counts.get(&ProficiencyTier::Emerging), Some(&2));
        assert_eq!(stats.cefr_counts.get(&CefrLevel::Unknown), Some(&2));

        let trend = student_trend(&[row("s1", Month::August, "BSEd", 0.754)]);
        assert_eq!(trend[0].tier, ProficiencyTier::Emerging);
    }

    #[test]
    fn student_composite_skips_unscored_tasks_and_months() {
        let rows = vec![
            row("s1", Month::August, "BSEd", 3.0),
            row("s1", Month::August, "BSEd", 0.0),
            row("s1", Month::September, "BSEd", 2.0),
            row("s1", Month::October, "BSEd", 0.0),
            row("s2", Month::August, "BSEd", 0.0),
        ];
        let composites = student_composites(&rows);
        assert_eq!(composites.get("s1"), Some(&2.5));
        assert_eq!(composites.get("s2"), Some(&0.0));
    }

    #[test]
    fn monthly_breakdown_follows_school_year() {
        let rows = vec![
            row("s1", Month::January, "BSEd", 2.0),
            row("s1", Month::August, "BSEd", 1.0),
            row("s2", Month::August, "BSEd", 3.0),
            row("s1", Month::October, "BSEd", 2.5),
        ];
        let series = breakdown(
            &rows,
            Grouping::Month,
            &EnrolledCounts::Uniform(2),
            CefrFallback::Beginner,
        );
        let months: Vec<&str> = series.iter().map(|s| s.group.as_str()).collect();
        assert_eq!(months, ["August", "October", "January"]);
        assert_eq!(series[0].stats.epgf_average, 2.0);
        assert_eq!(series[1].stats.completion_rate, 0.5);
    }

    #[test]
    fn program_breakdown_uses_group_rosters() {
        let rows = vec![
            row("s1", Month::August, "BSEd", 2.0),
            row("s2", Month::August, "BSN", 3.0),
        ];
        let enrolled = EnrolledCounts::ByGroup(HashMap::from([
            ("BSEd".to_string(), 2),
            ("BSN".to_string(), 1),
            ("BSIT".to_string(), 3),
        ]));
        let groups = breakdown(&rows, Grouping::Program, &enrolled, CefrFallback::Beginner);
        assert_eq!(groups.len(), 3);
        let bsed = &groups[0];
        assert_eq!(bsed.group, "BSEd");
        assert_eq!(bsed.stats.epgf_average, 1.0);
        let bsit = &groups[1];
        assert_eq!(bsit.group, "BSIT");
        assert_eq!(bsit.stats.evaluated, 0);
        assert_eq!(groups[2].stats.completion_rate, 1.0);
    }

    #[test]
    fn trend_orders_months_and_labels_tiers() {
        let rows = vec![
            row("s1", Month::September, "BSEd", 1.2),
            row("s1", Month::August, "BSEd", 0.7),
            row("s1", Month::September, "BSEd", 1.4),
        ];
        let trend = student_trend(&rows);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].month, "August");
        assert_eq!(trend[0].tier, ProficiencyTier::HighAcquisition);
        assert!((trend[1].epgf_average - 1.3).abs() < 1e-9);
        assert_eq!(trend[1].tier, ProficiencyTier::HighDeveloping);
    }

    proptest! {
        #[test]
        fn average_never_drops_when_one_score_rises(
            scores in proptest::collection::vec(0.0f64..=4.0, 1..20),
            pick in any::<prop::sample::Index>(),
            bump in 0.0f64..=4.0,
            extra_roster in 0usize..5,
        ) {
            let enrolled = scores.len() + extra_roster;
            let before = summarize(&scores, enrolled, CefrFallback::Beginner);
            let mut raised = scores.clone();
            let slot = pick.index(raised.len());
            raised[slot] = (raised[slot] + bump).min(4.0);
            let after = summarize(&raised, enrolled, CefrFallback::Beginner);
            prop_assert!(after.epgf_average + 1e-12 >= before.epgf_average);
            prop_assert!(after.completion_rate >= before.completion_rate);
        }
    }
}
