use std::fmt::Write;

use serde::Serialize;

use crate::rollup::{GroupSummary, Grouping, RollupStats, TrendPoint};
use crate::scoring::round2;
use crate::tier::ProficiencyTier;

fn write_distribution(output: &mut String, stats: &RollupStats) {
    if stats.tier_counts.is_empty() {
        let _ = writeln!(output, "No evaluated students in this scope.");
        return;
    }

    for tier in ProficiencyTier::ladder() {
        if let Some(count) = stats.tier_counts.get(&tier) {
            let _ = writeln!(
                output,
                "- {} ({}): {} students",
                tier.label(),
                tier.color().as_str(),
                count
            );
        }
    }

    let cefr: Vec<String> = stats
        .cefr_counts
        .iter()
        .map(|(level, count)| format!("{} {}", level.code(), count))
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "CEFR spread: {}", cefr.join(", "));
}

pub fn build_report(
    scope_label: &str,
    overall: &RollupStats,
    monthly: &[GroupSummary],
    grouping: Grouping,
    groups: &[GroupSummary],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Proficiency Roll-up Report");
    let _ = writeln!(output, "Generated for {scope_label}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(
        output,
        "- Completion: {:.2}% ({} of {} enrolled students evaluated)",
        overall.completion_percent(),
        overall.evaluated,
        overall.enrolled
    );
    let _ = writeln!(output, "- EPGF average: {:.2}", overall.epgf_average);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Proficiency Tiers");
    write_distribution(&mut output, overall);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Progress");
    if monthly.is_empty() {
        let _ = writeln!(output, "No evaluations recorded for this scope.");
    } else {
        for summary in monthly {
            let _ = writeln!(
                output,
                "- {}: EPGF {:.2}, completion {:.2}%",
                summary.group,
                summary.stats.epgf_average,
                summary.stats.completion_percent()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## By {}", grouping.label());
    if groups.is_empty() {
        let _ = writeln!(output, "No groups in this scope.");
    } else {
        for summary in groups {
            let _ = writeln!(
                output,
                "- {}: EPGF {:.2}, completion {:.2}% ({}/{})",
                summary.group,
                summary.stats.epgf_average,
                summary.stats.completion_percent(),
                summary.stats.evaluated,
                summary.stats.enrolled
            );
        }
    }

    output
}

#[derive(Debug, Serialize)]
struct SeriesRecord<'a> {
    group: &'a str,
    enrolled: usize,
    evaluated: usize,
    /// Same 0-1 fraction as the JSON series.
    completion_rate: f64,
    epgf_average: f64,
}

/// Dashboard series, one CSV line per group.
pub fn write_series_csv<W: std::io::Write>(
    writer: W,
    summaries: &[GroupSummary],
) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for summary in summaries {
        csv.serialize(SeriesRecord {
            group: &summary.group,
            enrolled: summary.stats.enrolled,
            evaluated: summary.stats.evaluated,
            completion_rate: summary.stats.completion_rate,
            epgf_average: round2(summary.stats.epgf_average),
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn build_trend(student_label: &str, points: &[TrendPoint]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Monthly EPGF for {student_label}:");
    if points.is_empty() {
        let _ = writeln!(output, "No evaluations recorded.");
    }
    for point in points {
        let _ = writeln!(
            output,
            "- {}: {:.2} ({})",
            point.month,
            point.epgf_average,
            point.tier.label()
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cefr::CefrFallback;
    use crate::rollup::summarize;

    fn group(name: &str, composites: &[f64], enrolled: usize) -> GroupSummary {
        GroupSummary {
            group: name.to_string(),
            stats: summarize(composites, enrolled, CefrFallback::Beginner),
        }
    }

    #[test]
    fn report_lists_overview_tiers_and_months() {
        let overall = summarize(&[2.0, 3.0, 0.0, 0.0], 4, CefrFallback::Beginner);
        let monthly = vec![group("August", &[2.0, 3.0], 4)];
        let programs = vec![group("BSEd English", &[2.0, 3.0], 2)];
        let report = build_report(
            "PCOM101, 2025-2026",
            &overall,
            &monthly,
            Grouping::Program,
            &programs,
        );

        assert!(report.contains("Generated for PCOM101, 2025-2026"));
        assert!(report.contains("Completion: 50.00% (2 of 4 enrolled students evaluated)"));
        assert!(report.contains("EPGF average: 1.25"));
        assert!(report.contains("- Proficient (green): 1 students"));
        assert!(report.contains("- High Advanced (dark-blue): 1 students"));
        assert!(report.contains("- August: EPGF 1.25, completion 50.00%"));
        assert!(report.contains("## By program"));
        assert!(report.contains("- BSEd English: EPGF 2.50, completion 100.00% (2/2)"));
    }

    #[test]
    fn empty_scope_reports_placeholders() {
        let overall = summarize(&[], 0, CefrFallback::Beginner);
        let report = build_report("ENG101", &overall, &[], Grouping::Department, &[]);
        assert!(report.contains("No evaluated students in this scope."));
        assert!(report.contains("No evaluations recorded for this scope."));
    }

    #[test]
    fn csv_series_reports_completion_as_a_fraction() {
        let mut buffer = Vec::new();
        write_series_csv(&mut buffer, &[group("August", &[2.0, 1.0, 0.0], 4)])
            .expect("write csv");
        let text = String::from_utf8(buffer).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("group,enrolled,evaluated,completion_rate,epgf_average")
        );
        assert_eq!(lines.next(), Some("August,4,2,0.5,0.75"));
    }
}
