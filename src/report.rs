use std::fmt::Write;

use crate::models::{ClassAverage, SchoolAnalytics, ScoresDistribution};

pub fn distribution_totals(classes: &[ClassAverage]) -> ScoresDistribution {
    classes
        .iter()
        .fold(ScoresDistribution::default(), |mut acc, class| {
            let d = &class.scores_distribution;
            acc.excellent += d.excellent;
            acc.good += d.good;
            acc.satisfactory += d.satisfactory;
            acc.needs_improvement += d.needs_improvement;
            acc
        })
}

/// Classrooms with at least one record below 70%, ordered by the share of such
/// records, highest first.
pub fn classrooms_needing_support(classes: &[ClassAverage]) -> Vec<(&ClassAverage, f64)> {
    let mut flagged: Vec<(&ClassAverage, f64)> = classes
        .iter()
        .filter(|c| c.scores_distribution.needs_improvement > 0)
        .map(|c| {
            let total = c.scores_distribution.total().max(1) as f64;
            (c, c.scores_distribution.needs_improvement as f64 / total)
        })
        .collect();

    flagged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    flagged
}

pub fn build_report(
    scope: Option<&str>,
    classes: &[ClassAverage],
    schools: &[SchoolAnalytics],
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all schools");

    let _ = writeln!(output, "# School Progress Analytics");
    let last_updated = schools
        .iter()
        .map(|s| s.last_updated)
        .chain(classes.iter().map(|c| c.last_updated))
        .max();
    match last_updated {
        Some(at) => {
            let _ = writeln!(
                output,
                "Generated for {} (calculated {})",
                scope_label,
                at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        None => {
            let _ = writeln!(output, "Generated for {}", scope_label);
        }
    }

    if schools.is_empty() && classes.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "No analytics stored yet. Run `progress-analytics calculate` first."
        );
        return output;
    }

    for school in schools {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", school.school_name);
        let _ = writeln!(
            output,
            "- Overall average {:.2} across {} students, {} teachers, {} classrooms",
            school.overall_average,
            school.total_students,
            school.total_teachers,
            school.total_classrooms
        );

        if !school.subject_averages.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "### Subjects");
            for subject in &school.subject_averages {
                let _ = writeln!(
                    output,
                    "- {}: {:.2} ({} records)",
                    subject.subject, subject.average, subject.student_count
                );
            }
        }

        if !school.grade_averages.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "### Grades");
            for grade in &school.grade_averages {
                let _ = writeln!(
                    output,
                    "- {}: {:.2} ({} records)",
                    grade.grade, grade.average, grade.student_count
                );
            }
        }
    }

    let mut ranked: Vec<&ClassAverage> = classes.iter().collect();
    ranked.sort_by(|a, b| {
        b.average_score
            .partial_cmp(&a.average_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Classroom Averages");
    if ranked.is_empty() {
        let _ = writeln!(output, "No classroom averages stored.");
    } else {
        for class in &ranked {
            let _ = writeln!(
                output,
                "- {} ({}, {}) average {:.2} across {} records",
                class.classroom_name,
                class.subject,
                class.teacher_name,
                class.average_score,
                class.total_students
            );
        }
    }

    let totals = distribution_totals(classes);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Bands");
    let _ = writeln!(output, "- Excellent (90+): {}", totals.excellent);
    let _ = writeln!(output, "- Good (80-89): {}", totals.good);
    let _ = writeln!(output, "- Satisfactory (70-79): {}", totals.satisfactory);
    let _ = writeln!(
        output,
        "- Needs improvement (<70): {}",
        totals.needs_improvement
    );

    let flagged = classrooms_needing_support(classes);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Classrooms Needing Support");
    if flagged.is_empty() {
        let _ = writeln!(output, "Every classroom is at or above 70%.");
    } else {
        for (class, share) in flagged.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}): {:.0}% of records below 70",
                class.classroom_name,
                class.teacher_name,
                share * 100.0
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn class(name: &str, average: f64, distribution: ScoresDistribution) -> ClassAverage {
        ClassAverage {
            classroom_id: Uuid::new_v4(),
            classroom_name: name.to_string(),
            school_id: Uuid::from_u128(1),
            school_name: "Northfield High".to_string(),
            teacher_id: Uuid::from_u128(2),
            teacher_name: "Dana Ortiz".to_string(),
            subject: "Math".to_string(),
            average_score: average,
            total_students: distribution.total(),
            scores_distribution: distribution,
            last_updated: Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        }
    }

    fn distribution(excellent: u32, good: u32, satisfactory: u32, low: u32) -> ScoresDistribution {
        ScoresDistribution {
            excellent,
            good,
            satisfactory,
            needs_improvement: low,
        }
    }

    #[test]
    fn totals_sum_every_band() {
        let classes = vec![
            class("Algebra", 88.5, distribution(1, 1, 0, 0)),
            class("Geometry", 61.0, distribution(0, 0, 1, 3)),
        ];
        assert_eq!(distribution_totals(&classes), distribution(1, 1, 1, 3));
    }

    #[test]
    fn support_list_orders_by_low_share() {
        let classes = vec![
            class("Algebra", 75.0, distribution(1, 0, 2, 1)),
            class("Geometry", 61.0, distribution(0, 0, 1, 3)),
            class("Biology", 93.0, distribution(2, 0, 0, 0)),
        ];

        let flagged = classrooms_needing_support(&classes);

        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].0.classroom_name, "Geometry");
        assert!((flagged[0].1 - 0.75).abs() < 1e-9);
        assert_eq!(flagged[1].0.classroom_name, "Algebra");
    }

    #[test]
    fn report_ranks_classrooms_by_average() {
        let classes = vec![
            class("Geometry", 61.0, distribution(0, 0, 1, 3)),
            class("Algebra", 88.5, distribution(1, 1, 0, 0)),
        ];

        let report = build_report(Some("Northfield High"), &classes, &[]);

        assert!(report.contains("Generated for Northfield High (calculated 2026-03-10 12:00 UTC)"));
        let algebra = report.find("- Algebra").unwrap();
        let geometry = report.find("- Geometry").unwrap();
        assert!(algebra < geometry);
        assert!(report.contains("- Needs improvement (<70): 3"));
        assert!(report.contains("- Geometry (Dana Ortiz): 75% of records below 70"));
    }

    #[test]
    fn empty_store_gives_hint() {
        let report = build_report(None, &[], &[]);
        assert!(report.contains("Generated for all schools"));
        assert!(report.contains("No analytics stored yet"));
    }
}
