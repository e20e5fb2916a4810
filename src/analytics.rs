use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AnalyticsSnapshot, ClassAverage, GradeAverage, ProgressRecord, SchoolAnalytics,
    ScoresDistribution, SubjectAverage,
};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Excellent,
    Good,
    Satisfactory,
    NeedsImprovement,
}

pub fn score_band(percentage: f64) -> ScoreBand {
    if percentage >= 90.0 {
        ScoreBand::Excellent
    } else if percentage >= 80.0 {
        ScoreBand::Good
    } else if percentage >= 70.0 {
        ScoreBand::Satisfactory
    } else {
        ScoreBand::NeedsImprovement
    }
}

/// Normalises a score to a 0-100 scale. A non-positive `max_score` leaves the
/// raw score untouched.
pub fn percentage(score: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        score * 100.0 / max_score
    } else {
        score
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ScoresDistribution {
    fn record(&mut self, band: ScoreBand) {
        match band {
            ScoreBand::Excellent => self.excellent += 1,
            ScoreBand::Good => self.good += 1,
            ScoreBand::Satisfactory => self.satisfactory += 1,
            ScoreBand::NeedsImprovement => self.needs_improvement += 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    total: f64,
    count: u32,
}

impl Tally {
    fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            round2(self.total / self.count as f64)
        }
    }
}

/// Keyed tallies that remember first-seen order.
#[derive(Debug, Default)]
struct OrderedTallies {
    index: HashMap<String, usize>,
    entries: Vec<(String, Tally)>,
}

impl OrderedTallies {
    fn add(&mut self, key: &str, value: f64) {
        let slot = match self.index.get(key) {
            Some(slot) => *slot,
            None => {
                self.entries.push((key.to_string(), Tally::default()));
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        self.entries[slot].1.add(value);
    }
}

struct ClassAccumulator {
    average: ClassAverage,
    score_total: f64,
}

struct SchoolAccumulator {
    school_id: Uuid,
    school_name: String,
    students: HashSet<Uuid>,
    teachers: HashSet<Uuid>,
    classrooms: HashSet<Uuid>,
    overall: Tally,
    subjects: OrderedTallies,
    grades: OrderedTallies,
}

impl SchoolAccumulator {
    fn finish(self, now: DateTime<Utc>) -> SchoolAnalytics {
        SchoolAnalytics {
            school_id: self.school_id,
            school_name: self.school_name,
            total_students: self.students.len() as u32,
            total_teachers: self.teachers.len() as u32,
            total_classrooms: self.classrooms.len() as u32,
            overall_average: self.overall.average(),
            subject_averages: self
                .subjects
                .entries
                .into_iter()
                .map(|(subject, tally)| SubjectAverage {
                    subject,
                    average: tally.average(),
                    student_count: tally.count,
                })
                .collect(),
            grade_averages: self
                .grades
                .entries
                .into_iter()
                .map(|(grade, tally)| GradeAverage {
                    grade,
                    average: tally.average(),
                    student_count: tally.count,
                })
                .collect(),
            last_updated: now,
        }
    }
}

/// Folds progress records into per-classroom averages and per-school rollups
/// in a single pass. Records without a resolvable classroom are skipped.
/// Output preserves first-seen order of classrooms and schools.
pub fn aggregate(records: &[ProgressRecord], now: DateTime<Utc>) -> AnalyticsSnapshot {
    let mut class_index: HashMap<Uuid, usize> = HashMap::new();
    let mut classes: Vec<ClassAccumulator> = Vec::new();
    let mut school_index: HashMap<Uuid, usize> = HashMap::new();
    let mut schools: Vec<SchoolAccumulator> = Vec::new();

    for record in records {
        let Some(classroom) = record.classroom.as_ref() else {
            debug!(
                progress_id = %record.id,
                classroom_id = ?record.classroom_id,
                school_id = %record.school_id,
                "Skipping progress record without a classroom"
            );
            continue;
        };

        let score = percentage(record.score, record.max_score);
        let subject = classroom
            .subject
            .clone()
            .unwrap_or_else(|| record.subject.clone());
        let school_name = classroom
            .school_name
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string());

        let slot = *class_index.entry(classroom.id).or_insert_with(|| {
            classes.push(ClassAccumulator {
                average: ClassAverage {
                    classroom_id: classroom.id,
                    classroom_name: classroom.name.clone(),
                    school_id: classroom.school_id,
                    school_name: school_name.clone(),
                    teacher_id: classroom.teacher_id,
                    teacher_name: classroom
                        .teacher_name
                        .clone()
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                    subject: subject.clone(),
                    average_score: 0.0,
                    total_students: 0,
                    scores_distribution: ScoresDistribution::default(),
                    last_updated: now,
                },
                score_total: 0.0,
            });
            classes.len() - 1
        });
        let class = &mut classes[slot];
        class.average.total_students += 1;
        class.score_total += score;
        class.average.scores_distribution.record(score_band(score));

        let slot = *school_index.entry(classroom.school_id).or_insert_with(|| {
            schools.push(SchoolAccumulator {
                school_id: classroom.school_id,
                school_name,
                students: HashSet::new(),
                teachers: HashSet::new(),
                classrooms: HashSet::new(),
                overall: Tally::default(),
                subjects: OrderedTallies::default(),
                grades: OrderedTallies::default(),
            });
            schools.len() - 1
        });
        let school = &mut schools[slot];
        school.students.insert(record.student_id);
        school.teachers.insert(classroom.teacher_id);
        school.classrooms.insert(classroom.id);
        school.overall.add(score);
        school.subjects.add(&subject, score);
        if let Some(grade) = record.student_grade.as_deref().filter(|g| !g.is_empty()) {
            school.grades.add(grade, score);
        }
    }

    let class_averages = classes
        .into_iter()
        .map(|acc| {
            let mut average = acc.average;
            if average.total_students > 0 {
                average.average_score = round2(acc.score_total / average.total_students as f64);
            }
            average
        })
        .collect();

    AnalyticsSnapshot {
        class_averages,
        school_analytics: schools.into_iter().map(|s| s.finish(now)).collect(),
        total_records: records.len(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ClassroomRef;
    use chrono::TimeZone;

    pub(crate) fn classroom(id: Uuid, school_id: Uuid, subject: &str) -> ClassroomRef {
        ClassroomRef {
            id,
            name: format!("Room {}", &id.to_string()[..4]),
            subject: Some(subject.to_string()),
            school_id,
            school_name: Some("Northfield High".to_string()),
            teacher_id: Uuid::from_u128(id.as_u128() ^ 0xff),
            teacher_name: Some("Dana Ortiz".to_string()),
        }
    }

    pub(crate) fn record(
        student_id: Uuid,
        classroom: Option<ClassroomRef>,
        score: f64,
        grade: Option<&str>,
    ) -> ProgressRecord {
        let school_id = classroom
            .as_ref()
            .map(|c| c.school_id)
            .unwrap_or_else(Uuid::new_v4);
        ProgressRecord {
            id: Uuid::new_v4(),
            student_id,
            classroom_id: classroom.as_ref().map(|c| c.id),
            school_id,
            subject: classroom
                .as_ref()
                .and_then(|c| c.subject.clone())
                .unwrap_or_else(|| "General".to_string()),
            score,
            max_score: 100.0,
            created_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            classroom,
            student_grade: grade.map(str::to_string),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn worked_example_matches_expected_averages() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let c2 = classroom(Uuid::from_u128(20), school, "Science");
        let records = vec![
            record(Uuid::from_u128(100), Some(c1.clone()), 85.0, Some("10th")),
            record(Uuid::from_u128(101), Some(c1), 92.0, Some("10th")),
            record(Uuid::from_u128(100), Some(c2), 78.0, Some("10th")),
        ];

        let snapshot = aggregate(&records, now());

        assert_eq!(snapshot.total_records, 3);
        assert_eq!(snapshot.class_averages.len(), 2);
        let first = &snapshot.class_averages[0];
        assert_eq!(first.classroom_id, Uuid::from_u128(10));
        assert_eq!(first.average_score, 88.5);
        assert_eq!(first.total_students, 2);
        assert_eq!(
            first.scores_distribution,
            ScoresDistribution {
                excellent: 1,
                good: 1,
                satisfactory: 0,
                needs_improvement: 0,
            }
        );
        let second = &snapshot.class_averages[1];
        assert_eq!(second.average_score, 78.0);
        assert_eq!(second.scores_distribution.satisfactory, 1);
        assert_eq!(second.scores_distribution.total(), 1);

        assert_eq!(snapshot.school_analytics.len(), 1);
        let school = &snapshot.school_analytics[0];
        assert_eq!(school.overall_average, 85.0);
        assert_eq!(school.total_classrooms, 2);
        assert_eq!(school.total_students, 2);
        assert_eq!(school.total_teachers, 2);
        assert_eq!(school.subject_averages[0].subject, "Math");
        assert_eq!(school.subject_averages[0].average, 88.5);
        assert_eq!(school.subject_averages[1].student_count, 1);
        assert_eq!(school.grade_averages.len(), 1);
        assert_eq!(school.grade_averages[0].student_count, 3);
    }

    #[test]
    fn band_thresholds_are_inclusive() {
        assert_eq!(score_band(90.0), ScoreBand::Excellent);
        assert_eq!(score_band(89.99), ScoreBand::Good);
        assert_eq!(score_band(80.0), ScoreBand::Good);
        assert_eq!(score_band(70.0), ScoreBand::Satisfactory);
        assert_eq!(score_band(69.99), ScoreBand::NeedsImprovement);
        assert_eq!(score_band(percentage(70.0, 100.0)), ScoreBand::Satisfactory);
        assert_eq!(
            score_band(percentage(69.99, 100.0)),
            ScoreBand::NeedsImprovement
        );
    }

    #[test]
    fn scores_are_normalised_against_max_score() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let mut quiz = record(Uuid::from_u128(100), Some(c1), 18.0, None);
        quiz.max_score = 20.0;

        let snapshot = aggregate(&[quiz], now());

        assert_eq!(snapshot.class_averages[0].average_score, 90.0);
        assert_eq!(snapshot.class_averages[0].scores_distribution.excellent, 1);
        assert_eq!(percentage(42.0, 0.0), 42.0);
    }

    #[test]
    fn records_without_classroom_are_skipped() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let records = vec![
            record(Uuid::from_u128(100), None, 40.0, Some("9th")),
            record(Uuid::from_u128(101), Some(c1), 75.0, Some("9th")),
        ];

        let snapshot = aggregate(&records, now());

        assert_eq!(snapshot.total_records, 2);
        assert_eq!(snapshot.class_averages.len(), 1);
        assert_eq!(snapshot.class_averages[0].total_students, 1);
        assert_eq!(snapshot.school_analytics[0].overall_average, 75.0);
        assert_eq!(snapshot.school_analytics[0].total_students, 1);
    }

    #[test]
    fn missing_grade_only_affects_grade_rollup() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let records = vec![
            record(Uuid::from_u128(100), Some(c1.clone()), 60.0, None),
            record(Uuid::from_u128(101), Some(c1.clone()), 80.0, Some("")),
            record(Uuid::from_u128(102), Some(c1), 100.0, Some("12th")),
        ];

        let snapshot = aggregate(&records, now());
        let school = &snapshot.school_analytics[0];

        assert_eq!(school.overall_average, 80.0);
        assert_eq!(school.total_students, 3);
        assert_eq!(school.subject_averages[0].student_count, 3);
        assert_eq!(
            school.grade_averages,
            vec![GradeAverage {
                grade: "12th".to_string(),
                average: 100.0,
                student_count: 1,
            }]
        );
    }

    #[test]
    fn class_totals_count_records_but_school_totals_count_distinct_students() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let student = Uuid::from_u128(100);
        let records = vec![
            record(student, Some(c1.clone()), 70.0, None),
            record(student, Some(c1.clone()), 72.0, None),
            record(student, Some(c1), 74.0, None),
        ];

        let snapshot = aggregate(&records, now());

        assert_eq!(snapshot.class_averages[0].total_students, 3);
        assert_eq!(snapshot.school_analytics[0].total_students, 1);
    }

    #[test]
    fn averages_round_to_two_decimals() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let records = vec![
            record(Uuid::from_u128(100), Some(c1.clone()), 70.0, None),
            record(Uuid::from_u128(101), Some(c1.clone()), 71.0, None),
            record(Uuid::from_u128(102), Some(c1), 71.0, None),
        ];

        let snapshot = aggregate(&records, now());

        assert_eq!(snapshot.class_averages[0].average_score, 70.67);
        assert_eq!(round2(2.345_6), 2.35);
    }

    #[test]
    fn rerunning_on_same_input_is_stable() {
        let school = Uuid::from_u128(1);
        let c1 = classroom(Uuid::from_u128(10), school, "Math");
        let records = vec![
            record(Uuid::from_u128(100), Some(c1.clone()), 63.3, Some("11th")),
            record(Uuid::from_u128(101), Some(c1), 91.7, Some("11th")),
        ];

        let first = aggregate(&records, now());
        let second = aggregate(&records, Utc::now());

        assert_eq!(
            first.class_averages[0].average_score,
            second.class_averages[0].average_score
        );
        assert_eq!(
            first.school_analytics[0].grade_averages,
            second.school_analytics[0].grade_averages
        );
        assert_ne!(
            first.class_averages[0].last_updated,
            second.class_averages[0].last_updated
        );
    }

    #[test]
    fn missing_names_fall_back_to_unknown_and_subject_to_record() {
        let school = Uuid::from_u128(1);
        let mut c1 = classroom(Uuid::from_u128(10), school, "Math");
        c1.school_name = None;
        c1.teacher_name = None;
        c1.subject = None;
        let mut entry = record(Uuid::from_u128(100), Some(c1), 88.0, None);
        entry.subject = "History".to_string();

        let snapshot = aggregate(&[entry], now());

        let class = &snapshot.class_averages[0];
        assert_eq!(class.school_name, "Unknown");
        assert_eq!(class.teacher_name, "Unknown");
        assert_eq!(class.subject, "History");
        assert_eq!(snapshot.school_analytics[0].school_name, "Unknown");
        assert_eq!(snapshot.school_analytics[0].subject_averages[0].subject, "History");
    }

    #[test]
    fn empty_input_produces_empty_snapshot() {
        let snapshot = aggregate(&[], now());
        assert!(snapshot.class_averages.is_empty());
        assert!(snapshot.school_analytics.is_empty());
        assert_eq!(snapshot.total_records, 0);
    }
}
