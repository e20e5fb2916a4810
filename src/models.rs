use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Role;

/// A progress row joined with the classroom and student attributes the
/// aggregator needs.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub classroom_id: Option<Uuid>,
    pub school_id: Uuid,
    pub subject: String,
    pub score: f64,
    pub max_score: f64,
    pub created_at: DateTime<Utc>,
    pub classroom: Option<ClassroomRef>,
    pub student_grade: Option<String>,
}

/// Classroom as embedded into a progress record, with its school and teacher
/// names resolved where possible.
#[derive(Debug, Clone)]
pub struct ClassroomRef {
    pub id: Uuid,
    pub name: String,
    pub subject: Option<String>,
    pub school_id: Uuid,
    pub school_name: Option<String>,
    pub teacher_id: Uuid,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Classroom {
    pub id: Uuid,
    pub name: String,
    pub subject: Option<String>,
    pub school_id: Uuid,
    pub teacher_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub grade: Option<String>,
    pub school_id: Option<Uuid>,
}

/// Progress row as shown to an actor, without the joins.
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    pub id: Uuid,
    pub student_name: String,
    pub subject: String,
    pub score: f64,
    pub max_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoresDistribution {
    pub excellent: u32,
    pub good: u32,
    pub satisfactory: u32,
    pub needs_improvement: u32,
}

impl ScoresDistribution {
    pub fn total(&self) -> u32 {
        self.excellent + self.good + self.satisfactory + self.needs_improvement
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAverage {
    pub classroom_id: Uuid,
    pub classroom_name: String,
    pub school_id: Uuid,
    pub school_name: String,
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub subject: String,
    pub average_score: f64,
    pub total_students: u32,
    pub scores_distribution: ScoresDistribution,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAverage {
    pub subject: String,
    pub average: f64,
    pub student_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeAverage {
    pub grade: String,
    pub average: f64,
    pub student_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolAnalytics {
    pub school_id: Uuid,
    pub school_name: String,
    pub total_students: u32,
    pub total_teachers: u32,
    pub total_classrooms: u32,
    pub overall_average: f64,
    pub subject_averages: Vec<SubjectAverage>,
    pub grade_averages: Vec<GradeAverage>,
    pub last_updated: DateTime<Utc>,
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsSnapshot {
    pub class_averages: Vec<ClassAverage>,
    pub school_analytics: Vec<SchoolAnalytics>,
    pub total_records: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSummary {
    pub class_averages_calculated: usize,
    pub school_analytics_calculated: usize,
    pub total_progress_records: usize,
}
