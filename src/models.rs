use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One dated observation in a caller-ordered series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    #[serde(default)]
    pub student_id: Option<String>,
    pub subject_id: String,
    pub score: f64,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub assessment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub year_group: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A student row as it appears in class-level data: already aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub average: f64,
    #[serde(default)]
    pub attendance_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Late arrivals still count as attended.
    pub fn attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default)]
    pub student_id: Option<String>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub name: String,
    #[serde(default)]
    pub teacher: Option<String>,
    #[serde(default)]
    pub year_group: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolInfo {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskStudent {
    pub student_id: String,
    pub name: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub average: Option<f64>,
    #[serde(default)]
    pub attendance_rate: Option<f64>,
}

/// Everything a report can read. Sections only look at the keys they need;
/// absent keys behave as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportData {
    pub student: Option<Student>,
    pub grades: Vec<GradeRecord>,
    pub subjects: Vec<Subject>,
    pub students: Vec<StudentSummary>,
    pub attendance: Vec<AttendanceRecord>,
    pub class: Option<ClassInfo>,
    pub school: Option<SchoolInfo>,
    pub period: Option<String>,
    pub risk_students: Vec<RiskStudent>,
    pub trend_data: Value,
    pub subject_comparison: Value,
    pub grade_distribution: Value,
    pub report_title: Option<String>,
    pub comments: BTreeMap<String, String>,
}

impl ReportData {
    pub fn subject_name<'a>(&'a self, subject_id: &'a str) -> &'a str {
        self.subjects
            .iter()
            .find(|subject| subject.id == subject_id)
            .map(|subject| subject.name.as_str())
            .unwrap_or(subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_default_to_empty() {
        let data: ReportData = serde_json::from_str(r#"{"reportTitle": "Term 1"}"#).unwrap();
        assert_eq!(data.report_title.as_deref(), Some("Term 1"));
        assert!(data.grades.is_empty());
        assert!(data.student.is_none());
        assert!(data.trend_data.is_null());
    }

    #[test]
    fn extra_keys_are_ignored() {
        let data: ReportData =
            serde_json::from_str(r#"{"unrelated": [1, 2, 3], "period": "Spring"}"#).unwrap();
        assert_eq!(data.period.as_deref(), Some("Spring"));
    }

    #[test]
    fn subject_name_falls_back_to_id() {
        let data = ReportData {
            subjects: vec![Subject {
                id: "math".to_string(),
                name: "Mathematics".to_string(),
                teacher: None,
            }],
            ..ReportData::default()
        };
        assert_eq!(data.subject_name("math"), "Mathematics");
        assert_eq!(data.subject_name("art"), "art");
    }

    #[test]
    fn late_counts_as_attended() {
        assert!(AttendanceStatus::Late.attended());
        assert!(!AttendanceStatus::Excused.attended());
        assert_eq!(AttendanceStatus::parse(" Absent"), Some(AttendanceStatus::Absent));
    }
}
