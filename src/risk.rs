use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{GradeRecord, RiskLevel, RiskStudent, StudentSummary};
use crate::stats::StatsPolicy;
use crate::trend::{self, TrendDirection, TrendOptions};

pub const DEFAULT_ATTENDANCE_THRESHOLD: f64 = 85.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskReason {
    LowAverage,
    LowAttendance,
    DecliningTrend,
}

impl RiskReason {
    pub fn describe(self, policy: &RiskPolicy) -> String {
        match self {
            RiskReason::LowAverage => {
                format!("Average below pass mark ({})", policy.stats.pass_mark)
            }
            RiskReason::LowAttendance => {
                format!("Attendance below {}%", policy.attendance_threshold)
            }
            RiskReason::DecliningTrend => "Declining performance trend".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskPolicy {
    pub stats: StatsPolicy,
    pub attendance_threshold: f64,
    pub trend_window: usize,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            stats: StatsPolicy::default(),
            attendance_threshold: DEFAULT_ATTENDANCE_THRESHOLD,
            trend_window: trend::DEFAULT_WINDOW_SIZE,
        }
    }
}

pub fn reason_weight(reason: RiskReason) -> f64 {
    match reason {
        RiskReason::LowAverage => 2.0,
        RiskReason::LowAttendance => 1.5,
        RiskReason::DecliningTrend => 1.0,
    }
}

pub fn risk_level(weight: f64) -> RiskLevel {
    if weight >= 3.0 {
        RiskLevel::High
    } else if weight >= 2.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Flags students whose average, attendance or dated grade history warrants
/// follow-up. Students with no reasons are left out.
pub fn identify_at_risk(
    students: &[StudentSummary],
    grades: &[GradeRecord],
    policy: &RiskPolicy,
) -> Vec<RiskStudent> {
    let mut history: HashMap<&str, Vec<(NaiveDate, f64)>> = HashMap::new();
    for grade in grades.iter() {
        let (Some(student_id), Some(date)) = (grade.student_id.as_deref(), grade.date) else {
            continue;
        };
        history.entry(student_id).or_default().push((date, grade.score));
    }

    let options = TrendOptions {
        window_size: policy.trend_window,
        ..TrendOptions::default()
    };

    let mut flagged: Vec<(f64, RiskStudent)> = Vec::new();
    for student in students.iter() {
        let mut reasons = Vec::new();

        if student.average < policy.stats.pass_mark {
            reasons.push(RiskReason::LowAverage);
        }
        if student
            .attendance_rate
            .is_some_and(|rate| rate < policy.attendance_threshold)
        {
            reasons.push(RiskReason::LowAttendance);
        }
        if let Some(scores) = history.get_mut(student.id.as_str()) {
            scores.sort_by_key(|(date, _)| *date);
            let series =
                trend::series_from_pairs(scores.iter().map(|&(date, score)| (Some(date), score)));
            let result = trend::trend_analysis_with(&series, &options, &policy.stats);
            if result.trend == TrendDirection::Decreasing {
                reasons.push(RiskReason::DecliningTrend);
            }
        }

        if reasons.is_empty() {
            continue;
        }

        let weight: f64 = reasons.iter().map(|&reason| reason_weight(reason)).sum();
        flagged.push((
            weight,
            RiskStudent {
                student_id: student.id.clone(),
                name: student.name.clone(),
                risk_level: risk_level(weight),
                reasons: reasons.iter().map(|reason| reason.describe(policy)).collect(),
                average: Some(student.average),
                attendance_rate: student.attendance_rate,
            },
        ));
    }

    flagged.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let left = a.1.average.unwrap_or_default();
                let right = b.1.average.unwrap_or_default();
                left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    flagged.into_iter().map(|(_, student)| student).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, average: f64, attendance: Option<f64>) -> StudentSummary {
        StudentSummary {
            id: id.to_string(),
            name: format!("Student {id}"),
            average,
            attendance_rate: attendance,
        }
    }

    fn dated_grade(student_id: &str, day: u32, score: f64) -> GradeRecord {
        GradeRecord {
            student_id: Some(student_id.to_string()),
            subject_id: "math".to_string(),
            score,
            date: NaiveDate::from_ymd_opt(2026, 2, day),
            assessment: None,
        }
    }

    #[test]
    fn weights_follow_expected_tiers() {
        assert_eq!(risk_level(reason_weight(RiskReason::LowAverage)), RiskLevel::Medium);
        assert_eq!(risk_level(reason_weight(RiskReason::LowAttendance)), RiskLevel::Low);
        assert_eq!(risk_level(reason_weight(RiskReason::DecliningTrend)), RiskLevel::Low);
        assert_eq!(risk_level(3.5), RiskLevel::High);
    }

    #[test]
    fn reasons_accumulate_by_student() {
        let students = vec![student("a", 35.0, Some(70.0))];
        let flagged = identify_at_risk(&students, &[], &RiskPolicy::default());
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].risk_level, RiskLevel::High);
        assert_eq!(
            flagged[0].reasons,
            vec!["Average below pass mark (40)".to_string(), "Attendance below 85%".to_string()]
        );
    }

    #[test]
    fn healthy_students_are_not_flagged() {
        let students = vec![student("a", 75.0, Some(96.0)), student("b", 60.0, None)];
        assert!(identify_at_risk(&students, &[], &RiskPolicy::default()).is_empty());
    }

    #[test]
    fn declining_history_is_flagged_regardless_of_order() {
        let students = vec![student("a", 62.0, Some(95.0))];
        let grades = vec![
            dated_grade("a", 20, 50.0),
            dated_grade("a", 1, 80.0),
            dated_grade("a", 10, 65.0),
            dated_grade("b", 1, 10.0),
        ];
        let policy = RiskPolicy {
            trend_window: 1,
            ..RiskPolicy::default()
        };
        let flagged = identify_at_risk(&students, &grades, &policy);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].reasons, vec!["Declining performance trend".to_string()]);
    }

    #[test]
    fn most_at_risk_come_first() {
        let students = vec![
            student("low", 55.0, Some(80.0)),
            student("high", 30.0, Some(60.0)),
            student("medium", 38.0, None),
            student("medium-lower", 20.0, None),
        ];
        let flagged = identify_at_risk(&students, &[], &RiskPolicy::default());
        let ids: Vec<&str> = flagged.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "medium-lower", "medium", "low"]);
    }
}
