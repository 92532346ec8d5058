//! Template catalog and section processing.
//!
//! A [`ReportTemplate`] is a fixed, ordered list of sections. Processing binds
//! it to a [`ReportData`] context: each section is dispatched on its kind and
//! filled with a typed payload, calling into [`crate::stats`] where a section
//! needs aggregates.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{ReportData, RiskLevel};
use crate::stats::{self, GradeDistribution, ScoreDistribution, StatsPolicy};

pub const UNKNOWN_SECTION: &str = "Unknown section type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    StudentProgress,
    ClassPerformance,
    AttendanceSummary,
    AtRiskStudents,
}

impl ReportType {
    pub const ALL: [ReportType; 4] = [
        ReportType::StudentProgress,
        ReportType::ClassPerformance,
        ReportType::AttendanceSummary,
        ReportType::AtRiskStudents,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::StudentProgress => "STUDENT_PROGRESS",
            ReportType::ClassPerformance => "CLASS_PERFORMANCE",
            ReportType::AttendanceSummary => "ATTENDANCE_SUMMARY",
            ReportType::AtRiskStudents => "AT_RISK_STUDENTS",
        }
    }
}

impl FromStr for ReportType {
    type Err = String;

    /// Accepts `STUDENT_PROGRESS` as well as `student-progress`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().replace('-', "_").to_ascii_uppercase();
        ReportType::ALL
            .into_iter()
            .find(|report_type| report_type.as_str() == normalized)
            .ok_or_else(|| format!("unknown report type: {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMode {
    AcademicSummary,
    PerformanceOverview,
    AttendanceStats,
}

/// Which caller-supplied series a chart section forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartSource {
    TrendData,
    SubjectComparison,
    GradeDistribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Doughnut,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Doughnut => "doughnut",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionKind {
    Header,
    StudentDetails,
    ClassDetails,
    SummaryStats {
        mode: SummaryMode,
    },
    SubjectTable,
    RankingTable,
    AlertTable,
    Chart {
        source: ChartSource,
        #[serde(rename = "chartType")]
        chart_type: ChartType,
        title: String,
        #[serde(rename = "xAxis")]
        x_axis: String,
        #[serde(rename = "yAxis")]
        y_axis: String,
    },
    TextBlock {
        #[serde(default)]
        text: String,
    },
    Footer,
    /// Any type name this engine does not know, e.g. a typo in a custom template.
    #[serde(other)]
    Unknown,
}

impl SectionKind {
    /// Tables that can be exported as CSV or spreadsheet sheets.
    pub fn is_exportable_table(&self) -> bool {
        matches!(self, SectionKind::SubjectTable | SectionKind::RankingTable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: SectionKind,
}

impl Section {
    fn new(id: &str, required: bool, kind: SectionKind) -> Self {
        Self {
            id: id.to_string(),
            required,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub id: String,
    pub title: String,
    pub sections: Vec<Section>,
}

fn chart(
    source: ChartSource,
    chart_type: ChartType,
    title: &str,
    x_axis: &str,
    y_axis: &str,
) -> SectionKind {
    SectionKind::Chart {
        source,
        chart_type,
        title: title.to_string(),
        x_axis: x_axis.to_string(),
        y_axis: y_axis.to_string(),
    }
}

fn text(value: &str) -> SectionKind {
    SectionKind::TextBlock {
        text: value.to_string(),
    }
}

pub fn template_for(report_type: ReportType) -> ReportTemplate {
    let (title, sections) = match report_type {
        ReportType::StudentProgress => (
            "Student Progress Report",
            vec![
                Section::new("header", true, SectionKind::Header),
                Section::new("student_info", true, SectionKind::StudentDetails),
                Section::new(
                    "academic_summary",
                    true,
                    SectionKind::SummaryStats {
                        mode: SummaryMode::AcademicSummary,
                    },
                ),
                Section::new("subject_performance", true, SectionKind::SubjectTable),
                Section::new(
                    "progress_chart",
                    false,
                    chart(
                        ChartSource::TrendData,
                        ChartType::Line,
                        "Progress Over Time",
                        "Date",
                        "Score",
                    ),
                ),
                Section::new("teacher_comments", false, text("No comments recorded.")),
                Section::new("footer", true, SectionKind::Footer),
            ],
        ),
        ReportType::ClassPerformance => (
            "Class Performance Report",
            vec![
                Section::new("header", true, SectionKind::Header),
                Section::new("class_info", true, SectionKind::ClassDetails),
                Section::new(
                    "performance_overview",
                    true,
                    SectionKind::SummaryStats {
                        mode: SummaryMode::PerformanceOverview,
                    },
                ),
                Section::new("student_rankings", true, SectionKind::RankingTable),
                Section::new(
                    "grade_distribution",
                    false,
                    chart(
                        ChartSource::GradeDistribution,
                        ChartType::Pie,
                        "Grade Distribution",
                        "Grade",
                        "Students",
                    ),
                ),
                Section::new(
                    "subject_comparison",
                    false,
                    chart(
                        ChartSource::SubjectComparison,
                        ChartType::Bar,
                        "Subject Comparison",
                        "Subject",
                        "Average Score",
                    ),
                ),
                Section::new("footer", true, SectionKind::Footer),
            ],
        ),
        ReportType::AttendanceSummary => (
            "Attendance Summary Report",
            vec![
                Section::new("header", true, SectionKind::Header),
                Section::new("class_info", false, SectionKind::ClassDetails),
                Section::new(
                    "attendance_stats",
                    true,
                    SectionKind::SummaryStats {
                        mode: SummaryMode::AttendanceStats,
                    },
                ),
                Section::new(
                    "attendance_trends",
                    false,
                    chart(
                        ChartSource::TrendData,
                        ChartType::Line,
                        "Attendance Trend",
                        "Date",
                        "Attendance %",
                    ),
                ),
                Section::new("absence_alerts", true, SectionKind::AlertTable),
                Section::new("footer", true, SectionKind::Footer),
            ],
        ),
        ReportType::AtRiskStudents => (
            "At-Risk Students Report",
            vec![
                Section::new("header", true, SectionKind::Header),
                Section::new(
                    "risk_overview",
                    false,
                    text(
                        "Students listed below are flagged for follow-up based on grades, \
                         attendance and recent trends.",
                    ),
                ),
                Section::new(
                    "performance_overview",
                    true,
                    SectionKind::SummaryStats {
                        mode: SummaryMode::PerformanceOverview,
                    },
                ),
                Section::new("risk_students", true, SectionKind::AlertTable),
                Section::new("footer", true, SectionKind::Footer),
            ],
        ),
    };

    ReportTemplate {
        id: report_type.as_str().to_string(),
        title: title.to_string(),
        sections,
    }
}

/// Looks a template up by its type name; `None` for names not in the catalog.
pub fn get_template(name: &str) -> Option<ReportTemplate> {
    ReportType::from_str(name).ok().map(template_for)
}

pub fn catalog() -> Vec<ReportTemplate> {
    ReportType::ALL.into_iter().map(template_for).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderContent {
    pub title: String,
    pub school_name: Option<String>,
    pub period: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetailsContent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub class_name: Option<String>,
    pub year_group: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetailsContent {
    pub name: Option<String>,
    pub teacher: Option<String>,
    pub year_group: Option<String>,
    pub room: Option<String>,
    pub student_count: usize,
    pub subject_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSummary {
    pub overall_average: f64,
    pub median: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub total_assessments: usize,
    pub pass_rate: f64,
    pub standard_deviation: f64,
    pub overall_grade: String,
    pub grade_distribution: GradeDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceOverview {
    pub class_average: f64,
    pub median: f64,
    pub standard_deviation: f64,
    pub highest_average: f64,
    pub lowest_average: f64,
    pub student_count: usize,
    pub pass_rate: f64,
    pub grade_distribution: GradeDistribution,
    pub distribution: ScoreDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_records: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub attendance_rate: f64,
    pub days_recorded: usize,
    pub average_daily_rate: f64,
    pub lowest_daily_rate: f64,
    pub highest_daily_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SummaryStats {
    AcademicSummary(AcademicSummary),
    PerformanceOverview(PerformanceOverview),
    AttendanceStats(AttendanceStats),
}

impl SummaryStats {
    pub fn heading(&self) -> &'static str {
        match self {
            SummaryStats::AcademicSummary(_) => "Academic Summary",
            SummaryStats::PerformanceOverview(_) => "Performance Overview",
            SummaryStats::AttendanceStats(_) => "Attendance Statistics",
        }
    }

    /// Label/value pairs for display.
    pub fn items(&self) -> Vec<(&'static str, String)> {
        match self {
            SummaryStats::AcademicSummary(summary) => vec![
                ("Overall Average", format!("{:.1}", summary.overall_average)),
                ("Overall Grade", summary.overall_grade.clone()),
                ("Median", format!("{:.1}", summary.median)),
                ("Highest Score", format!("{:.1}", summary.highest_score)),
                ("Lowest Score", format!("{:.1}", summary.lowest_score)),
                ("Assessments", summary.total_assessments.to_string()),
                ("Pass Rate", format!("{:.1}%", summary.pass_rate)),
            ],
            SummaryStats::PerformanceOverview(overview) => vec![
                ("Class Average", format!("{:.1}", overview.class_average)),
                ("Median", format!("{:.1}", overview.median)),
                ("Standard Deviation", format!("{:.1}", overview.standard_deviation)),
                ("Highest Average", format!("{:.1}", overview.highest_average)),
                ("Lowest Average", format!("{:.1}", overview.lowest_average)),
                ("Students", overview.student_count.to_string()),
                ("Pass Rate", format!("{:.1}%", overview.pass_rate)),
            ],
            SummaryStats::AttendanceStats(attendance) => vec![
                ("Attendance Rate", format!("{:.1}%", attendance.attendance_rate)),
                ("Present", attendance.present.to_string()),
                ("Absent", attendance.absent.to_string()),
                ("Late", attendance.late.to_string()),
                ("Excused", attendance.excused.to_string()),
                ("Days Recorded", attendance.days_recorded.to_string()),
                ("Lowest Daily Rate", format!("{:.1}%", attendance.lowest_daily_rate)),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub subject: String,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub assessments: usize,
    pub pass_rate: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub rank: usize,
    pub student: String,
    pub average: f64,
    pub grade: String,
    pub attendance_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRow {
    pub student: String,
    pub risk_level: RiskLevel,
    pub reasons: String,
    pub average: Option<f64>,
    pub attendance_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub title: String,
    pub x_axis: String,
    pub y_axis: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartContent {
    pub chart_type: ChartType,
    pub config: ChartConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FooterContent {
    pub generated_at: DateTime<Utc>,
    pub school_name: Option<String>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionContent {
    Header(HeaderContent),
    StudentDetails(StudentDetailsContent),
    ClassDetails(ClassDetailsContent),
    SummaryStats(SummaryStats),
    SubjectTable { rows: Vec<SubjectRow> },
    RankingTable { rows: Vec<RankingRow> },
    AlertTable { rows: Vec<AlertRow> },
    Chart(ChartContent),
    TextBlock { text: String },
    Footer(FooterContent),
    Unknown { content: String },
}

impl SectionContent {
    /// Rows of a table section as JSON objects, keys in column order.
    pub fn table_rows(&self) -> Option<serde_json::Result<Vec<serde_json::Map<String, Value>>>> {
        let rows = match self {
            SectionContent::SubjectTable { rows } => serde_json::to_value(rows),
            SectionContent::RankingTable { rows } => serde_json::to_value(rows),
            SectionContent::AlertTable { rows } => serde_json::to_value(rows),
            _ => return None,
        };

        Some(rows.map(|value| match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSection {
    pub id: String,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: SectionKind,
    pub content: SectionContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedTemplate {
    pub id: String,
    pub title: String,
    pub sections: Vec<ProcessedSection>,
    pub generated_at: DateTime<Utc>,
    pub data_hash: String,
}

impl ProcessedTemplate {
    pub fn section(&self, id: &str) -> Option<&ProcessedSection> {
        self.sections.iter().find(|section| section.id == id)
    }
}

/// Short, non-cryptographic fingerprint of the input data. Only useful to spot
/// that two reports were built from different inputs.
pub fn data_hash(data: &ReportData) -> String {
    let serialized = serde_json::to_string(data).unwrap_or_default();
    let mut hash: i32 = 0;
    for unit in serialized.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    format!("{:08x}", hash as u32)
}

pub fn process_template(template: &ReportTemplate, data: &ReportData) -> ProcessedTemplate {
    process_template_with(template, data, &StatsPolicy::default(), Utc::now())
}

pub fn process_template_with(
    template: &ReportTemplate,
    data: &ReportData,
    policy: &StatsPolicy,
    generated_at: DateTime<Utc>,
) -> ProcessedTemplate {
    let title = data
        .report_title
        .clone()
        .unwrap_or_else(|| template.title.clone());

    let sections = template
        .sections
        .iter()
        .map(|section| {
            debug!(section = %section.id, template = %template.id, "processing report section");
            ProcessedSection {
                id: section.id.clone(),
                required: section.required,
                kind: section.kind.clone(),
                content: build_section(section, &title, data, policy, generated_at),
            }
        })
        .collect();

    ProcessedTemplate {
        id: template.id.clone(),
        title,
        sections,
        generated_at,
        data_hash: data_hash(data),
    }
}

fn build_section(
    section: &Section,
    title: &str,
    data: &ReportData,
    policy: &StatsPolicy,
    generated_at: DateTime<Utc>,
) -> SectionContent {
    match &section.kind {
        SectionKind::Header => SectionContent::Header(HeaderContent {
            title: title.to_string(),
            school_name: data.school.as_ref().map(|school| school.name.clone()),
            period: data.period.clone(),
            generated_at,
        }),
        SectionKind::StudentDetails => SectionContent::StudentDetails(student_details(data)),
        SectionKind::ClassDetails => SectionContent::ClassDetails(class_details(data)),
        SectionKind::SummaryStats { mode } => {
            SectionContent::SummaryStats(summary_stats(*mode, data, policy))
        }
        SectionKind::SubjectTable => SectionContent::SubjectTable {
            rows: subject_rows(data, policy),
        },
        SectionKind::RankingTable => SectionContent::RankingTable {
            rows: ranking_rows(data, policy),
        },
        SectionKind::AlertTable => SectionContent::AlertTable {
            rows: alert_rows(data),
        },
        SectionKind::Chart {
            source,
            chart_type,
            title,
            x_axis,
            y_axis,
        } => {
            let series = match source {
                ChartSource::TrendData => &data.trend_data,
                ChartSource::SubjectComparison => &data.subject_comparison,
                ChartSource::GradeDistribution => &data.grade_distribution,
            };
            SectionContent::Chart(ChartContent {
                chart_type: *chart_type,
                config: ChartConfig {
                    title: title.clone(),
                    x_axis: x_axis.clone(),
                    y_axis: y_axis.clone(),
                    data: if series.is_null() {
                        Value::Array(Vec::new())
                    } else {
                        series.clone()
                    },
                },
            })
        }
        SectionKind::TextBlock { text } => SectionContent::TextBlock {
            text: data
                .comments
                .get(&section.id)
                .cloned()
                .unwrap_or_else(|| text.clone()),
        },
        SectionKind::Footer => SectionContent::Footer(FooterContent {
            generated_at,
            school_name: data.school.as_ref().map(|school| school.name.clone()),
            note: "This report was generated automatically from recorded assessment data."
                .to_string(),
        }),
        SectionKind::Unknown => {
            warn!(section = %section.id, "unknown section type, emitting placeholder");
            SectionContent::Unknown {
                content: UNKNOWN_SECTION.to_string(),
            }
        }
    }
}

fn student_details(data: &ReportData) -> StudentDetailsContent {
    let Some(student) = data.student.as_ref() else {
        return StudentDetailsContent::default();
    };
    StudentDetailsContent {
        id: Some(student.id.clone()),
        name: Some(student.name.clone()),
        class_name: student.class_name.clone(),
        year_group: student.year_group.clone(),
        email: student.email.clone(),
    }
}

fn class_details(data: &ReportData) -> ClassDetailsContent {
    let class = data.class.as_ref();
    ClassDetailsContent {
        name: class.map(|class| class.name.clone()),
        teacher: class.and_then(|class| class.teacher.clone()),
        year_group: class.and_then(|class| class.year_group.clone()),
        room: class.and_then(|class| class.room.clone()),
        student_count: data.students.len(),
        subject_count: data.subjects.len(),
    }
}

pub fn summary_stats(mode: SummaryMode, data: &ReportData, policy: &StatsPolicy) -> SummaryStats {
    match mode {
        SummaryMode::AcademicSummary => {
            let scores: Vec<f64> = data.grades.iter().map(|grade| grade.score).collect();
            let metrics = stats::class_metrics_with(&scores, policy);
            let total_assessments = stats::finite_scores(&scores).len();
            let overall_grade = if total_assessments == 0 {
                "N/A".to_string()
            } else {
                stats::letter_grade(metrics.average, &policy.grade_thresholds).to_string()
            };
            SummaryStats::AcademicSummary(AcademicSummary {
                overall_average: metrics.average,
                median: metrics.median,
                highest_score: metrics.range.max,
                lowest_score: metrics.range.min,
                total_assessments,
                pass_rate: metrics.pass_rate,
                standard_deviation: metrics.standard_deviation,
                overall_grade,
                grade_distribution: metrics.grade_distribution,
            })
        }
        SummaryMode::PerformanceOverview => {
            let averages: Vec<f64> = data.students.iter().map(|student| student.average).collect();
            let metrics = stats::class_metrics_with(&averages, policy);
            SummaryStats::PerformanceOverview(PerformanceOverview {
                class_average: metrics.average,
                median: metrics.median,
                standard_deviation: metrics.standard_deviation,
                highest_average: metrics.range.max,
                lowest_average: metrics.range.min,
                student_count: data.students.len(),
                pass_rate: metrics.pass_rate,
                grade_distribution: metrics.grade_distribution,
                distribution: metrics.distribution,
            })
        }
        SummaryMode::AttendanceStats => {
            SummaryStats::AttendanceStats(attendance_stats(data, policy))
        }
    }
}

fn attendance_stats(data: &ReportData, policy: &StatsPolicy) -> AttendanceStats {
    use crate::models::AttendanceStatus;

    let mut counts = [0usize; 4];
    let mut daily: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();

    for record in data.attendance.iter() {
        let slot = match record.status {
            AttendanceStatus::Present => 0,
            AttendanceStatus::Absent => 1,
            AttendanceStatus::Late => 2,
            AttendanceStatus::Excused => 3,
        };
        counts[slot] += 1;

        let day = daily.entry(record.date).or_insert((0, 0));
        if record.status.attended() {
            day.0 += 1;
        }
        day.1 += 1;
    }

    let daily_rates: Vec<f64> = daily
        .values()
        .map(|&(attended, total)| stats::percent(attended, total))
        .collect();
    let metrics = stats::class_metrics_with(&daily_rates, policy);
    let total_records = data.attendance.len();

    AttendanceStats {
        total_records,
        present: counts[0],
        absent: counts[1],
        late: counts[2],
        excused: counts[3],
        attendance_rate: stats::percent(counts[0] + counts[2], total_records),
        days_recorded: daily_rates.len(),
        average_daily_rate: metrics.average,
        lowest_daily_rate: metrics.range.min,
        highest_daily_rate: metrics.range.max,
    }
}

fn subject_rows(data: &ReportData, policy: &StatsPolicy) -> Vec<SubjectRow> {
    // Listed subjects first, then any subject that only appears in grades.
    let mut order: Vec<&str> = data.subjects.iter().map(|subject| subject.id.as_str()).collect();
    for grade in data.grades.iter() {
        if !order.contains(&grade.subject_id.as_str()) {
            order.push(grade.subject_id.as_str());
        }
    }

    order
        .into_iter()
        .filter_map(|subject_id| {
            let scores: Vec<f64> = data
                .grades
                .iter()
                .filter(|grade| grade.subject_id == subject_id)
                .map(|grade| grade.score)
                .collect();
            let assessments = stats::finite_scores(&scores).len();
            if assessments == 0 {
                return None;
            }
            let metrics = stats::class_metrics_with(&scores, policy);
            Some(SubjectRow {
                subject: data.subject_name(subject_id).to_string(),
                average: stats::round_to(metrics.average, 1),
                highest: metrics.range.max,
                lowest: metrics.range.min,
                assessments,
                pass_rate: stats::round_to(metrics.pass_rate, 1),
                grade: stats::letter_grade(metrics.average, &policy.grade_thresholds).to_string(),
            })
        })
        .collect()
}

fn ranking_rows(data: &ReportData, policy: &StatsPolicy) -> Vec<RankingRow> {
    let mut students: Vec<_> = data.students.iter().collect();
    students.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    students
        .into_iter()
        .enumerate()
        .map(|(index, student)| RankingRow {
            rank: index + 1,
            student: student.name.clone(),
            average: stats::round_to(student.average, 1),
            grade: stats::letter_grade(student.average, &policy.grade_thresholds).to_string(),
            attendance_rate: student.attendance_rate.map(|rate| stats::round_to(rate, 1)),
        })
        .collect()
}

fn alert_rows(data: &ReportData) -> Vec<AlertRow> {
    let mut flagged: Vec<_> = data.risk_students.iter().collect();
    flagged.sort_by(|a, b| b.risk_level.cmp(&a.risk_level));

    flagged
        .into_iter()
        .map(|student| AlertRow {
            student: student.name.clone(),
            risk_level: student.risk_level,
            reasons: student.reasons.join("; "),
            average: student.average.map(|average| stats::round_to(average, 1)),
            attendance_rate: student.attendance_rate.map(|rate| stats::round_to(rate, 1)),
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        AttendanceRecord, AttendanceStatus, ClassInfo, GradeRecord, RiskStudent, SchoolInfo,
        Student, StudentSummary, Subject,
    };
    use chrono::TimeZone;

    pub(crate) fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()
    }

    fn grade(subject_id: &str, score: f64) -> GradeRecord {
        GradeRecord {
            student_id: Some("s-1".to_string()),
            subject_id: subject_id.to_string(),
            score,
            date: None,
            assessment: None,
        }
    }

    fn summary(id: &str, name: &str, average: f64, attendance: Option<f64>) -> StudentSummary {
        StudentSummary {
            id: id.to_string(),
            name: name.to_string(),
            average,
            attendance_rate: attendance,
        }
    }

    pub(crate) fn sample_data() -> ReportData {
        let day = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        ReportData {
            student: Some(Student {
                id: "s-1".to_string(),
                name: "Avery Lee".to_string(),
                class_name: Some("7B".to_string()),
                year_group: Some("Year 7".to_string()),
                email: Some("avery.lee@groupscholar.com".to_string()),
            }),
            grades: vec![
                grade("math", 72.0),
                grade("math", 88.0),
                grade("eng", 35.0),
                grade("sci", 64.0),
            ],
            subjects: vec![
                Subject {
                    id: "math".to_string(),
                    name: "Mathematics".to_string(),
                    teacher: Some("Ms. Okafor".to_string()),
                },
                Subject {
                    id: "eng".to_string(),
                    name: "English".to_string(),
                    teacher: None,
                },
            ],
            students: vec![
                summary("s-1", "Avery Lee", 64.75, Some(92.0)),
                summary("s-2", "Jules \"JJ\" Moreno", 81.0, Some(97.5)),
                summary("s-3", "Kiara Patel", 38.5, Some(71.0)),
            ],
            attendance: vec![
                AttendanceRecord {
                    student_id: Some("s-1".to_string()),
                    date: day(2),
                    status: AttendanceStatus::Present,
                },
                AttendanceRecord {
                    student_id: Some("s-2".to_string()),
                    date: day(2),
                    status: AttendanceStatus::Late,
                },
                AttendanceRecord {
                    student_id: Some("s-1".to_string()),
                    date: day(3),
                    status: AttendanceStatus::Absent,
                },
                AttendanceRecord {
                    student_id: Some("s-2".to_string()),
                    date: day(3),
                    status: AttendanceStatus::Excused,
                },
            ],
            class: Some(ClassInfo {
                name: "7B".to_string(),
                teacher: Some("Mr. Haddad".to_string()),
                year_group: Some("Year 7".to_string()),
                room: None,
            }),
            school: Some(SchoolInfo {
                name: "Group Scholar Academy".to_string(),
                address: None,
            }),
            period: Some("Spring 2026".to_string()),
            risk_students: vec![
                RiskStudent {
                    student_id: "s-4".to_string(),
                    name: "Rowan Diaz".to_string(),
                    risk_level: RiskLevel::Low,
                    reasons: vec!["Attendance below 85%".to_string()],
                    average: Some(58.0),
                    attendance_rate: Some(80.0),
                },
                RiskStudent {
                    student_id: "s-3".to_string(),
                    name: "Kiara Patel".to_string(),
                    risk_level: RiskLevel::High,
                    reasons: vec![
                        "Average below pass mark".to_string(),
                        "Attendance below 85%".to_string(),
                    ],
                    average: Some(38.5),
                    attendance_rate: Some(71.0),
                },
            ],
            trend_data: serde_json::json!([
                {"date": "2026-01-10", "value": 61.0},
                {"date": "2026-02-10", "value": 66.5}
            ]),
            subject_comparison: Value::Null,
            grade_distribution: serde_json::json!([{"grade": "A", "count": 1}]),
            report_title: None,
            comments: BTreeMap::new(),
        }
    }

    fn process(report_type: ReportType, data: &ReportData) -> ProcessedTemplate {
        process_template_with(
            &template_for(report_type),
            data,
            &StatsPolicy::default(),
            fixed_time(),
        )
    }

    #[test]
    fn catalog_lookup() {
        assert_eq!(catalog().len(), 4);
        assert!(get_template("STUDENT_PROGRESS").is_some());
        assert_eq!(get_template("class-performance").unwrap().title, "Class Performance Report");
        assert!(get_template("REPORT_CARD").is_none());
    }

    #[test]
    fn at_risk_template_sections() {
        let template = template_for(ReportType::AtRiskStudents);
        let ids: Vec<&str> = template.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["header", "risk_overview", "performance_overview", "risk_students", "footer"]
        );
    }

    #[test]
    fn sections_follow_template_order() {
        let processed = process(ReportType::StudentProgress, &sample_data());
        let ids: Vec<&str> = processed.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "header",
                "student_info",
                "academic_summary",
                "subject_performance",
                "progress_chart",
                "teacher_comments",
                "footer"
            ]
        );
        assert_eq!(processed.title, "Student Progress Report");
        assert_eq!(processed.generated_at, fixed_time());
    }

    #[test]
    fn academic_summary_uses_grades() {
        let processed = process(ReportType::StudentProgress, &sample_data());
        let section = processed.section("academic_summary").unwrap();
        let SectionContent::SummaryStats(SummaryStats::AcademicSummary(summary)) = &section.content
        else {
            panic!("expected academic summary, got {:?}", section.content);
        };
        assert!((summary.overall_average - 64.75).abs() < 1e-9);
        assert_eq!(summary.highest_score, 88.0);
        assert_eq!(summary.lowest_score, 35.0);
        assert_eq!(summary.total_assessments, 4);
        assert!((summary.pass_rate - 75.0).abs() < 1e-9);
        assert_eq!(summary.overall_grade, "C");
    }

    #[test]
    fn performance_overview_uses_student_averages() {
        let stats = summary_stats(
            SummaryMode::PerformanceOverview,
            &sample_data(),
            &StatsPolicy::default(),
        );
        let SummaryStats::PerformanceOverview(overview) = stats else {
            panic!("expected performance overview");
        };
        assert_eq!(overview.student_count, 3);
        assert_eq!(overview.highest_average, 81.0);
        assert_eq!(overview.lowest_average, 38.5);
        assert!((overview.pass_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(overview.grade_distribution.a, 1);
        assert_eq!(overview.grade_distribution.f, 1);
    }

    #[test]
    fn attendance_stats_count_statuses_and_days() {
        let stats =
            summary_stats(SummaryMode::AttendanceStats, &sample_data(), &StatsPolicy::default());
        let SummaryStats::AttendanceStats(attendance) = stats else {
            panic!("expected attendance stats");
        };
        assert_eq!(attendance.total_records, 4);
        assert_eq!(
            (attendance.present, attendance.absent, attendance.late, attendance.excused),
            (1, 1, 1, 1)
        );
        assert_eq!(attendance.attendance_rate, 50.0);
        assert_eq!(attendance.days_recorded, 2);
        assert_eq!(attendance.highest_daily_rate, 100.0);
        assert_eq!(attendance.lowest_daily_rate, 0.0);
        assert_eq!(attendance.average_daily_rate, 50.0);
    }

    #[test]
    fn empty_data_degrades_to_zero_summaries() {
        let data = ReportData::default();
        for report_type in ReportType::ALL {
            let processed = process(report_type, &data);
            assert_eq!(processed.sections.len(), template_for(report_type).sections.len());
        }
        let SummaryStats::AcademicSummary(summary) =
            summary_stats(SummaryMode::AcademicSummary, &data, &StatsPolicy::default())
        else {
            panic!("expected academic summary");
        };
        assert_eq!(summary.overall_average, 0.0);
        assert_eq!(summary.overall_grade, "N/A");
    }

    #[test]
    fn subject_table_groups_by_subject() {
        let rows = subject_rows(&sample_data(), &StatsPolicy::default());
        let subjects: Vec<&str> = rows.iter().map(|row| row.subject.as_str()).collect();
        // "sci" is not in the subject list and keeps its id
        assert_eq!(subjects, vec!["Mathematics", "English", "sci"]);
        assert_eq!(rows[0].average, 80.0);
        assert_eq!(rows[0].assessments, 2);
        assert_eq!(rows[0].grade, "A");
        assert_eq!(rows[1].pass_rate, 0.0);
        assert_eq!(rows[1].grade, "F");
    }

    #[test]
    fn ranking_table_orders_by_average() {
        let rows = ranking_rows(&sample_data(), &StatsPolicy::default());
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].student, "Jules \"JJ\" Moreno");
        assert_eq!(rows[2].student, "Kiara Patel");
        assert_eq!(rows[1].average, 64.8);
        assert_eq!(rows[2].grade, "F");
    }

    #[test]
    fn alert_table_puts_high_risk_first() {
        let rows = alert_rows(&sample_data());
        assert_eq!(rows[0].student, "Kiara Patel");
        assert_eq!(rows[0].reasons, "Average below pass mark; Attendance below 85%");
        assert_eq!(rows[1].risk_level, RiskLevel::Low);
    }

    #[test]
    fn chart_passes_caller_series_through() {
        let data = sample_data();
        let processed = process(ReportType::ClassPerformance, &data);

        let SectionContent::Chart(pie) = &processed.section("grade_distribution").unwrap().content
        else {
            panic!("expected chart");
        };
        assert_eq!(pie.chart_type, ChartType::Pie);
        assert_eq!(pie.config.data, data.grade_distribution);

        let SectionContent::Chart(bar) = &processed.section("subject_comparison").unwrap().content
        else {
            panic!("expected chart");
        };
        assert_eq!(bar.config.data, serde_json::json!([]));
        assert_eq!(bar.config.y_axis, "Average Score");
    }

    #[test]
    fn text_block_prefers_comments() {
        let mut data = sample_data();
        let processed = process(ReportType::StudentProgress, &data);
        assert_eq!(
            processed.section("teacher_comments").unwrap().content,
            SectionContent::TextBlock {
                text: "No comments recorded.".to_string()
            }
        );

        data.comments
            .insert("teacher_comments".to_string(), "Strong term in maths.".to_string());
        let processed = process(ReportType::StudentProgress, &data);
        assert_eq!(
            processed.section("teacher_comments").unwrap().content,
            SectionContent::TextBlock {
                text: "Strong term in maths.".to_string()
            }
        );
    }

    #[test]
    fn report_title_overrides_template_title() {
        let mut data = sample_data();
        data.report_title = Some("Spring Review".to_string());
        let processed = process(ReportType::ClassPerformance, &data);
        assert_eq!(processed.title, "Spring Review");
        let SectionContent::Header(header) = &processed.sections[0].content else {
            panic!("expected header");
        };
        assert_eq!(header.school_name.as_deref(), Some("Group Scholar Academy"));
        assert_eq!(header.period.as_deref(), Some("Spring 2026"));
    }

    #[test]
    fn unknown_section_types_become_placeholders() {
        let template: ReportTemplate = serde_json::from_str(
            r#"{
                "id": "CUSTOM",
                "title": "Custom Report",
                "sections": [
                    {"id": "header", "type": "header", "required": true},
                    {"id": "oops", "type": "sumary_stats"},
                    {"id": "academic_summary", "type": "summary_stats", "mode": "academic_summary"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(template.sections[1].kind, SectionKind::Unknown);

        let processed = process_template(&template, &sample_data());
        assert_eq!(processed.sections.len(), 3);
        assert_eq!(
            processed.sections[1].content,
            SectionContent::Unknown {
                content: UNKNOWN_SECTION.to_string()
            }
        );
        assert!(matches!(
            processed.sections[2].content,
            SectionContent::SummaryStats(SummaryStats::AcademicSummary(_))
        ));
    }

    #[test]
    fn data_hash_tracks_input() {
        let data = sample_data();
        assert_eq!(data_hash(&data), data_hash(&data.clone()));
        assert_eq!(data_hash(&data).len(), 8);

        let mut changed = data.clone();
        changed.period = Some("Summer 2026".to_string());
        assert_ne!(data_hash(&data), data_hash(&changed));
    }

    #[test]
    fn table_rows_keep_column_order() {
        let processed = process(ReportType::ClassPerformance, &sample_data());
        let rows = processed
            .section("student_rankings")
            .unwrap()
            .content
            .table_rows()
            .unwrap()
            .unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["rank", "student", "average", "grade", "attendanceRate"]);
        assert!(processed.section("header").unwrap().content.table_rows().is_none());
    }
}
