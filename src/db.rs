use std::collections::BTreeMap;

use anyhow::Context;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use groupscholar_report_engine::models::{
    AttendanceRecord, AttendanceStatus, ClassInfo, GradeRecord, ReportData, Student,
    StudentSummary, Subject,
};
use groupscholar_report_engine::stats;

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub class_name: String,
    pub year_group: Option<String>,
}

/// Which students a context is built for.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Class(&'a str),
    Student(&'a str),
}

impl Scope<'_> {
    fn filter(&self) -> &'static str {
        match self {
            Scope::Class(_) => "s.class_name = $1",
            Scope::Student(_) => "s.email = $1",
        }
    }

    fn value(&self) -> &str {
        match self {
            Scope::Class(value) | Scope::Student(value) => value,
        }
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@groupscholar.com",
            "7B",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@groupscholar.com",
            "7B",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@groupscholar.com",
            "7B",
        ),
    ];

    for (id, name, email, class_name) in students {
        sqlx::query(
            r#"
            INSERT INTO school_reporting.students (id, full_name, email, class_name, year_group)
            VALUES ($1, $2, $3, $4, 'Year 7')
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_name = EXCLUDED.class_name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(class_name)
        .execute(pool)
        .await?;
    }

    let subjects = vec![
        ("mathematics", "Mathematics", "Ms. Okafor"),
        ("english", "English", "Mr. Haddad"),
        ("science", "Science", "Dr. Lindqvist"),
    ];

    for (id, name, teacher) in subjects {
        sqlx::query(
            r#"
            INSERT INTO school_reporting.subjects (id, name, teacher)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, teacher = EXCLUDED.teacher
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(teacher)
        .execute(pool)
        .await?;
    }

    let date = |month, day| NaiveDate::from_ymd_opt(2026, month, day).context("invalid date");
    let avery = "avery.lee@groupscholar.com";
    let jules = "jules.moreno@groupscholar.com";
    let kiara = "kiara.patel@groupscholar.com";
    let grades = vec![
        ("seed-001", avery, "mathematics", 78.0, "Unit test 1", date(1, 20)?),
        ("seed-002", avery, "mathematics", 71.0, "Unit test 2", date(2, 17)?),
        ("seed-003", avery, "english", 64.0, "Essay", date(2, 3)?),
        ("seed-004", jules, "mathematics", 91.0, "Unit test 1", date(1, 20)?),
        ("seed-005", jules, "science", 84.0, "Lab report", date(2, 10)?),
        ("seed-006", kiara, "english", 46.0, "Essay", date(2, 3)?),
        ("seed-007", kiara, "science", 33.0, "Lab report", date(2, 10)?),
        ("seed-008", kiara, "mathematics", 29.0, "Unit test 2", date(2, 17)?),
    ];

    for (source_key, email, subject_id, score, assessment, assessed_on) in grades {
        let student_id = student_id_for(pool, email).await?;
        sqlx::query(
            r#"
            INSERT INTO school_reporting.grades
            (id, student_id, subject_id, score, assessment, assessed_on, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(subject_id)
        .bind(score)
        .bind(assessment)
        .bind(assessed_on)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let attendance = vec![
        ("avery.lee@groupscholar.com", date(2, 2)?, "present"),
        ("avery.lee@groupscholar.com", date(2, 3)?, "late"),
        ("jules.moreno@groupscholar.com", date(2, 2)?, "present"),
        ("jules.moreno@groupscholar.com", date(2, 3)?, "present"),
        ("kiara.patel@groupscholar.com", date(2, 2)?, "absent"),
        ("kiara.patel@groupscholar.com", date(2, 3)?, "excused"),
    ];

    for (email, attended_on, status) in attendance {
        let student_id = student_id_for(pool, email).await?;
        sqlx::query(
            r#"
            INSERT INTO school_reporting.attendance (id, student_id, attended_on, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id, attended_on) DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(attended_on)
        .bind(status)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn student_id_for(pool: &PgPool, email: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM school_reporting.students WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await
        .with_context(|| format!("no student with email {email}"))?;
    Ok(row.get("id"))
}

/// Stable subject key derived from its display name.
pub fn subject_key(name: &str) -> String {
    let key: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { '-' })
        .collect();
    key.trim_matches('-').to_string()
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        class_name: String,
        year_group: Option<String>,
        subject: String,
        score: f64,
        assessed_on: NaiveDate,
        assessment: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO school_reporting.students
            (id, full_name, email, class_name, year_group)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_name = EXCLUDED.class_name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(&row.email)
        .bind(&row.class_name)
        .bind(&row.year_group)
        .fetch_one(pool)
        .await?
        .get("id");

        let subject_id = subject_key(&row.subject);
        sqlx::query(
            r#"
            INSERT INTO school_reporting.subjects (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&subject_id)
        .bind(row.subject.trim())
        .execute(pool)
        .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO school_reporting.grades
            (id, student_id, subject_id, score, assessment, assessed_on, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(&subject_id)
        .bind(row.score)
        .bind(&row.assessment)
        .bind(row.assessed_on)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn fetch_students(pool: &PgPool, scope: Scope<'_>) -> anyhow::Result<Vec<StudentRow>> {
    let query = format!(
        "SELECT s.id, s.full_name, s.email, s.class_name, s.year_group \
         FROM school_reporting.students s \
         WHERE {} \
         ORDER BY s.full_name",
        scope.filter()
    );
    let rows = sqlx::query(&query).bind(scope.value()).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| StudentRow {
            id: row.get("id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
            class_name: row.get("class_name"),
            year_group: row.get("year_group"),
        })
        .collect())
}

async fn fetch_subjects(pool: &PgPool) -> anyhow::Result<Vec<Subject>> {
    let rows = sqlx::query("SELECT id, name, teacher FROM school_reporting.subjects ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| Subject {
            id: row.get("id"),
            name: row.get("name"),
            teacher: row.get("teacher"),
        })
        .collect())
}

async fn fetch_grades(pool: &PgPool, scope: Scope<'_>) -> anyhow::Result<Vec<GradeRecord>> {
    let query = format!(
        "SELECT g.student_id, g.subject_id, g.score, g.assessment, g.assessed_on \
         FROM school_reporting.grades g \
         JOIN school_reporting.students s ON s.id = g.student_id \
         WHERE {} \
         ORDER BY g.assessed_on",
        scope.filter()
    );
    let rows = sqlx::query(&query).bind(scope.value()).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let student_id: Uuid = row.get("student_id");
            GradeRecord {
                student_id: Some(student_id.to_string()),
                subject_id: row.get("subject_id"),
                score: row.get("score"),
                date: Some(row.get("assessed_on")),
                assessment: row.get("assessment"),
            }
        })
        .collect())
}

async fn fetch_attendance(
    pool: &PgPool,
    scope: Scope<'_>,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let query = format!(
        "SELECT a.student_id, a.attended_on, a.status \
         FROM school_reporting.attendance a \
         JOIN school_reporting.students s ON s.id = a.student_id \
         WHERE {} \
         ORDER BY a.attended_on",
        scope.filter()
    );
    let rows = sqlx::query(&query).bind(scope.value()).fetch_all(pool).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.get("status");
        let Some(status) = AttendanceStatus::parse(&status) else {
            warn!(status = %status, "skipping attendance row with unknown status");
            continue;
        };
        let student_id: Uuid = row.get("student_id");
        records.push(AttendanceRecord {
            student_id: Some(student_id.to_string()),
            date: row.get("attended_on"),
            status,
        });
    }
    Ok(records)
}

pub async fn fetch_class_context(pool: &PgPool, class_name: &str) -> anyhow::Result<ReportData> {
    let scope = Scope::Class(class_name);
    let students = fetch_students(pool, scope).await?;
    if students.is_empty() {
        anyhow::bail!("no students found in class {class_name}");
    }
    let subjects = fetch_subjects(pool).await?;
    let grades = fetch_grades(pool, scope).await?;
    let attendance = fetch_attendance(pool, scope).await?;
    info!(
        class = class_name,
        students = students.len(),
        grades = grades.len(),
        "loaded class context"
    );
    Ok(build_class_context(class_name, &students, subjects, grades, attendance))
}

pub async fn fetch_student_context(pool: &PgPool, email: &str) -> anyhow::Result<ReportData> {
    let scope = Scope::Student(email);
    let students = fetch_students(pool, scope).await?;
    let student = students
        .into_iter()
        .next()
        .with_context(|| format!("no student with email {email}"))?;
    let subjects = fetch_subjects(pool).await?;
    let grades = fetch_grades(pool, scope).await?;
    let attendance = fetch_attendance(pool, scope).await?;
    info!(student = email, grades = grades.len(), "loaded student context");
    Ok(build_student_context(&student, subjects, grades, attendance))
}

fn summarize_student(
    row: &StudentRow,
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
) -> StudentSummary {
    let id = row.id.to_string();
    let scores: Vec<f64> = grades
        .iter()
        .filter(|grade| grade.student_id.as_deref() == Some(id.as_str()))
        .map(|grade| grade.score)
        .collect();
    let days: Vec<&AttendanceRecord> = attendance
        .iter()
        .filter(|record| record.student_id.as_deref() == Some(id.as_str()))
        .collect();
    let attended = days.iter().filter(|record| record.status.attended()).count();

    StudentSummary {
        name: row.full_name.clone(),
        average: stats::mean(&stats::finite_scores(&scores)),
        attendance_rate: (!days.is_empty()).then(|| stats::percent(attended, days.len())),
        id,
    }
}

/// `[{subject, average}]` for every subject with at least one grade.
pub fn subject_comparison(grades: &[GradeRecord], subjects: &[Subject]) -> Value {
    let mut totals: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for grade in grades {
        totals.entry(grade.subject_id.as_str()).or_default().push(grade.score);
    }

    let rows: Vec<Value> = totals
        .into_iter()
        .map(|(subject_id, scores)| {
            let name = subjects
                .iter()
                .find(|subject| subject.id == subject_id)
                .map(|subject| subject.name.as_str())
                .unwrap_or(subject_id);
            json!({ "subject": name, "average": stats::round_to(stats::mean(&scores), 1) })
        })
        .collect();
    Value::Array(rows)
}

/// `[{date, value}]` with the mean score per assessment date.
pub fn daily_trend(grades: &[GradeRecord]) -> Value {
    let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for grade in grades {
        if let Some(date) = grade.date {
            by_date.entry(date).or_default().push(grade.score);
        }
    }

    Value::Array(
        by_date
            .into_iter()
            .map(|(date, scores)| {
                json!({ "date": date, "value": stats::round_to(stats::mean(&scores), 1) })
            })
            .collect(),
    )
}

pub fn grade_distribution(averages: &[f64]) -> Value {
    let grades = stats::class_metrics(averages).grade_distribution;
    json!([
        { "grade": "A", "count": grades.a },
        { "grade": "B", "count": grades.b },
        { "grade": "C", "count": grades.c },
        { "grade": "D", "count": grades.d },
        { "grade": "F", "count": grades.f },
    ])
}

fn period_label(grades: &[GradeRecord]) -> Option<String> {
    let first = grades.iter().filter_map(|grade| grade.date).min()?;
    let last = grades.iter().filter_map(|grade| grade.date).max()?;
    Some(format!("{first} to {last}"))
}

pub fn build_class_context(
    class_name: &str,
    students: &[StudentRow],
    subjects: Vec<Subject>,
    grades: Vec<GradeRecord>,
    attendance: Vec<AttendanceRecord>,
) -> ReportData {
    let summaries: Vec<StudentSummary> = students
        .iter()
        .map(|row| summarize_student(row, &grades, &attendance))
        .collect();
    let averages: Vec<f64> = summaries.iter().map(|summary| summary.average).collect();

    ReportData {
        class: Some(ClassInfo {
            name: class_name.to_string(),
            teacher: None,
            year_group: students.iter().find_map(|row| row.year_group.clone()),
            room: None,
        }),
        period: period_label(&grades),
        subject_comparison: subject_comparison(&grades, &subjects),
        trend_data: daily_trend(&grades),
        grade_distribution: grade_distribution(&averages),
        students: summaries,
        subjects,
        grades,
        attendance,
        ..ReportData::default()
    }
}

pub fn build_student_context(
    row: &StudentRow,
    subjects: Vec<Subject>,
    grades: Vec<GradeRecord>,
    attendance: Vec<AttendanceRecord>,
) -> ReportData {
    let summary = summarize_student(row, &grades, &attendance);

    ReportData {
        student: Some(Student {
            id: row.id.to_string(),
            name: row.full_name.clone(),
            class_name: Some(row.class_name.clone()),
            year_group: row.year_group.clone(),
            email: Some(row.email.clone()),
        }),
        period: period_label(&grades),
        subject_comparison: subject_comparison(&grades, &subjects),
        trend_data: daily_trend(&grades),
        students: vec![summary],
        subjects,
        grades,
        attendance,
        ..ReportData::default()
    }
}
