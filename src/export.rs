//! Serializers from a [`ProcessedTemplate`] to the export formats.
//!
//! Nothing here touches the filesystem. `pdf` output is HTML meant for an
//! external print-to-PDF step and `excel` output is a workbook descriptor for
//! an external spreadsheet writer.

use std::fmt::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{ReportError, Result};
use crate::report::{
    ChartContent, ClassDetailsContent, FooterContent, HeaderContent, ProcessedSection,
    ProcessedTemplate, SectionContent, StudentDetailsContent, SummaryStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Excel,
    Csv,
    Html,
    Json,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Excel => "excel",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv",
            ExportFormat::Html => "text/html",
            ExportFormat::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "csv" => Ok(ExportFormat::Csv),
            "html" => Ok(ExportFormat::Html),
            "json" => Ok(ExportFormat::Json),
            _ => Err(ReportError::UnsupportedFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Pretty-print JSON output.
    pub pretty: bool,
    /// Section id of the table to export as CSV. Defaults to the first table.
    pub table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub title: String,
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactContent {
    Text(String),
    Workbook(Workbook),
}

impl ArtifactContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArtifactContent::Text(text) => Some(text),
            ArtifactContent::Workbook(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub content: ArtifactContent,
    pub filename: String,
    pub mime_type: String,
}

/// `<title>_<millis>.<ext>` with spaces turned into underscores.
pub fn export_filename(processed: &ProcessedTemplate, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        processed.title.replace(' ', "_"),
        processed.generated_at.timestamp_millis(),
        format.extension()
    )
}

pub fn export_named(
    processed: &ProcessedTemplate,
    format: &str,
    options: &ExportOptions,
) -> Result<ExportArtifact> {
    export(processed, format.parse()?, options)
}

pub fn export(
    processed: &ProcessedTemplate,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<ExportArtifact> {
    let content = match format {
        ExportFormat::Json => ArtifactContent::Text(if options.pretty {
            serde_json::to_string_pretty(processed)?
        } else {
            serde_json::to_string(processed)?
        }),
        ExportFormat::Html | ExportFormat::Pdf => ArtifactContent::Text(render_html(processed)),
        ExportFormat::Csv => {
            ArtifactContent::Text(export_csv(processed, options.table.as_deref())?)
        }
        ExportFormat::Excel => ArtifactContent::Workbook(export_workbook(processed)?),
    };

    let artifact = ExportArtifact {
        format,
        content,
        filename: export_filename(processed, format),
        mime_type: format.mime_type().to_string(),
    };
    info!(
        report = %processed.id,
        format = format.as_str(),
        filename = %artifact.filename,
        "report exported"
    );
    Ok(artifact)
}

fn exportable_tables(processed: &ProcessedTemplate) -> impl Iterator<Item = &ProcessedSection> {
    processed
        .sections
        .iter()
        .filter(|section| section.kind.is_exportable_table())
}

fn section_rows(section: &ProcessedSection) -> Result<Vec<Map<String, Value>>> {
    match section.content.table_rows() {
        Some(rows) => Ok(rows?),
        None => Ok(Vec::new()),
    }
}

fn export_csv(processed: &ProcessedTemplate, table: Option<&str>) -> Result<String> {
    let section = match table {
        Some(id) => exportable_tables(processed)
            .find(|section| section.id == id)
            .ok_or_else(|| ReportError::TableNotFound(id.to_string()))?,
        None => {
            let mut tables = exportable_tables(processed);
            let first = tables
                .next()
                .ok_or_else(|| ReportError::NoTabularData(ExportFormat::Csv.as_str().to_string()))?;
            if tables.next().is_some() {
                warn!(section = %first.id, "several tables available, exporting the first");
            }
            first
        }
    };

    rows_to_csv(&section_rows(section)?)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        // f64 Display drops the trailing ".0" that serde_json keeps
        Some(Value::Number(number)) => match number.as_f64() {
            Some(value) if number.is_f64() => value.to_string(),
            _ => number.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

/// Header line from the first row's keys, then every value quoted with
/// embedded quotes doubled.
pub fn rows_to_csv(rows: &[Map<String, Value>]) -> Result<String> {
    let Some(first) = rows.first() else {
        return Ok(String::new());
    };
    let headers: Vec<&str> = first.keys().map(String::as_str).collect();

    let mut header_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    header_writer.write_record(&headers)?;
    let buffer = header_writer
        .into_inner()
        .map_err(|err| ReportError::Io(err.into_error()))?;

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(buffer);
    for row in rows {
        writer.write_record(headers.iter().map(|header| cell(row.get(*header))))?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|err| ReportError::Io(err.into_error()))?;

    Ok(String::from_utf8(buffer)?)
}

fn export_workbook(processed: &ProcessedTemplate) -> Result<Workbook> {
    let sheets = exportable_tables(processed)
        .map(|section| {
            Ok(Sheet {
                name: section.id.clone(),
                rows: section_rows(section)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if sheets.is_empty() {
        return Err(ReportError::NoTabularData(ExportFormat::Excel.as_str().to_string()));
    }

    Ok(Workbook {
        title: processed.title.clone(),
        sheets,
    })
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn humanize(key: &str) -> String {
    let mut label = String::with_capacity(key.len() + 4);
    for (index, ch) in key.chars().enumerate() {
        if index == 0 {
            label.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            label.push(' ');
            label.push(ch);
        } else {
            label.push(ch);
        }
    }
    label
}

const STYLE: &str = "body{font-family:Arial,sans-serif;margin:24px;color:#222}\
h1{margin-bottom:4px}h2{border-bottom:1px solid #ccc;padding-bottom:4px}\
table{border-collapse:collapse;width:100%}\
th,td{border:1px solid #ddd;padding:6px;text-align:left}\
th{background:#f3f3f3}.stat-grid{display:flex;flex-wrap:wrap;gap:12px}\
.stat{border:1px solid #eee;padding:8px;min-width:140px}\
.stat .label{display:block;color:#666;font-size:12px}\
.chart-placeholder{border:1px dashed #aaa;padding:12px}\
footer{margin-top:32px;color:#666;font-size:12px}";

pub fn render_html(processed: &ProcessedTemplate) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "<!DOCTYPE html>");
    let _ = writeln!(output, "<html lang=\"en\">");
    let _ = writeln!(
        output,
        "<head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head>",
        escape_html(&processed.title),
        STYLE
    );
    let _ = writeln!(output, "<body>");
    let _ = writeln!(
        output,
        "<div class=\"report\" data-report=\"{}\">",
        escape_html(&processed.id)
    );

    for section in processed.sections.iter() {
        let _ = writeln!(output, "{}", render_section(section));
    }

    let _ = writeln!(output, "</div>");
    let _ = writeln!(output, "</body>");
    let _ = writeln!(output, "</html>");
    output
}

fn render_section(section: &ProcessedSection) -> String {
    match &section.content {
        SectionContent::Header(header) => render_header(header),
        SectionContent::StudentDetails(student) => render_student(student),
        SectionContent::ClassDetails(class) => render_class(class),
        SectionContent::SummaryStats(summary) => render_summary(summary),
        SectionContent::SubjectTable { .. }
        | SectionContent::RankingTable { .. }
        | SectionContent::AlertTable { .. } => render_table(section),
        SectionContent::Chart(chart) => render_chart(chart),
        SectionContent::TextBlock { text } => format!(
            "<section class=\"text-block\"><p>{}</p></section>",
            escape_html(text)
        ),
        SectionContent::Footer(footer) => render_footer(footer),
        SectionContent::Unknown { content } => format!(
            "<section class=\"unknown\"><p>{}</p></section>",
            escape_html(content)
        ),
    }
}

fn render_header(header: &HeaderContent) -> String {
    let mut html = String::from("<header class=\"report-header\">");
    let _ = write!(html, "<h1>{}</h1>", escape_html(&header.title));
    if let Some(school) = &header.school_name {
        let _ = write!(html, "<p class=\"school\">{}</p>", escape_html(school));
    }
    if let Some(period) = &header.period {
        let _ = write!(html, "<p class=\"period\">{}</p>", escape_html(period));
    }
    let _ = write!(
        html,
        "<p class=\"generated\">Generated {}</p></header>",
        header.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    html
}

fn definition_list(heading: &str, class: &str, items: &[(&str, Option<String>)]) -> String {
    let mut html = format!("<section class=\"{class}\"><h2>{heading}</h2><dl>");
    for (label, value) in items {
        let value = value.as_deref().unwrap_or("-");
        let _ = write!(html, "<dt>{}</dt><dd>{}</dd>", label, escape_html(value));
    }
    html.push_str("</dl></section>");
    html
}

fn render_student(student: &StudentDetailsContent) -> String {
    definition_list(
        "Student Details",
        "student-details",
        &[
            ("Name", student.name.clone()),
            ("Student ID", student.id.clone()),
            ("Class", student.class_name.clone()),
            ("Year Group", student.year_group.clone()),
            ("Email", student.email.clone()),
        ],
    )
}

fn render_class(class: &ClassDetailsContent) -> String {
    definition_list(
        "Class Details",
        "class-details",
        &[
            ("Class", class.name.clone()),
            ("Teacher", class.teacher.clone()),
            ("Year Group", class.year_group.clone()),
            ("Room", class.room.clone()),
            ("Students", Some(class.student_count.to_string())),
            ("Subjects", Some(class.subject_count.to_string())),
        ],
    )
}

fn render_summary(summary: &SummaryStats) -> String {
    let mut html = format!(
        "<section class=\"summary-stats\"><h2>{}</h2><div class=\"stat-grid\">",
        summary.heading()
    );
    for (label, value) in summary.items() {
        let _ = write!(
            html,
            "<div class=\"stat\"><span class=\"label\">{}</span>\
             <span class=\"value\">{}</span></div>",
            label,
            escape_html(&value)
        );
    }
    html.push_str("</div></section>");
    html
}

fn render_table(section: &ProcessedSection) -> String {
    let rows = section_rows(section).unwrap_or_default();
    let mut html = format!(
        "<section class=\"table-section\" id=\"{}\"><h2>{}</h2>",
        escape_html(&section.id),
        escape_html(&humanize(&section.id.replace('_', " ")))
    );

    let Some(first) = rows.first() else {
        html.push_str("<p class=\"empty\">No data available.</p></section>");
        return html;
    };

    html.push_str("<table><thead><tr>");
    for key in first.keys() {
        let _ = write!(html, "<th>{}</th>", escape_html(&humanize(key)));
    }
    html.push_str("</tr></thead><tbody>");
    for row in rows.iter() {
        html.push_str("<tr>");
        for key in first.keys() {
            let _ = write!(html, "<td>{}</td>", escape_html(&cell(row.get(key))));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table></section>");
    html
}

fn render_chart(chart: &ChartContent) -> String {
    let points = chart.config.data.as_array().map_or(0, Vec::len);
    format!(
        "<div class=\"chart-placeholder\" data-chart-type=\"{}\"><h3>{}</h3>\
         <p>{} by {} ({} data points, rendered by the dashboard)</p></div>",
        chart.chart_type.as_str(),
        escape_html(&chart.config.title),
        escape_html(&chart.config.y_axis),
        escape_html(&chart.config.x_axis),
        points
    )
}

fn render_footer(footer: &FooterContent) -> String {
    let mut html = String::from("<footer>");
    let _ = write!(html, "<p>{}</p>", escape_html(&footer.note));
    if let Some(school) = &footer.school_name {
        let _ = write!(html, "<p>{}</p>", escape_html(school));
    }
    let _ = write!(
        html,
        "<p>Generated {}</p></footer>",
        footer.generated_at.to_rfc3339()
    );
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportData;
    use crate::report::tests::{fixed_time, sample_data};
    use crate::report::{process_template_with, template_for, ReportTemplate, ReportType};
    use crate::stats::StatsPolicy;

    fn processed(report_type: ReportType, data: &ReportData) -> ProcessedTemplate {
        process_template_with(
            &template_for(report_type),
            data,
            &StatsPolicy::default(),
            fixed_time(),
        )
    }

    #[test]
    fn json_export_round_trips() {
        for report_type in ReportType::ALL {
            let original = processed(report_type, &sample_data());
            let artifact =
                export(&original, ExportFormat::Json, &ExportOptions::default()).unwrap();
            let text = artifact.content.as_text().unwrap();
            let parsed: ProcessedTemplate = serde_json::from_str(text).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn pretty_json_is_multiline() {
        let original = processed(ReportType::StudentProgress, &sample_data());
        let options = ExportOptions {
            pretty: true,
            ..ExportOptions::default()
        };
        let artifact = export(&original, ExportFormat::Json, &options).unwrap();
        assert!(artifact.content.as_text().unwrap().contains('\n'));
        assert_eq!(artifact.mime_type, "application/json");
    }

    #[test]
    fn filename_uses_title_and_millis() {
        let original = processed(ReportType::ClassPerformance, &sample_data());
        let artifact = export(&original, ExportFormat::Html, &ExportOptions::default()).unwrap();
        assert_eq!(
            artifact.filename,
            format!("Class_Performance_Report_{}.html", fixed_time().timestamp_millis())
        );
    }

    #[test]
    fn csv_requires_a_table_section() {
        let original = processed(ReportType::AttendanceSummary, &sample_data());
        let err = export(&original, ExportFormat::Csv, &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ReportError::NoTabularData(_)));

        let err = export(&original, ExportFormat::Excel, &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ReportError::NoTabularData(_)));
    }

    #[test]
    fn csv_quotes_values_and_doubles_quotes() {
        let original = processed(ReportType::ClassPerformance, &sample_data());
        let artifact = export(&original, ExportFormat::Csv, &ExportOptions::default()).unwrap();
        let text = artifact.content.as_text().unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "rank,student,average,grade,attendanceRate");
        assert_eq!(lines[1], "\"1\",\"Jules \"\"JJ\"\" Moreno\",\"81\",\"A\",\"97.5\"");
        assert_eq!(lines.len(), 4);
        assert_eq!(artifact.mime_type, "text/csv");
    }

    #[test]
    fn csv_can_select_a_table() {
        let original = processed(ReportType::StudentProgress, &sample_data());
        let options = ExportOptions {
            table: Some("subject_performance".to_string()),
            ..ExportOptions::default()
        };
        let text = export(&original, ExportFormat::Csv, &options)
            .unwrap()
            .content
            .as_text()
            .unwrap()
            .to_string();
        assert!(text.starts_with("subject,average,highest,lowest,assessments,passRate,grade\n"));

        let options = ExportOptions {
            table: Some("missing".to_string()),
            ..ExportOptions::default()
        };
        let err = export(&original, ExportFormat::Csv, &options).unwrap_err();
        assert!(matches!(err, ReportError::TableNotFound(_)));
    }

    #[test]
    fn empty_rows_give_empty_csv() {
        assert_eq!(rows_to_csv(&[]).unwrap(), "");
    }

    #[test]
    fn null_cells_are_empty_strings() {
        let mut row = Map::new();
        row.insert("name".to_string(), Value::String("Ada".to_string()));
        row.insert("rate".to_string(), Value::Null);
        assert_eq!(rows_to_csv(&[row]).unwrap(), "name,rate\n\"Ada\",\"\"\n");
    }

    #[test]
    fn whole_number_floats_drop_the_fraction() {
        let row: Map<String, Value> = serde_json::from_str(
            r#"{"average": 81.0, "rate": 97.5, "rank": 2, "negative": -4.0}"#,
        )
        .unwrap();
        assert_eq!(
            rows_to_csv(&[row]).unwrap(),
            "average,rate,rank,negative\n\"81\",\"97.5\",\"2\",\"-4\"\n"
        );
    }

    #[test]
    fn excel_builds_one_sheet_per_table() {
        let original = processed(ReportType::ClassPerformance, &sample_data());
        let artifact = export(&original, ExportFormat::Excel, &ExportOptions::default()).unwrap();
        let ArtifactContent::Workbook(workbook) = artifact.content else {
            panic!("expected workbook");
        };
        assert_eq!(workbook.sheets.len(), 1);
        assert_eq!(workbook.sheets[0].name, "student_rankings");
        assert_eq!(workbook.sheets[0].rows.len(), 3);
        assert!(artifact.filename.ends_with(".xlsx"));
    }

    #[test]
    fn html_renders_every_section() {
        let original = processed(ReportType::StudentProgress, &sample_data());
        let html = render_html(&original);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Student Progress Report</h1>"));
        assert!(html.contains("Student Details"));
        assert!(html.contains("Academic Summary"));
        assert!(html.contains("<th>Pass Rate</th>"));
        assert!(html.contains("data-chart-type=\"line\""));
        assert!(html.contains("No comments recorded."));
        assert!(html.contains("<footer>"));
    }

    #[test]
    fn html_escapes_caller_text() {
        let mut data = sample_data();
        data.report_title = Some("Q1 <Review> & \"Notes\"".to_string());
        let html = render_html(&processed(ReportType::ClassPerformance, &data));
        assert!(html.contains("<h1>Q1 &lt;Review&gt; &amp; &quot;Notes&quot;</h1>"));
        assert!(html.contains("Jules &quot;JJ&quot; Moreno"));
    }

    #[test]
    fn pdf_is_html_staged_for_printing() {
        let original = processed(ReportType::AtRiskStudents, &sample_data());
        let pdf = export(&original, ExportFormat::Pdf, &ExportOptions::default()).unwrap();
        let html = export(&original, ExportFormat::Html, &ExportOptions::default()).unwrap();
        assert_eq!(pdf.content, html.content);
        assert_eq!(pdf.mime_type, "application/pdf");
        assert!(pdf.filename.ends_with(".pdf"));
    }

    #[test]
    fn unknown_sections_render_placeholder() {
        let template: ReportTemplate = serde_json::from_str(
            r#"{"id": "CUSTOM", "title": "Custom", "sections": [{"id": "x", "type": "heatmap"}]}"#,
        )
        .unwrap();
        let original =
            process_template_with(&template, &sample_data(), &StatsPolicy::default(), fixed_time());
        let html = render_html(&original);
        assert!(html.contains("<section class=\"unknown\"><p>Unknown section type</p></section>"));
    }

    #[test]
    fn unsupported_format_names_fail() {
        let original = processed(ReportType::StudentProgress, &sample_data());
        let err = export_named(&original, "docx", &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ReportError::UnsupportedFormat(ref name) if name == "docx"));
        assert!(export_named(&original, "XLSX", &ExportOptions::default()).is_ok());
    }

    #[test]
    fn humanize_splits_camel_case() {
        assert_eq!(humanize("attendanceRate"), "Attendance Rate");
        assert_eq!(humanize("rank"), "Rank");
    }
}
