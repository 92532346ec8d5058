//! Statistics and report generation for Group Scholar school dashboards.
//!
//! - [`stats`]: class metrics, correlation and group comparisons
//! - [`trend`]: moving averages, regression lines, forecasts, seasonality
//! - [`report`]: the template catalog and section processing
//! - [`export`]: json, csv, excel, html and pdf serializers
//! - [`risk`]: at-risk student identification
//!
//! Everything in this crate is synchronous and works on caller-supplied data.

pub mod error;
pub mod export;
pub mod models;
pub mod report;
pub mod risk;
pub mod stats;
pub mod trend;

pub use error::{ReportError, Result};
pub use export::{export, ExportArtifact, ExportFormat, ExportOptions};
pub use report::{get_template, process_template, ProcessedTemplate, ReportTemplate, ReportType};
pub use stats::{class_metrics, comparative_analysis, correlation, ClassMetrics, StatsPolicy};
pub use trend::{trend_analysis, TrendResult};
