use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("No tabular data available for {0} export")]
    NoTabularData(String),

    #[error("Table section not found: {0}")]
    TableNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export produced invalid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
