use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

/// Connection-level failure reported by the market-data session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    pub code: i32,
    pub message: String,
    pub insecure: bool,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.insecure {
            write!(
                f,
                "insecure connection detected (code {}): {}; reconnect the data farms and retry",
                self.code, self.message
            )
        } else {
            write!(
                f,
                "connection failure (code {}): {}; reconnect required",
                self.code, self.message
            )
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Calamine(#[from] calamine::Error),
    #[error(transparent)]
    Xlsx(#[from] calamine::XlsxError),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error("start date [{start}] can not be greater than end date [{end}]")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("{0}")]
    Connection(ConnectionFailure),
    #[error("required artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, AppError::Connection(_))
    }
}
