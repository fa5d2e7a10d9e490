use chrono::{Local, NaiveDate};

use crate::error::{AppError, Result};

/// Storage and CLI date format.
pub const DATE_FORMAT: &str = "%Y%m%d";

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)?)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Every calendar date from `start` to `end`, both inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if start > end {
        return Err(AppError::InvalidDateRange { start, end });
    }
    Ok(start.iter_days().take_while(|day| *day <= end).collect())
}

pub fn current_human_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M").to_string()
}
