use chrono::NaiveTime;

use crate::error::{AppError, Result};

use super::{ExtractionConfig, ExtractorConfig, QueryConfig, ACCEPTED_BAR_SIZES, DURATION_UNITS};

/// Longest request or handshake timeout accepted, one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Validate extractor settings and surface every problem in one descriptive error.
pub fn validate_config(config: &ExtractorConfig) -> Result<()> {
    let mut issues = Vec::new();

    validate_extraction(&config.extraction, &mut issues);
    validate_query(&config.query, &mut issues);

    if config.connection.host.trim().is_empty() {
        issues.push("connection.host must not be empty".to_string());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "extractor config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_extraction(extraction: &ExtractionConfig, issues: &mut Vec<String>) {
    if extraction.max_attempts == 0 {
        issues.push("extraction.max_attempts must be at least 1".to_string());
    }
    if extraction.batch_size == 0 {
        issues.push("extraction.batch_size must be at least 1".to_string());
    }
    if extraction.workers == 0 {
        issues.push("extraction.workers must be at least 1".to_string());
    }
    for (name, secs) in [
        ("request_timeout_secs", extraction.request_timeout_secs),
        ("handshake_timeout_secs", extraction.handshake_timeout_secs),
    ] {
        if !(1..=MAX_TIMEOUT_SECS).contains(&secs) {
            issues.push(format!(
                "extraction.{name} must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}"
            ));
        }
    }
    if extraction.flush_every == 0 {
        issues.push("extraction.flush_every must be at least 1".to_string());
    }
}

fn validate_query(query: &QueryConfig, issues: &mut Vec<String>) {
    if let Err(err) = check_end_time(&query.end_time) {
        issues.push(format!("query.end_time: {err}"));
    }
    if let Err(err) = check_duration(&query.duration) {
        issues.push(format!("query.duration: {err}"));
    }
    if let Err(err) = check_bar_size(&query.bar_size) {
        issues.push(format!("query.bar_size: {err}"));
    }
    if query.what_to_show != "TRADES" {
        issues.push(format!(
            "query.what_to_show `{}` is not supported, only TRADES is",
            query.what_to_show
        ));
    }
    if query.use_rth != 1 {
        issues.push("query.use_rth must be 1 (regular trading hours only)".to_string());
    }
}

/// `HH:MM:SS` in 24-hour format.
pub fn check_end_time(value: &str) -> std::result::Result<(), String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .map(|_| ())
        .map_err(|_| format!("expected a 24-hour time `HH:MM:SS`, got `{value}`"))
}

/// A count and a unit separated by whitespace, e.g. `1 D`.
pub fn check_duration(value: &str) -> std::result::Result<(), String> {
    let err = || format!("expected `<digits> <unit>` with unit in {DURATION_UNITS:?}, got `{value}`");
    let mut parts = value.split_whitespace();
    let (Some(count), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(err());
    };
    if count.is_empty() || !count.chars().all(|c| c.is_ascii_digit()) {
        return Err(err());
    }
    if !DURATION_UNITS.contains(&unit) {
        return Err(err());
    }
    Ok(())
}

pub fn check_bar_size(value: &str) -> std::result::Result<(), String> {
    if ACCEPTED_BAR_SIZES.contains(&value) {
        Ok(())
    } else {
        Err(format!(
            "`{value}` is not an accepted bar size; choose from {ACCEPTED_BAR_SIZES:?}"
        ))
    }
}
