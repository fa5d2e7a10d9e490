use std::path::Path;

use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;

use crate::api::TickerId;
use crate::error::{AppError, Context, Result};
use crate::extract::Session;
use crate::utils::date_range;

use super::{DateRecords, EntityBlob, Partition, Records};

#[derive(Debug, Serialize)]
struct SuccessRow<'a> {
    time_stamp: &'a str,
    ecode: TickerId,
    session: Session,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    average: f64,
    count: i64,
}

#[derive(Debug, Serialize)]
struct FailureRow<'a> {
    ecode: TickerId,
    status: bool,
    code: Option<i32>,
    message: &'a str,
    attempts: u32,
}

/// Rows written for one date. `None` when the partition directory was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub date: String,
    pub success_rows: Option<usize>,
    pub failure_rows: Option<usize>,
}

/// Flatten every date's blobs into `success.csv` and `failure.csv`.
pub fn convert(records: &Records, start: NaiveDate, end: NaiveDate) -> Result<Vec<ConvertSummary>> {
    let dates = date_range(start, end)?;
    let mut summaries = Vec::with_capacity(dates.len());
    for date in dates {
        let day = records.for_date(date);
        if !day.exists() {
            return Err(AppError::MissingArtifact(day.dir().to_path_buf()));
        }
        summaries.push(convert_date(&day)?);
    }
    Ok(summaries)
}

pub fn convert_date(day: &DateRecords) -> Result<ConvertSummary> {
    let mut summary = ConvertSummary {
        date: day.date().to_string(),
        ..ConvertSummary::default()
    };

    if day.partition_dir(Partition::Success).is_dir() {
        let blobs = load_partition(day, Partition::Success);
        let rows = write_success_csv(&blobs, &day.success_csv_path())?;
        info!("{}: wrote {rows} bars for {} tickers", day.date(), blobs.len());
        summary.success_rows = Some(rows);
    }

    if day.partition_dir(Partition::Failure).is_dir() {
        let blobs = load_partition(day, Partition::Failure);
        let rows = write_failure_csv(&blobs, &day.failure_csv_path())?;
        info!("{}: wrote {rows} failure rows for {} tickers", day.date(), blobs.len());
        summary.failure_rows = Some(rows);
    }

    Ok(summary)
}

fn load_partition(day: &DateRecords, partition: Partition) -> Vec<(TickerId, EntityBlob)> {
    day.list(partition)
        .into_iter()
        .filter_map(|id| match day.load(partition, id) {
            Ok(blob) => Some((id, blob)),
            Err(err) => {
                warn!("skipping unreadable blob {id}: {err}");
                None
            }
        })
        .collect()
}

fn write_success_csv(blobs: &[(TickerId, EntityBlob)], path: &Path) -> Result<usize> {
    let mut rows: Vec<SuccessRow<'_>> = blobs
        .iter()
        .flat_map(|(id, blob)| {
            blob.bar_data.iter().map(move |bar| SuccessRow {
                time_stamp: &bar.time_stamp,
                ecode: *id,
                session: bar.session,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                average: bar.average,
                count: bar.count,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.ecode.cmp(&b.ecode).then_with(|| a.time_stamp.cmp(b.time_stamp)));

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV writer for {}", path.display()))?;
    if rows.is_empty() {
        writer.write_record([
            "time_stamp", "ecode", "session", "open", "high", "low", "close", "volume",
            "average", "count",
        ])?;
    }
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

fn write_failure_csv(blobs: &[(TickerId, EntityBlob)], path: &Path) -> Result<usize> {
    let mut rows: Vec<FailureRow<'_>> = Vec::new();
    for (id, blob) in blobs {
        let meta = &blob.meta_data;
        if meta.error_stack.is_empty() {
            rows.push(FailureRow {
                ecode: *id,
                status: meta.status,
                code: None,
                message: "",
                attempts: meta.attempts,
            });
        }
        for entry in &meta.error_stack {
            rows.push(FailureRow {
                ecode: *id,
                status: meta.status,
                code: Some(entry.code),
                message: &entry.message,
                attempts: meta.attempts,
            });
        }
    }
    rows.sort_by_key(|row| row.ecode);

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV writer for {}", path.display()))?;
    if rows.is_empty() {
        writer.write_record(["ecode", "status", "code", "message", "attempts"])?;
    }
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}
