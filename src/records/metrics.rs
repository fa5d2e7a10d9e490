use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use log::info;
use serde_json::{json, Value};

use crate::api::TickerId;
use crate::error::{AppError, Context, Result};
use crate::services::{parse_ticker, read_table_file, Table, ECODE_COLUMN};
use crate::utils::{date_range, render_table};

use super::{blob, DateRecords, Records};

pub type Metrics = BTreeMap<String, Value>;

/// Index name to member ids, read from a table whose columns are index names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexMembership {
    members: BTreeMap<String, HashSet<TickerId>>,
}

impl IndexMembership {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_table(&read_table_file(path)?))
    }

    pub fn from_table(table: &Table) -> Self {
        let members = table
            .headers
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.trim().is_empty())
            .map(|(index, name)| {
                let ids = table.column_values(index).filter_map(parse_ticker).collect();
                (name.trim().to_string(), ids)
            })
            .collect();
        Self { members }
    }
}

/// Extraction metrics for one date's input list against its outcome sets.
pub fn compute_metrics(
    input: &[TickerId],
    succeeded: &HashSet<TickerId>,
    failed: &HashSet<TickerId>,
    indices: &IndexMembership,
) -> Metrics {
    let total = input.len();
    let mut metrics = Metrics::new();

    metrics.insert("total_tickers".into(), json!(total));
    metrics.insert("total_extracted".into(), json!(succeeded.len() + failed.len()));
    metrics.insert(
        "total_extraction_ratio".into(),
        json!(ratio(succeeded.len() + failed.len(), total)),
    );
    metrics.insert("extraction_successful".into(), json!(succeeded.len()));
    metrics.insert("extraction_failure".into(), json!(failed.len()));
    metrics.insert("success_ratio".into(), json!(ratio(succeeded.len(), total)));
    metrics.insert("failure_ratio".into(), json!(ratio(failed.len(), total)));

    let input_set: HashSet<TickerId> = input.iter().copied().collect();
    for (name, members) in &indices.members {
        let in_input: HashSet<TickerId> = input_set.intersection(members).copied().collect();
        let (input_ratio, success_ratio, failure_ratio) = if in_input.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                ratio(in_input.len(), members.len()),
                ratio(in_input.intersection(succeeded).count(), in_input.len()),
                ratio(in_input.intersection(failed).count(), in_input.len()),
            )
        };
        metrics.insert(format!("{name}_input_ratio"), json!(input_ratio));
        metrics.insert(format!("{name}_success_ratio"), json!(success_ratio));
        metrics.insert(format!("{name}_failure_ratio"), json!(failure_ratio));
    }

    let mut missing: Vec<TickerId> = input_set
        .iter()
        .filter(|id| !succeeded.contains(id) && !failed.contains(id))
        .copied()
        .collect();
    missing.sort_unstable();
    metrics.insert("missing_tickers_ratio".into(), json!(ratio(missing.len(), total)));
    metrics.insert("missing_tickers".into(), json!(missing));

    metrics
}

/// Build `metrics.json` for every date in the range.
pub fn metrics(
    records: &Records,
    start: NaiveDate,
    end: NaiveDate,
    indices: &IndexMembership,
) -> Result<Vec<(String, Metrics)>> {
    let dates = date_range(start, end)?;
    let mut all = Vec::with_capacity(dates.len());
    for date in dates {
        let day = records.for_date(date);
        let metrics = metrics_for_date(&day, indices)?;
        all.push((day.date().to_string(), metrics));
    }
    Ok(all)
}

pub fn metrics_for_date(day: &DateRecords, indices: &IndexMembership) -> Result<Metrics> {
    if !day.exists() {
        return Err(AppError::MissingArtifact(day.dir().to_path_buf()));
    }
    let success_path = day.success_csv_path();
    let failure_path = day.failure_csv_path();
    for path in [&success_path, &failure_path] {
        if !path.is_file() {
            return Err(AppError::MissingArtifact(path.to_path_buf()));
        }
    }

    let input = day.load_input_tickers()?;
    if input.is_empty() {
        return Err(AppError::message(format!(
            "no input tickers recorded in {}",
            day.input_tickers_path().display()
        )));
    }

    let succeeded = read_ecodes(&success_path)?;
    let failed = read_ecodes(&failure_path)?;
    let metrics = compute_metrics(&input, &succeeded, &failed, indices);

    blob::save_blob(&metrics, &day.metrics_path())?;
    info!("{}: metrics saved to {}", day.date(), day.metrics_path().display());
    Ok(metrics)
}

fn read_ecodes(path: &Path) -> Result<HashSet<TickerId>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let Some(index) = reader
        .headers()?
        .iter()
        .position(|header| header == ECODE_COLUMN)
    else {
        return Err(AppError::message(format!(
            "{} has no {ECODE_COLUMN} column",
            path.display()
        )));
    };

    let mut ids = HashSet::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV record")?;
        if let Some(id) = record.get(index).and_then(|cell| cell.trim().parse().ok()) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

/// Aligned two-column rendering for the terminal.
pub fn render(date: &str, metrics: &Metrics) -> String {
    let rows: Vec<(String, String)> = metrics
        .iter()
        .map(|(key, value)| {
            let shown = match value {
                Value::Array(items) => format!("{} tickers", items.len()),
                other => other.to_string(),
            };
            (key.clone(), shown)
        })
        .collect();
    format!("Metrics for {date}\n{}", render_table(("Metric", "Value"), &rows))
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 1000.0
}
