use std::fs;
use std::io::Cursor;
use std::path::Path;

use calamine::{Data, Reader, Xlsx};

use crate::error::{AppError, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
}

impl SheetFormat {
    /// Guess from a file name or URL path; anything that is not a workbook is CSV.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        let lower = lower.split(['?', '#']).next().unwrap_or_default();
        if lower.ends_with(".xlsx") || lower.ends_with(".xlsm") {
            SheetFormat::Xlsx
        } else {
            SheetFormat::Csv
        }
    }
}

/// First sheet of a workbook or a CSV file, with every cell rendered as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of the column whose header matches `name`, ignoring case and padding.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(move |row| row.get(index).map(String::as_str))
    }
}

pub fn read_table_file(path: &Path) -> Result<Table> {
    if !path.is_file() {
        return Err(AppError::MissingArtifact(path.to_path_buf()));
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    read_table(&bytes, SheetFormat::from_name(&path.to_string_lossy()))
}

pub fn read_table(bytes: &[u8], format: SheetFormat) -> Result<Table> {
    match format {
        SheetFormat::Csv => read_csv(bytes),
        SheetFormat::Xlsx => read_xlsx(bytes),
    }
}

fn read_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|cell| cell.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV record")?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }
    Ok(Table { headers, rows })
}

fn read_xlsx(bytes: &[u8]) -> Result<Table> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = Xlsx::new(cursor).context("Failed to parse workbook")?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Ok(Table::default());
    };
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("Sheet {sheet} not readable"))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>());
    let headers = rows.next().unwrap_or_default();
    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format_number(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(value) => value.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Empty | Data::Error(_) => String::new(),
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract().abs() < f64::EPSILON {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}
