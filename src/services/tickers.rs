use std::collections::HashSet;
use std::path::PathBuf;

use log::{info, warn};

use crate::api::TickerId;
use crate::error::{AppError, Context, Result};

use super::sheet::{self, SheetFormat, Table};

/// Column holding entity codes in ticker lists and extraction outputs.
pub const ECODE_COLUMN: &str = "ecode";

/// Where the target entities of a download come from.
#[derive(Debug, Clone, PartialEq)]
pub enum TickerSource {
    List(Vec<TickerId>),
    File(PathBuf),
    Url(String),
}

/// Resolve a source into a de-duplicated, non-empty list in input order.
pub async fn load_tickers(source: &TickerSource) -> Result<Vec<TickerId>> {
    let (tickers, origin) = match source {
        TickerSource::List(ids) => (dedup(ids.iter().copied()), "command line".to_string()),
        TickerSource::File(path) => {
            let table = sheet::read_table_file(path)?;
            (tickers_from_table(&table), path.display().to_string())
        }
        TickerSource::Url(url) => {
            let table = fetch_table(url).await?;
            (tickers_from_table(&table), url.clone())
        }
    };

    if tickers.is_empty() {
        return Err(AppError::message(format!("no tickers found in {origin}")));
    }
    info!("loaded {} tickers from {origin}", tickers.len());
    Ok(tickers)
}

async fn fetch_table(url: &str) -> Result<Table> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to request ticker list from {url}"))?;

    if !response.status().is_success() {
        return Err(AppError::message(format!(
            "ticker list request failed with status {}",
            response.status()
        )));
    }

    let is_workbook = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("spreadsheetml"))
        .unwrap_or(false);
    let format = if is_workbook {
        SheetFormat::Xlsx
    } else {
        SheetFormat::from_name(url)
    };

    let bytes = response
        .bytes()
        .await
        .context("Failed to read ticker list payload")?;
    sheet::read_table(&bytes, format)
}

/// Ids from the `ecode` column, or from the first column when there is no such
/// header (the header cell itself is then treated as data).
pub fn tickers_from_table(table: &Table) -> Vec<TickerId> {
    let cells: Vec<&str> = match table.column(ECODE_COLUMN) {
        Some(index) => table.column_values(index).collect(),
        None => table
            .headers
            .first()
            .map(String::as_str)
            .into_iter()
            .chain(table.column_values(0))
            .collect(),
    };

    let ids = cells.into_iter().filter_map(|cell| {
        let cell = cell.trim();
        if cell.is_empty() {
            return None;
        }
        let parsed = parse_ticker(cell);
        if parsed.is_none() {
            warn!("skipping non-numeric ticker {cell:?}");
        }
        parsed
    });
    dedup(ids)
}

/// Parse `1301` or an exchange-suffixed `1301.T`.
pub fn parse_ticker(cell: &str) -> Option<TickerId> {
    let code = cell.trim().split('.').next()?;
    code.trim().parse().ok()
}

fn dedup(ids: impl IntoIterator<Item = TickerId>) -> Vec<TickerId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> Table {
        sheet::read_table(csv.as_bytes(), SheetFormat::Csv).unwrap()
    }

    #[test]
    fn prefers_ecode_column() {
        let ids = tickers_from_table(&table("name,ecode\nA,1301\nB,1332\nC,1301\n"));
        assert_eq!(ids, vec![1301, 1332]);
    }

    #[test]
    fn headerless_list_uses_first_column() {
        let ids = tickers_from_table(&table("7203\n1301.T\nabc\n\n6758\n"));
        assert_eq!(ids, vec![7203, 1301, 6758]);
    }

    #[test]
    fn parses_suffixed_codes() {
        assert_eq!(parse_ticker("1301.T"), Some(1301));
        assert_eq!(parse_ticker(" 9984 "), Some(9984));
        assert_eq!(parse_ticker("n/a"), None);
    }

    #[tokio::test]
    async fn explicit_list_is_deduplicated() {
        let ids = load_tickers(&TickerSource::List(vec![3, 1, 3, 2])).await.unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn empty_sources_are_rejected() {
        assert!(load_tickers(&TickerSource::List(Vec::new())).await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickers.csv");
        std::fs::write(&path, "ecode\n").unwrap();
        assert!(load_tickers(&TickerSource::File(path)).await.is_err());
    }

    #[tokio::test]
    async fn reads_ticker_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickers.csv");
        std::fs::write(&path, "ecode,name\n1301,Kyokuyo\n1332,Nissui\n").unwrap();
        let ids = load_tickers(&TickerSource::File(path)).await.unwrap();
        assert_eq!(ids, vec![1301, 1332]);
    }
}
