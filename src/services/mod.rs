//! Inputs that come from outside the storage root: ticker lists and index
//! membership tables, read from local files or fetched over HTTP.

pub mod sheet;
pub mod tickers;

pub use sheet::{read_table, read_table_file, SheetFormat, Table};
pub use tickers::{load_tickers, parse_ticker, tickers_from_table, TickerSource, ECODE_COLUMN};
