use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use equity_bars::api::TickerId;
use equity_bars::config::validator::{check_bar_size, check_duration, check_end_time};
use equity_bars::config::ExtractorConfig;
use equity_bars::services::TickerSource;
use equity_bars::utils::{parse_date, today};

#[derive(Parser)]
#[command(name = "equity-bars")]
#[command(about = "Batch extraction of historical equity bars from a market-data gateway")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    #[arg(short, long, global = true, default_value = "extractor.json")]
    pub config: PathBuf,

    /// Storage root, overrides the config file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract bars for every date in the range
    Download(DownloadArgs),

    /// Flatten extracted blobs into success.csv / failure.csv
    Convert(DateArgs),

    /// Compute extraction metrics from converted outputs
    Metrics(MetricsArgs),

    /// Download, convert and compute metrics in one go
    Run {
        #[command(flatten)]
        download: DownloadArgs,

        #[arg(long)]
        indices: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
pub struct DateArgs {
    /// First date, YYYYMMDD (defaults to the end date)
    #[arg(short, long, value_parser = date_arg)]
    pub start_date: Option<NaiveDate>,

    /// Last date, YYYYMMDD (defaults to today)
    #[arg(short, long, value_parser = date_arg)]
    pub end_date: Option<NaiveDate>,
}

impl DateArgs {
    pub fn range(&self) -> (NaiveDate, NaiveDate) {
        let end = self.end_date.unwrap_or_else(today);
        let start = self.start_date.unwrap_or(end);
        (start, end)
    }
}

#[derive(Args, Clone)]
pub struct MetricsArgs {
    #[command(flatten)]
    pub dates: DateArgs,

    /// Index membership table (CSV or XLSX, one column per index)
    #[arg(long)]
    pub indices: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub dates: DateArgs,

    #[command(flatten)]
    pub source: SourceArgs,

    /// End time of each day's query, HH:MM:SS
    #[arg(long, value_parser = end_time_arg)]
    pub end_time: Option<String>,

    /// Lookback such as `1 D`
    #[arg(long, value_parser = duration_arg)]
    pub duration: Option<String>,

    #[arg(long, value_parser = bar_size_arg)]
    pub bar_size: Option<String>,

    #[arg(long)]
    pub max_attempts: Option<u32>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Concurrent sessions
    #[arg(long)]
    pub workers: Option<usize>,
}

impl DownloadArgs {
    /// Fold command-line overrides into the loaded config.
    pub fn apply(&self, config: &mut ExtractorConfig) {
        if let Some(end_time) = &self.end_time {
            config.query.end_time = end_time.clone();
        }
        if let Some(duration) = &self.duration {
            config.query.duration = duration.clone();
        }
        if let Some(bar_size) = &self.bar_size {
            config.query.bar_size = bar_size.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.extraction.max_attempts = max_attempts;
        }
        if let Some(batch_size) = self.batch_size {
            config.extraction.batch_size = batch_size;
        }
        if let Some(timeout) = self.timeout {
            config.extraction.request_timeout_secs = timeout;
        }
        if let Some(workers) = self.workers {
            config.extraction.workers = workers;
        }
    }
}

#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Ticker ids
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub list: Option<Vec<TickerId>>,

    /// CSV or XLSX file with an `ecode` column
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// HTTP(S) location of a CSV or XLSX ticker list
    #[arg(short, long)]
    pub url: Option<String>,
}

impl SourceArgs {
    pub fn source(&self) -> TickerSource {
        if let Some(list) = &self.list {
            TickerSource::List(list.clone())
        } else if let Some(path) = &self.file {
            TickerSource::File(path.clone())
        } else {
            TickerSource::Url(self.url.clone().unwrap_or_default())
        }
    }
}

fn date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|_| format!("`{value}` is not a YYYYMMDD date"))
}

fn end_time_arg(value: &str) -> Result<String, String> {
    check_end_time(value).map(|_| value.to_string())
}

fn duration_arg(value: &str) -> Result<String, String> {
    check_duration(value).map(|_| value.to_string())
}

fn bar_size_arg(value: &str) -> Result<String, String> {
    check_bar_size(value).map(|_| value.to_string())
}
