mod cli;

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use cli::{Cli, Commands, DateArgs, DownloadArgs, MetricsArgs};
use equity_bars::api::GatewayClient;
use equity_bars::config::{load_config, validate_config, ExtractorConfig};
use equity_bars::orchestrator::{DateSummary, Orchestrator};
use equity_bars::records::export;
use equity_bars::records::metrics::{self, IndexMembership};
use equity_bars::records::Records;
use equity_bars::services::load_tickers;
use equity_bars::utils::{current_human_timestamp, date_range, pad_to_width};
use equity_bars::AppError;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    match dispatch(cli).await {
        Err(AppError::Connection(failure)) => {
            eprintln!("Extraction aborted: {failure}");
            eprintln!("Data extracted so far is saved; rerun the same command to resume.");
            std::process::exit(2);
        }
        other => other.map_err(anyhow::Error::from),
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else if verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

async fn dispatch(cli: Cli) -> equity_bars::Result<()> {
    let mut config = load_config(&cli.config)?;
    if let Some(root) = &cli.data_dir {
        config.storage.root = root.clone();
    }

    match &cli.command {
        Commands::Download(args) => {
            args.apply(&mut config);
            validate_config(&config)?;
            download(config, args).await
        }
        Commands::Convert(dates) => convert(&config, dates),
        Commands::Metrics(args) => compute_metrics(&config, args),
        Commands::Run { download: args, indices } => {
            args.apply(&mut config);
            validate_config(&config)?;
            let dates = args.dates.clone();
            download(config.clone(), args).await?;
            convert(&config, &dates)?;
            compute_metrics(
                &config,
                &MetricsArgs {
                    dates,
                    indices: indices.clone(),
                },
            )
        }
    }
}

async fn download(config: ExtractorConfig, args: &DownloadArgs) -> equity_bars::Result<()> {
    let (start, end) = args.dates.range();
    let days = date_range(start, end)?.len();
    let tickers = load_tickers(&args.source.source()).await?;
    println!(
        "Extracting {} tickers over {days} day(s), started {}",
        tickers.len(),
        current_human_timestamp()
    );

    let orchestrator = Orchestrator::new(config, GatewayClient::new);
    let total = tickers.len() * days;
    let reporter = tokio::spawn(report_progress(orchestrator.progress_counter(), total));
    let result = orchestrator.extract_range(&tickers, start, end).await;
    reporter.abort();
    eprintln!();

    let summaries = result?;
    print_summaries(&summaries);
    Ok(())
}

async fn report_progress(counter: Arc<AtomicUsize>, total: usize) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut last = usize::MAX;
    loop {
        ticker.tick().await;
        let done = counter.load(Ordering::SeqCst);
        if done != last {
            last = done;
            let mut err = io::stderr();
            let _ = write!(err, "\rDone {done} / {total} ticker-days");
            let _ = err.flush();
        }
    }
}

fn print_summaries(summaries: &[DateSummary]) {
    let columns = ["Date", "Success", "Failure", "Missing"];
    let width = 10;
    let header: Vec<String> = columns.iter().map(|c| pad_to_width(c, width)).collect();
    println!("{}", header.join(" "));
    println!("{}", "-".repeat((width + 1) * columns.len()));
    for summary in summaries {
        let row = [
            summary.date.clone(),
            format!("{}/{}", summary.succeeded, summary.total),
            format!("{}/{}", summary.failed, summary.total),
            format!("{}/{}", summary.missing, summary.total),
        ];
        let row: Vec<String> = row.iter().map(|cell| pad_to_width(cell, width)).collect();
        println!("{}", row.join(" "));
    }
}

fn convert(config: &ExtractorConfig, dates: &DateArgs) -> equity_bars::Result<()> {
    let (start, end) = dates.range();
    let records = Records::with_root(config.storage.root.clone());
    for summary in export::convert(&records, start, end)? {
        println!(
            "{}: {} bar rows, {} failure rows",
            summary.date,
            summary.success_rows.unwrap_or(0),
            summary.failure_rows.unwrap_or(0)
        );
    }
    Ok(())
}

fn compute_metrics(config: &ExtractorConfig, args: &MetricsArgs) -> equity_bars::Result<()> {
    let (start, end) = args.dates.range();
    date_range(start, end)?;
    let indices = match &args.indices {
        Some(path) => IndexMembership::load(path)?,
        None => IndexMembership::default(),
    };

    let records = Records::with_root(config.storage.root.clone());
    for (date, computed) in metrics::metrics(&records, start, end, &indices)? {
        println!("{}", metrics::render(&date, &computed));
    }
    Ok(())
}
