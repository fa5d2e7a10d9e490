use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use log::{error, info};

use crate::api::{MarketDataApi, SeriesQuery, TickerId};
use crate::config::ExtractorConfig;
use crate::error::{AppError, Result};
use crate::extract::{EntityRecord, RunSummary, Scheduler};
use crate::records::{DateRecords, Partition, Records};
use crate::utils::date_range;

/// Outcome of one date, counted against that date's full input list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateSummary {
    pub date: String,
    pub total: usize,
    /// Already extracted by an earlier run and skipped.
    pub resumed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub missing: usize,
}

/// Splits each date's targets into batches and runs one scheduler session per
/// batch, persisting completed records as they are handed over.
pub struct Orchestrator<C> {
    config: ExtractorConfig,
    records: Records,
    connector: C,
    progress_counter: Arc<AtomicUsize>,
}

impl<C, A> Orchestrator<C>
where
    C: Fn() -> A,
    A: MarketDataApi,
{
    /// `connector` builds a fresh, unconnected session for every batch.
    pub fn new(config: ExtractorConfig, connector: C) -> Self {
        let records = Records::with_root(config.storage.root.clone());
        Self {
            config,
            records,
            connector,
            progress_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Entities settled so far across the current range, resumed ones included.
    pub fn progress_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress_counter)
    }

    /// Extract every date from `start` to `end`, in order. Stops at the first
    /// connection failure; everything persisted before it stays valid.
    pub async fn extract_range(
        &self,
        tickers: &[TickerId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DateSummary>> {
        let dates = date_range(start, end)?;
        if tickers.is_empty() {
            return Err(AppError::message("no tickers to extract"));
        }
        self.progress_counter.store(0, Ordering::SeqCst);

        let mut summaries = Vec::with_capacity(dates.len());
        for date in dates {
            summaries.push(self.extract_date(tickers, date).await?);
        }
        Ok(summaries)
    }

    pub async fn extract_date(&self, tickers: &[TickerId], date: NaiveDate) -> Result<DateSummary> {
        let day = self.records.for_date(date);
        day.prepare()?;
        day.save_input_tickers(tickers)?;

        let pending = day.resume_targets(tickers)?;
        let resumed = tickers.len() - pending.len();
        self.progress_counter.fetch_add(resumed, Ordering::SeqCst);

        let outcome = self.run_batches(&day, &pending).await;
        day.reconcile()?;
        outcome?;

        let summary = summarize(&day, tickers, resumed);
        info!(
            "{}: {} succeeded, {} failed, {} missing of {}",
            summary.date, summary.succeeded, summary.failed, summary.missing, summary.total
        );
        Ok(summary)
    }

    async fn run_batches(&self, day: &DateRecords, pending: &[TickerId]) -> Result<()> {
        if pending.is_empty() {
            info!("{}: nothing left to extract", day.date());
            return Ok(());
        }

        let extraction = &self.config.extraction;
        let workers = extraction.workers.max(1);
        let batches: Vec<Vec<TickerId>> = pending
            .chunks(extraction.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();
        let query = SeriesQuery::for_date(day.date(), &self.config.query, &self.config.contract);

        let aborted = AtomicBool::new(false);
        let free_slots = Mutex::new((0..workers).rev().collect::<Vec<usize>>());

        // At most `workers` sessions at once, each under its own client id.
        let results: Vec<Result<Option<RunSummary>>> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| {
                let query = query.clone();
                let aborted = &aborted;
                let free_slots = &free_slots;
                async move {
                    if aborted.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    let slot = take_slot(free_slots);
                    let client_id = self.config.connection.client_id + slot as i32;
                    info!(
                        "{}: batch {}/{} ({} tickers) on client {client_id}",
                        day.date(),
                        index + 1,
                        total_batches,
                        batch.len()
                    );

                    let mut scheduler =
                        Scheduler::new((self.connector)(), &batch, query, &self.config, client_id);
                    let progress = Arc::clone(&self.progress_counter);
                    let result = scheduler
                        .run(&mut |records: Vec<EntityRecord>| {
                            for record in &records {
                                day.save_record(record)?;
                            }
                            progress.fetch_add(records.len(), Ordering::SeqCst);
                            Ok(())
                        })
                        .await;
                    release_slot(free_slots, slot);

                    if let Err(err) = &result {
                        error!("{}: batch {} aborted: {err}", day.date(), index + 1);
                        aborted.store(true, Ordering::SeqCst);
                    }
                    result.map(Some)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut first_error = None;
        let mut skipped = 0usize;
        for result in results {
            match result {
                Ok(Some(_)) => {}
                Ok(None) => skipped += 1,
                Err(err) => {
                    let replace = match &first_error {
                        None => true,
                        Some(existing) => !AppError::is_connection(existing) && err.is_connection(),
                    };
                    if replace {
                        first_error = Some(err);
                    }
                }
            }
        }
        if skipped > 0 {
            info!("{}: {skipped} batches not started after abort", day.date());
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn take_slot(free_slots: &Mutex<Vec<usize>>) -> usize {
    free_slots
        .lock()
        .map(|mut slots| slots.pop().unwrap_or(0))
        .unwrap_or(0)
}

fn release_slot(free_slots: &Mutex<Vec<usize>>, slot: usize) {
    if let Ok(mut slots) = free_slots.lock() {
        slots.push(slot);
    }
}

fn summarize(day: &DateRecords, tickers: &[TickerId], resumed: usize) -> DateSummary {
    let succeeded: HashSet<TickerId> = day.list(Partition::Success).into_iter().collect();
    let failed: HashSet<TickerId> = day.list(Partition::Failure).into_iter().collect();
    let targets: HashSet<TickerId> = tickers.iter().copied().collect();

    let ok = targets.intersection(&succeeded).count();
    let bad = targets.iter().filter(|id| !succeeded.contains(id) && failed.contains(id)).count();
    DateSummary {
        date: day.date().to_string(),
        total: targets.len(),
        resumed,
        succeeded: ok,
        failed: bad,
        missing: targets.len() - ok - bad,
    }
}
