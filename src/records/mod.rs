use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, info};

use crate::api::TickerId;
use crate::error::{AppError, Result};
use crate::extract::EntityRecord;
use crate::utils::format_date;

pub mod blob;
pub mod export;
pub mod metrics;

pub use blob::{BlobMeta, EntityBlob};

pub const SUCCESS_DIR: &str = ".success";
pub const FAILURE_DIR: &str = ".failure";
pub const INPUT_TICKERS_FILE: &str = "input_tickers.json";
pub const SUCCESS_CSV: &str = "success.csv";
pub const FAILURE_CSV: &str = "failure.csv";
pub const METRICS_FILE: &str = "metrics.json";

/// Which side of a date's results a blob lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Success,
    Failure,
}

impl Partition {
    pub fn dir_name(self) -> &'static str {
        match self {
            Partition::Success => SUCCESS_DIR,
            Partition::Failure => FAILURE_DIR,
        }
    }
}

/// Facade over the storage root, keeping path layout in one place.
#[derive(Debug, Clone)]
pub struct Records {
    root: PathBuf,
}

impl Records {
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn for_date(&self, date: NaiveDate) -> DateRecords {
        let key = format_date(date);
        DateRecords {
            dir: self.root.join(&key),
            date: key,
        }
    }
}

/// Artifacts of a single date: `{root}/{YYYYMMDD}/...`.
#[derive(Debug, Clone)]
pub struct DateRecords {
    date: String,
    dir: PathBuf,
}

impl DateRecords {
    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.dir.join(partition.dir_name())
    }

    pub fn blob_path(&self, partition: Partition, id: TickerId) -> PathBuf {
        self.partition_dir(partition).join(format!("{id}.json"))
    }

    pub fn input_tickers_path(&self) -> PathBuf {
        self.dir.join(INPUT_TICKERS_FILE)
    }

    pub fn success_csv_path(&self) -> PathBuf {
        self.dir.join(SUCCESS_CSV)
    }

    pub fn failure_csv_path(&self) -> PathBuf {
        self.dir.join(FAILURE_CSV)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    /// Ensure the date directory and both partitions exist before anything is written.
    pub fn prepare(&self) -> Result<()> {
        blob::ensure_directory(&self.dir)?;
        blob::ensure_directory(&self.partition_dir(Partition::Success))?;
        blob::ensure_directory(&self.partition_dir(Partition::Failure))?;
        Ok(())
    }

    pub fn save_input_tickers(&self, tickers: &[TickerId]) -> Result<()> {
        blob::save_blob(&tickers, &self.input_tickers_path())
    }

    pub fn load_input_tickers(&self) -> Result<Vec<TickerId>> {
        let path = self.input_tickers_path();
        if !path.is_file() {
            return Err(AppError::MissingArtifact(path));
        }
        blob::load_blob(&path)
    }

    /// Persist a settled record into the partition matching its status.
    pub fn save_record(&self, record: &EntityRecord) -> Result<PathBuf> {
        let partition = if record.is_success() {
            Partition::Success
        } else {
            Partition::Failure
        };
        let path = self.blob_path(partition, record.id);
        blob::save_blob(&EntityBlob::from(record), &path)?;
        debug!("saved {} to {}", record.id, path.display());
        Ok(path)
    }

    pub fn load(&self, partition: Partition, id: TickerId) -> Result<EntityBlob> {
        blob::load_blob(&self.blob_path(partition, id))
    }

    pub fn list(&self, partition: Partition) -> Vec<TickerId> {
        blob::list_blobs(&self.partition_dir(partition))
    }

    pub fn delete(&self, partition: Partition, id: TickerId) -> Result<bool> {
        blob::delete_blob(&self.blob_path(partition, id))
    }

    /// Split `targets` for a resumed run: ids that already succeeded are dropped,
    /// stale failure blobs of the rest are removed so they are retried.
    /// Returns the remaining targets in input order.
    pub fn resume_targets(&self, targets: &[TickerId]) -> Result<Vec<TickerId>> {
        let succeeded: HashSet<TickerId> = self.list(Partition::Success).into_iter().collect();
        let mut pending = Vec::with_capacity(targets.len());
        let mut requeued = 0usize;
        for &id in targets {
            if succeeded.contains(&id) {
                continue;
            }
            if self.delete(Partition::Failure, id)? {
                requeued += 1;
            }
            pending.push(id);
        }
        info!(
            "{}: {} already extracted, {} failures requeued, {} pending",
            self.date,
            targets.len() - pending.len(),
            requeued,
            pending.len()
        );
        Ok(pending)
    }

    /// Delete failure blobs for ids that also have a success blob.
    pub fn reconcile(&self) -> Result<Vec<TickerId>> {
        let succeeded: HashSet<TickerId> = self.list(Partition::Success).into_iter().collect();
        let mut removed = Vec::new();
        for id in self.list(Partition::Failure) {
            if succeeded.contains(&id) && self.delete(Partition::Failure, id)? {
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            debug!("{}: dropped {} superseded failure blobs", self.date, removed.len());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractionStatus;
    use crate::utils::parse_date;

    fn record(id: TickerId, status: ExtractionStatus) -> EntityRecord {
        EntityRecord {
            id,
            attempts: 1,
            errors: Vec::new(),
            status,
            range_start: None,
            range_end: None,
            bars: Vec::new(),
        }
    }

    fn date_records(root: &Path) -> DateRecords {
        let records = Records::with_root(root);
        let day = records.for_date(parse_date("20210120").unwrap());
        day.prepare().unwrap();
        day
    }

    #[test]
    fn layout_is_keyed_by_date() {
        let records = Records::with_root("historical_data");
        let day = records.for_date(parse_date("20210120").unwrap());
        assert_eq!(
            day.blob_path(Partition::Failure, 1301),
            PathBuf::from("historical_data/20210120/.failure/1301.json")
        );
        assert_eq!(
            day.input_tickers_path(),
            PathBuf::from("historical_data/20210120/input_tickers.json")
        );
    }

    #[test]
    fn records_routed_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let day = date_records(dir.path());
        day.save_record(&record(1, ExtractionStatus::Success)).unwrap();
        day.save_record(&record(2, ExtractionStatus::Failed)).unwrap();

        assert_eq!(day.list(Partition::Success), vec![1]);
        assert_eq!(day.list(Partition::Failure), vec![2]);
        assert!(!day.load(Partition::Failure, 2).unwrap().meta_data.status);
    }

    #[test]
    fn resume_skips_successes_and_requeues_failures() {
        let dir = tempfile::tempdir().unwrap();
        let day = date_records(dir.path());
        day.save_record(&record(1, ExtractionStatus::Success)).unwrap();
        day.save_record(&record(2, ExtractionStatus::Failed)).unwrap();

        let pending = day.resume_targets(&[3, 1, 2]).unwrap();
        assert_eq!(pending, vec![3, 2]);
        assert!(day.list(Partition::Failure).is_empty());
        assert_eq!(day.list(Partition::Success), vec![1]);
    }

    #[test]
    fn reconcile_keeps_success() {
        let dir = tempfile::tempdir().unwrap();
        let day = date_records(dir.path());
        day.save_record(&record(7, ExtractionStatus::Success)).unwrap();
        day.save_record(&record(7, ExtractionStatus::Failed)).unwrap();
        day.save_record(&record(8, ExtractionStatus::Failed)).unwrap();

        assert_eq!(day.reconcile().unwrap(), vec![7]);
        assert_eq!(day.list(Partition::Success), vec![7]);
        assert_eq!(day.list(Partition::Failure), vec![8]);
    }

    #[test]
    fn missing_input_list_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let day = Records::with_root(dir.path()).for_date(parse_date("20210121").unwrap());
        assert!(matches!(
            day.load_input_tickers(),
            Err(AppError::MissingArtifact(_))
        ));

        let day = date_records(dir.path());
        day.save_input_tickers(&[1301, 1332]).unwrap();
        assert_eq!(day.load_input_tickers().unwrap(), vec![1301, 1332]);
    }
}
