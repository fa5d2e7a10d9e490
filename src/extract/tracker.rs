use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::api::TickerId;

/// Coarse half-day partition of a bar's timestamp, stored as 1 (morning) or 2 (afternoon).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Session {
    Morning,
    Afternoon,
}

impl From<Session> for u8 {
    fn from(session: Session) -> Self {
        match session {
            Session::Morning => 1,
            Session::Afternoon => 2,
        }
    }
}

impl TryFrom<u8> for Session {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Session::Morning),
            2 => Ok(Session::Afternoon),
            other => Err(format!("unknown session marker {other}")),
        }
    }
}

/// Canonical bar record kept per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time_stamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub average: f64,
    pub count: i64,
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Pending,
    Success,
    Failed,
}

/// Per-entity record of attempts, errors and bars for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: TickerId,
    pub attempts: u32,
    pub errors: Vec<ErrorEntry>,
    pub status: ExtractionStatus,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    pub bars: Vec<Bar>,
}

impl EntityRecord {
    fn new(id: TickerId) -> Self {
        Self {
            id,
            attempts: 0,
            errors: Vec::new(),
            status: ExtractionStatus::Pending,
            range_start: None,
            range_end: None,
            bars: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }

    pub fn total_bars(&self) -> usize {
        self.bars.len()
    }
}

/// Mutable per-entity state plus the set of entities already settled.
///
/// An id is in the processed set iff its record succeeded or exhausted its attempts.
/// Once processed, an entity never changes again; late callbacks are dropped.
#[derive(Debug)]
pub struct Tracker {
    max_attempts: u32,
    records: HashMap<TickerId, EntityRecord>,
    processed: HashSet<TickerId>,
    completed: Vec<TickerId>,
}

impl Tracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            records: HashMap::new(),
            processed: HashSet::new(),
            completed: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Create an empty record unless one already exists.
    pub fn init(&mut self, id: TickerId) {
        if self.processed.contains(&id) {
            return;
        }
        self.records.entry(id).or_insert_with(|| EntityRecord::new(id));
    }

    pub fn record(&self, id: TickerId) -> Option<&EntityRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: TickerId) -> bool {
        self.records.contains_key(&id)
    }

    /// Count one outbound request. Must run before the request is issued.
    pub fn record_attempt(&mut self, id: TickerId) -> u32 {
        self.init(id);
        match self.open_record(id) {
            Some(record) => {
                record.attempts += 1;
                record.attempts
            }
            None => 0,
        }
    }

    /// Append to the error stack. Returns false when the entity is already settled.
    pub fn record_error(&mut self, id: TickerId, code: i32, message: &str) -> bool {
        match self.open_record(id) {
            Some(record) => {
                record.errors.push(ErrorEntry {
                    code,
                    message: message.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Append a bar unless an identical one is already stored.
    pub fn record_bar(&mut self, id: TickerId, bar: Bar) -> bool {
        match self.open_record(id) {
            Some(record) if record.status != ExtractionStatus::Success => {
                if record.bars.contains(&bar) {
                    false
                } else {
                    record.bars.push(bar);
                    true
                }
            }
            _ => false,
        }
    }

    /// Mark a clean series end. No-op for finished entities so a duplicate end
    /// callback never reopens anything.
    pub fn record_success(&mut self, id: TickerId, start: &str, end: &str) -> bool {
        match self.open_record(id) {
            Some(record) if record.status != ExtractionStatus::Success => {
                record.status = ExtractionStatus::Success;
                record.range_start = Some(start.to_string());
                record.range_end = Some(end.to_string());
                true
            }
            _ => false,
        }
    }

    /// Sole gate for retry vs. settle decisions.
    pub fn is_done(&self, id: TickerId) -> bool {
        if self.processed.contains(&id) {
            return true;
        }
        self.records
            .get(&id)
            .map(|record| record.is_success() || record.attempts >= self.max_attempts)
            .unwrap_or(false)
    }

    pub fn is_processed(&self, id: TickerId) -> bool {
        self.processed.contains(&id)
    }

    /// Move a done entity into the processed set, fixing its final status.
    /// Returns true only on the first transition.
    pub fn mark_processed(&mut self, id: TickerId) -> bool {
        if self.processed.contains(&id) || !self.is_done(id) {
            return false;
        }
        if let Some(record) = self.records.get_mut(&id) {
            if record.status != ExtractionStatus::Success {
                record.status = ExtractionStatus::Failed;
            }
        }
        self.processed.insert(id);
        self.completed.push(id);
        true
    }

    pub fn pending_completed(&self) -> usize {
        self.completed.len()
    }

    /// Hand over every processed record not yet drained, releasing it from memory.
    pub fn drain_completed(&mut self) -> Vec<EntityRecord> {
        let ids = std::mem::take(&mut self.completed);
        ids.into_iter()
            .filter_map(|id| self.records.remove(&id))
            .collect()
    }

    fn open_record(&mut self, id: TickerId) -> Option<&mut EntityRecord> {
        if self.processed.contains(&id) {
            return None;
        }
        self.records.get_mut(&id)
    }
}
