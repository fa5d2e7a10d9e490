use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::{EventStream, MarketDataApi, SeriesQuery, TickerId};
use crate::config::ExtractorConfig;
use crate::error::{AppError, ConnectionFailure, Result};

use super::bridge::{deadline_after, Bridge, Outcome};
use super::classify::{CONNECTIVITY_LOST_CODE, CONNECT_FAIL_CODE};
use super::tracker::{EntityRecord, Tracker};

/// Session phases of one scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Drained,
}

/// Where and how to open the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub flush_every: usize,
}

impl SessionSettings {
    pub fn from_config(config: &ExtractorConfig, client_id: i32) -> Self {
        Self {
            host: config.connection.host.clone(),
            port: config.connection.port,
            client_id,
            max_attempts: config.extraction.max_attempts,
            request_timeout: Duration::from_secs(config.extraction.request_timeout_secs),
            handshake_timeout: Duration::from_secs(config.extraction.handshake_timeout_secs),
            flush_every: config.extraction.flush_every,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Receives completed records as they are handed off for persistence.
pub type Checkpoint<'a> = dyn FnMut(Vec<EntityRecord>) -> Result<()> + Send + 'a;

/// Drives one session over a fixed target list, one request in flight at a time.
///
/// The run ends when every target is processed or the session fails. In the
/// latter case the entity in flight is left untouched and nothing is written for it.
pub struct Scheduler<A: MarketDataApi> {
    bridge: Bridge<A>,
    tracker: Tracker,
    targets: Vec<TickerId>,
    cursor: usize,
    state: ConnectionState,
    settings: SessionSettings,
    summary: RunSummary,
}

impl<A: MarketDataApi> Scheduler<A> {
    pub fn new(
        api: A,
        targets: &[TickerId],
        query: SeriesQuery,
        config: &ExtractorConfig,
        client_id: i32,
    ) -> Self {
        let settings = SessionSettings::from_config(config, client_id);
        let bridge = Bridge::new(
            api,
            query,
            settings.request_timeout,
            config.extraction.insecure_connection,
        );
        Self::with_bridge(bridge, targets, settings)
    }

    pub fn with_bridge(bridge: Bridge<A>, targets: &[TickerId], settings: SessionSettings) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        Self {
            bridge,
            tracker: Tracker::new(settings.max_attempts),
            targets,
            cursor: 0,
            state: ConnectionState::Disconnected,
            settings,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Run the session to completion, handing completed records to `checkpoint`
    /// every `flush_every` completions and once more at the end.
    ///
    /// Records completed before a connection failure are still handed over before
    /// the error is returned.
    pub async fn run(&mut self, checkpoint: &mut Checkpoint<'_>) -> Result<RunSummary> {
        let outcome = match self.open_session().await {
            Ok(mut events) => {
                let outcome = self.drive(&mut events, checkpoint).await;
                self.close_session().await;
                outcome
            }
            Err(err) => Err(err),
        };

        let flushed = self.flush(checkpoint);
        outcome?;
        flushed?;
        info!(
            "session {} finished: {} succeeded, {} failed",
            self.settings.client_id, self.summary.succeeded, self.summary.failed
        );
        Ok(self.summary)
    }

    async fn open_session(&mut self) -> Result<EventStream> {
        let deadline = deadline_after(self.settings.handshake_timeout)?;
        self.state = ConnectionState::Connecting;
        let settings = &self.settings;
        let connected = self
            .bridge
            .api_mut()
            .connect(&settings.host, settings.port, settings.client_id)
            .await;
        let mut events = match connected {
            Ok(events) => events,
            Err(err) => {
                let failure = connection_error(
                    CONNECT_FAIL_CODE,
                    format!("could not connect to {}:{}: {err}", settings.host, settings.port),
                );
                // A connect can fail after the session half-opened.
                self.close_session().await;
                return Err(failure);
            }
        };

        self.state = ConnectionState::Handshaking;
        loop {
            let next = tokio::time::timeout_at(deadline, events.recv()).await;
            let failure = match next {
                Err(_) => connection_error(
                    CONNECT_FAIL_CODE,
                    format!(
                        "handshake not completed within {} seconds",
                        self.settings.handshake_timeout.as_secs()
                    ),
                ),
                Ok(None) => connection_error(CONNECTIVITY_LOST_CODE, "session closed during handshake"),
                Ok(Some(event)) => match self.bridge.handle(&mut self.tracker, event).await {
                    Ok(Outcome::HandshakeReady) => {
                        self.state = ConnectionState::Ready;
                        debug!("session {} ready", self.settings.client_id);
                        return Ok(events);
                    }
                    Ok(_) => continue,
                    Err(err) => err,
                },
            };
            self.close_session().await;
            return Err(failure);
        }
    }

    async fn close_session(&mut self) {
        self.bridge.api_mut().disconnect().await;
        if self.state != ConnectionState::Drained {
            self.state = ConnectionState::Disconnected;
        }
    }

    async fn drive(&mut self, events: &mut EventStream, checkpoint: &mut Checkpoint<'_>) -> Result<()> {
        while let Some(current) = self.next_target() {
            self.bridge.issue_request(&mut self.tracker, current).await?;

            loop {
                let Some(event) = self.bridge.next_event(events).await else {
                    return Err(connection_error(CONNECTIVITY_LOST_CODE, "session event stream closed"));
                };
                let Outcome::Settled(id) = self.bridge.handle(&mut self.tracker, event).await? else {
                    continue;
                };

                if id != current {
                    self.settle(id);
                    continue;
                }
                if self.settle(current) {
                    break;
                }
                debug!(
                    "retrying {current} ({}/{})",
                    self.tracker.record(current).map(|r| r.attempts).unwrap_or(0),
                    self.tracker.max_attempts()
                );
                self.bridge.issue_request(&mut self.tracker, current).await?;
            }

            if self.tracker.pending_completed() >= self.settings.flush_every.max(1) {
                self.flush(checkpoint)?;
            }
        }

        self.state = ConnectionState::Drained;
        Ok(())
    }

    /// Next target not yet processed. Entities that are already done are
    /// settled on the way without a request.
    fn next_target(&mut self) -> Option<TickerId> {
        while let Some(&id) = self.targets.get(self.cursor) {
            if self.tracker.is_processed(id) {
                self.cursor += 1;
                continue;
            }
            self.tracker.init(id);
            if self.tracker.is_done(id) {
                self.settle(id);
                self.cursor += 1;
                continue;
            }
            return Some(id);
        }
        None
    }

    /// Move `id` to processed if it is done. Returns whether it is processed now.
    fn settle(&mut self, id: TickerId) -> bool {
        if !self.targets.contains(&id) {
            warn!("settlement for non-target {id} ignored");
            return false;
        }
        if self.tracker.mark_processed(id) {
            if let Some(record) = self.tracker.record(id) {
                if record.is_success() {
                    self.summary.succeeded += 1;
                } else {
                    self.summary.failed += 1;
                    warn!("giving up on {id} after {} attempts", record.attempts);
                }
            }
        }
        self.tracker.is_processed(id)
    }

    fn flush(&mut self, checkpoint: &mut Checkpoint<'_>) -> Result<()> {
        let records = self.tracker.drain_completed();
        if records.is_empty() {
            return Ok(());
        }
        debug!("checkpointing {} records", records.len());
        checkpoint(records)
    }
}

fn connection_error(code: i32, message: impl Into<String>) -> AppError {
    AppError::Connection(ConnectionFailure {
        code,
        message: message.into(),
        insecure: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiEvent;
    use crate::config::{ContractConfig, QueryConfig};
    use crate::extract::classify::TIMEOUT_CODE;
    use crate::extract::testing::{lifecycle, raw_bar, Reply, ScriptedApi};
    use crate::extract::tracker::ExtractionStatus;

    fn config(max_attempts: u32) -> ExtractorConfig {
        let mut config = ExtractorConfig::default();
        config.extraction.max_attempts = max_attempts;
        config
    }

    fn scheduler(api: ScriptedApi, targets: &[TickerId], config: &ExtractorConfig) -> Scheduler<ScriptedApi> {
        let query = SeriesQuery::for_date("20210120", &QueryConfig::default(), &ContractConfig::default());
        Scheduler::new(api, targets, query, config, 1)
    }

    async fn run_collecting(scheduler: &mut Scheduler<ScriptedApi>) -> (Result<RunSummary>, Vec<EntityRecord>) {
        let mut saved = Vec::new();
        let result = scheduler
            .run(&mut |records: Vec<EntityRecord>| {
                saved.extend(records);
                Ok(())
            })
            .await;
        (result, saved)
    }

    #[tokio::test]
    async fn success_and_exhausted_failure() {
        let api = ScriptedApi::new().replies(2, vec![Reply::Error(200), Reply::Error(200)]);
        let log = api.log();
        let mut scheduler = scheduler(api, &[1, 2], &config(2));

        let (result, saved) = run_collecting(&mut scheduler).await;
        let summary = result.unwrap();
        assert_eq!(summary, RunSummary { succeeded: 1, failed: 1 });
        assert_eq!(scheduler.state(), ConnectionState::Drained);
        assert_eq!(log.requests(), vec![1, 2, 2]);
        assert_eq!(log.disconnects(), 1);

        let first = saved.iter().find(|r| r.id == 1).unwrap();
        assert_eq!(first.status, ExtractionStatus::Success);
        assert_eq!(first.attempts, 1);
        assert_eq!(first.bars.len(), 2);

        let second = saved.iter().find(|r| r.id == 2).unwrap();
        assert_eq!(second.status, ExtractionStatus::Failed);
        assert_eq!(second.attempts, 2);
        assert_eq!(second.errors.len(), 2);
        assert!(second.errors.iter().all(|e| e.code == 200));
    }

    #[tokio::test]
    async fn connection_loss_leaves_in_flight_entity_untouched() {
        let api = ScriptedApi::new().replies(5, vec![Reply::Events(vec![lifecycle(1100)])]);
        let log = api.log();
        let mut scheduler = scheduler(api, &[4, 5, 6], &config(3));

        let (result, saved) = run_collecting(&mut scheduler).await;
        let err = result.unwrap_err();
        assert!(err.is_connection());

        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, 4);
        assert_eq!(log.requests(), vec![4, 5]);
        assert_eq!(log.disconnects(), 1);

        let tracker = scheduler.tracker();
        assert!(!tracker.is_processed(5));
        assert_eq!(tracker.record(5).unwrap().attempts, 1);
        assert!(tracker.record(6).is_none());
    }

    #[tokio::test]
    async fn fatal_handshake_sends_no_requests() {
        let api = ScriptedApi::new().handshake(vec![lifecycle(2104), lifecycle(502)]);
        let log = api.log();
        let mut scheduler = scheduler(api, &[1], &config(3));

        let (result, saved) = run_collecting(&mut scheduler).await;
        assert!(matches!(result, Err(AppError::Connection(ref f)) if f.code == 502));
        assert!(saved.is_empty());
        assert!(log.requests().is_empty());
        assert_eq!(scheduler.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let api = ScriptedApi::new().refuse_connect();
        let log = api.log();
        let mut scheduler = scheduler(api, &[1], &config(3));
        let (result, _) = run_collecting(&mut scheduler).await;
        assert!(result.unwrap_err().is_connection());
        assert_eq!(log.disconnects(), 1);
        assert_eq!(scheduler.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn oversized_timeouts_fail_without_panicking() {
        let mut request_config = config(3);
        request_config.extraction.request_timeout_secs = u64::MAX;
        let api = ScriptedApi::new();
        let log = api.log();
        let mut scheduler = scheduler(api, &[1], &request_config);
        let (result, saved) = run_collecting(&mut scheduler).await;
        assert!(!result.unwrap_err().is_connection());
        assert!(log.requests().is_empty());
        assert!(saved.is_empty());
        assert_eq!(scheduler.tracker().record(1).map(|r| r.attempts), Some(0));

        let mut handshake_config = config(3);
        handshake_config.extraction.handshake_timeout_secs = u64::MAX;
        let api = ScriptedApi::new();
        let log = api.log();
        let mut scheduler = self::scheduler(api, &[1], &handshake_config);
        let (result, _) = run_collecting(&mut scheduler).await;
        assert!(result.is_err());
        assert!(log.connects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_is_cancelled_and_retried() {
        let api = ScriptedApi::new().replies(3, vec![Reply::Silent, Reply::Bars(1)]);
        let log = api.log();
        let mut scheduler = scheduler(api, &[3], &config(3));

        let (result, saved) = run_collecting(&mut scheduler).await;
        assert_eq!(result.unwrap().succeeded, 1);
        assert_eq!(log.requests(), vec![3, 3]);
        assert_eq!(log.cancels(), vec![3]);

        let record = &saved[0];
        assert_eq!(record.attempts, 2);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].code, TIMEOUT_CODE);
    }

    #[tokio::test]
    async fn duplicate_and_late_callbacks_are_ignored() {
        let end = ApiEvent::SeriesEnd {
            id: 8,
            start: "s".into(),
            end: "e".into(),
        };
        let api = ScriptedApi::new().replies(
            8,
            vec![Reply::Events(vec![
                ApiEvent::Bar {
                    id: 8,
                    bar: raw_bar("20210120 09:00:00"),
                },
                end.clone(),
                end,
                ApiEvent::Error {
                    id: 8,
                    code: 322,
                    message: "late".into(),
                },
            ])],
        );
        let log = api.log();
        let mut scheduler = scheduler(api, &[8, 9], &config(3));

        let (result, saved) = run_collecting(&mut scheduler).await;
        assert_eq!(result.unwrap().succeeded, 2);
        assert_eq!(log.requests(), vec![8, 9]);
        assert!(log.cancels().is_empty());

        let record = saved.iter().find(|r| r.id == 8).unwrap();
        assert!(record.errors.is_empty());
        assert_eq!(record.range_start.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn duplicate_targets_requested_once() {
        let api = ScriptedApi::new();
        let log = api.log();
        let mut scheduler = scheduler(api, &[1, 2, 1], &config(3));

        let (result, saved) = run_collecting(&mut scheduler).await;
        assert_eq!(result.unwrap().total(), 2);
        assert_eq!(saved.len(), 2);
        assert_eq!(log.requests(), vec![1, 2]);
    }

    #[tokio::test]
    async fn flushes_in_chunks() {
        let mut config = config(3);
        config.extraction.flush_every = 2;
        let mut scheduler = scheduler(ScriptedApi::new(), &[1, 2, 3, 4, 5], &config);

        let mut chunks = Vec::new();
        scheduler
            .run(&mut |records: Vec<EntityRecord>| {
                chunks.push(records.len());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(chunks, vec![2, 2, 1]);
    }
}
