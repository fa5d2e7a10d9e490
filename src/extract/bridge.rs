use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::api::{ApiEvent, EventStream, MarketDataApi, RawBar, SeriesQuery, TickerId, SENTINEL_ID};
use crate::config::InsecurePolicy;
use crate::error::{AppError, ConnectionFailure, Result};

use super::classify::{self, ErrorClass, NOT_CONNECTED_CODE, TIMEOUT_CODE};
use super::tracker::{Bar, Session, Tracker};

/// What the scheduler has to react to after one event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing changed that affects scheduling.
    Nothing,
    /// The session finished its handshake.
    HandshakeReady,
    /// The entity's in-flight request finished, cleanly or not. Re-evaluate it.
    Settled(TickerId),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: TickerId,
    deadline: Instant,
}

/// Turns outbound calls and inbound callbacks into tracker updates.
///
/// Holds at most one armed request deadline. When it expires a timeout error is
/// synthesised for that entity and fed through the regular error path.
pub struct Bridge<A: MarketDataApi> {
    api: A,
    query: SeriesQuery,
    timeout: Duration,
    insecure_policy: InsecurePolicy,
    in_flight: Option<InFlight>,
}

impl<A: MarketDataApi> Bridge<A> {
    pub fn new(api: A, query: SeriesQuery, timeout: Duration, insecure_policy: InsecurePolicy) -> Self {
        Self {
            api,
            query,
            timeout,
            insecure_policy,
            in_flight: None,
        }
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn in_flight(&self) -> Option<TickerId> {
        self.in_flight.map(|slot| slot.id)
    }

    /// Count the attempt, arm the deadline, then send the request.
    pub async fn issue_request(&mut self, tracker: &mut Tracker, id: TickerId) -> Result<()> {
        let deadline = deadline_after(self.timeout)?;
        let attempt = tracker.record_attempt(id);
        self.in_flight = Some(InFlight { id, deadline });
        debug!("requesting bars for {id} (attempt {attempt})");

        let request = self.query.request_for(id);
        if let Err(err) = self.api.request_series(id, &request).await {
            self.in_flight = None;
            return Err(AppError::Connection(ConnectionFailure {
                code: NOT_CONNECTED_CODE,
                message: format!("request for {id} could not be sent: {err}"),
                insecure: false,
            }));
        }
        Ok(())
    }

    /// Wait for the next callback, or the armed deadline, whichever comes first.
    /// Returns `None` once the event stream is closed.
    pub async fn next_event(&mut self, events: &mut EventStream) -> Option<ApiEvent> {
        let Some(slot) = self.in_flight else {
            return events.recv().await;
        };

        tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep_until(slot.deadline) => {
                self.in_flight = None;
                Some(ApiEvent::Error {
                    id: slot.id,
                    code: TIMEOUT_CODE,
                    message: format!(
                        "Historical data request timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                })
            }
        }
    }

    /// Apply one callback to the tracker.
    ///
    /// Connection-level failures come back as `Err(AppError::Connection)`.
    pub async fn handle(&mut self, tracker: &mut Tracker, event: ApiEvent) -> Result<Outcome> {
        match event {
            ApiEvent::Bar { id, bar } => {
                if tracker.is_processed(id) {
                    debug!("dropping late bar for settled entity {id}");
                } else if !tracker.contains(id) {
                    warn!("bar for unknown entity {id} ignored");
                } else {
                    tracker.record_bar(id, normalize_bar(bar));
                }
                Ok(Outcome::Nothing)
            }
            ApiEvent::SeriesEnd { id, start, end } => {
                self.disarm(id);
                if tracker.is_processed(id) {
                    debug!("dropping late series end for settled entity {id}");
                    return Ok(Outcome::Nothing);
                }
                if !tracker.contains(id) {
                    warn!("series end for unknown entity {id} ignored");
                    return Ok(Outcome::Nothing);
                }
                if tracker.record_success(id, &start, &end) {
                    info!("data extraction completed for ticker {id}");
                }
                Ok(Outcome::Settled(id))
            }
            ApiEvent::Error { id, code, message } if id == SENTINEL_ID => {
                self.handle_lifecycle(code, message)
            }
            ApiEvent::Error { id, code, message } => {
                self.handle_entity_error(tracker, id, code, message).await
            }
        }
    }

    fn handle_lifecycle(&mut self, code: i32, message: String) -> Result<Outcome> {
        if !classify::is_known(code, true) {
            warn!("unrecognised session message {code}: {message}");
        }
        match classify::classify(code, true) {
            ErrorClass::HandshakeProgress { ready } => {
                info!("{message} (code {code})");
                Ok(if ready {
                    Outcome::HandshakeReady
                } else {
                    Outcome::Nothing
                })
            }
            ErrorClass::FatalConnection => {
                error!("session lost (code {code}): {message}");
                Err(AppError::Connection(ConnectionFailure {
                    code,
                    message,
                    insecure: false,
                }))
            }
            ErrorClass::InsecureConnection => match self.insecure_policy {
                InsecurePolicy::Abort => {
                    error!("insecure data-farm connection (code {code}): {message}");
                    Err(AppError::Connection(ConnectionFailure {
                        code,
                        message,
                        insecure: true,
                    }))
                }
                InsecurePolicy::Warn => {
                    warn!("insecure data-farm connection (code {code}): {message}");
                    Ok(Outcome::Nothing)
                }
            },
            ErrorClass::Retryable | ErrorClass::CancelAndRetry => Ok(Outcome::Nothing),
        }
    }

    async fn handle_entity_error(
        &mut self,
        tracker: &mut Tracker,
        id: TickerId,
        code: i32,
        message: String,
    ) -> Result<Outcome> {
        self.disarm(id);
        if tracker.is_processed(id) {
            debug!("dropping late error {code} for settled entity {id}");
            return Ok(Outcome::Nothing);
        }
        if !tracker.contains(id) {
            warn!("error {code} for unknown entity {id} ignored: {message}");
            return Ok(Outcome::Nothing);
        }
        if !classify::is_known(code, false) {
            warn!("unrecognised error code {code} for {id}");
        }

        error!("{message}: Ticker ID: {id}, Error Code: {code}");
        tracker.record_error(id, code, &message);

        if classify::classify(code, false) == ErrorClass::CancelAndRetry {
            if let Err(err) = self.api.cancel_series(id).await {
                warn!("cancel for {id} not delivered: {err}");
            }
        }
        Ok(Outcome::Settled(id))
    }

    fn disarm(&mut self, id: TickerId) {
        if self.in_flight.map(|slot| slot.id) == Some(id) {
            self.in_flight = None;
        }
    }
}

/// Morning for bars stamped before noon, afternoon otherwise. A stamp without a
/// time-of-day component counts as afternoon.
pub fn session_for(time_stamp: &str) -> Session {
    let hour = time_stamp
        .split_whitespace()
        .find(|token| token.contains(':'))
        .and_then(|token| token.split(':').next())
        .and_then(|hour| hour.parse::<u32>().ok());
    match hour {
        Some(hour) if hour < 12 => Session::Morning,
        _ => Session::Afternoon,
    }
}

pub fn normalize_bar(raw: RawBar) -> Bar {
    let session = session_for(&raw.date);
    Bar {
        time_stamp: raw.date,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        volume: raw.volume,
        average: raw.average,
        count: raw.bar_count,
        session,
    }
}

/// `now + timeout`, or an error when the timeout is too large to schedule.
pub fn deadline_after(timeout: Duration) -> Result<Instant> {
    Instant::now().checked_add(timeout).ok_or_else(|| {
        AppError::message(format!(
            "timeout of {} seconds is out of range",
            timeout.as_secs()
        ))
    })
}
