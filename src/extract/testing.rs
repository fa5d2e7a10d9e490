//! Scripted stand-in for the vendor session, used by the extraction tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::{
    ApiEvent, EventSink, EventStream, MarketDataApi, RawBar, SeriesRequest, TickerId, SENTINEL_ID,
};
use crate::error::{AppError, Result};

/// Response to one request for an entity.
#[derive(Debug, Clone)]
pub enum Reply {
    /// That many bars followed by a series end.
    Bars(usize),
    Error(i32),
    /// No callback at all; the request times out.
    Silent,
    Events(Vec<ApiEvent>),
}

pub fn raw_bar(date: &str) -> RawBar {
    RawBar {
        date: date.to_string(),
        open: 100.0,
        high: 101.0,
        low: 99.5,
        close: 100.5,
        volume: 1200.0,
        average: 100.2,
        bar_count: 14,
    }
}

pub fn lifecycle(code: i32) -> ApiEvent {
    ApiEvent::Error {
        id: SENTINEL_ID,
        code,
        message: format!("session message {code}"),
    }
}

#[derive(Debug, Default)]
struct Script {
    handshake: Vec<ApiEvent>,
    replies: HashMap<TickerId, VecDeque<Reply>>,
    refuse_connect: bool,
}

#[derive(Debug, Default)]
struct Calls {
    connects: Vec<i32>,
    requests: Vec<TickerId>,
    cancels: Vec<TickerId>,
    disconnects: usize,
}

/// Shared view of every call made against a [`ScriptedApi`] and its clones.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    calls: Arc<Mutex<Calls>>,
}

impl ScriptLog {
    pub fn connects(&self) -> Vec<i32> {
        self.calls.lock().unwrap().connects.clone()
    }

    pub fn requests(&self) -> Vec<TickerId> {
        self.calls.lock().unwrap().requests.clone()
    }

    pub fn cancels(&self) -> Vec<TickerId> {
        self.calls.lock().unwrap().cancels.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.calls.lock().unwrap().disconnects
    }
}

/// Unscripted requests succeed with two bars. Clones share the script and the log
/// but each holds its own session.
#[derive(Debug)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
    log: ScriptLog,
    sink: Option<EventSink>,
}

impl Clone for ScriptedApi {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            log: self.log.clone(),
            sink: None,
        }
    }
}

impl ScriptedApi {
    pub fn new() -> Self {
        let script = Script {
            handshake: vec![lifecycle(2104), lifecycle(2106), lifecycle(2158)],
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            log: ScriptLog::default(),
            sink: None,
        }
    }

    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    pub fn handshake(self, events: Vec<ApiEvent>) -> Self {
        self.script.lock().unwrap().handshake = events;
        self
    }

    pub fn refuse_connect(self) -> Self {
        self.script.lock().unwrap().refuse_connect = true;
        self
    }

    /// Queue replies for successive requests of `id`.
    pub fn replies(self, id: TickerId, replies: Vec<Reply>) -> Self {
        self.script
            .lock()
            .unwrap()
            .replies
            .entry(id)
            .or_default()
            .extend(replies);
        self
    }

    pub fn silent(self, id: TickerId) -> Self {
        self.replies(id, vec![Reply::Silent])
    }

    fn emit(&self, event: ApiEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }
}

#[async_trait]
impl MarketDataApi for ScriptedApi {
    async fn connect(&mut self, _host: &str, _port: u16, client_id: i32) -> Result<EventStream> {
        self.log.calls.lock().unwrap().connects.push(client_id);
        let script = self.script.lock().unwrap();
        if script.refuse_connect {
            return Err(AppError::message("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &script.handshake {
            let _ = tx.send(event.clone());
        }
        drop(script);
        self.sink = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&mut self) {
        self.log.calls.lock().unwrap().disconnects += 1;
        self.sink = None;
    }

    fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    async fn request_series(&mut self, id: TickerId, _request: &SeriesRequest) -> Result<()> {
        if self.sink.is_none() {
            return Err(AppError::message("not connected"));
        }
        self.log.calls.lock().unwrap().requests.push(id);
        let reply = self
            .script
            .lock()
            .unwrap()
            .replies
            .get_mut(&id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Reply::Bars(2));

        match reply {
            Reply::Bars(count) => {
                for minute in 0..count {
                    self.emit(ApiEvent::Bar {
                        id,
                        bar: raw_bar(&format!("20210120 09:{minute:02}:00")),
                    });
                }
                self.emit(ApiEvent::SeriesEnd {
                    id,
                    start: "20210120 09:00:00".into(),
                    end: "20210120 15:01:00".into(),
                });
            }
            Reply::Error(code) => self.emit(ApiEvent::Error {
                id,
                code,
                message: format!("scripted error {code}"),
            }),
            Reply::Silent => {}
            Reply::Events(events) => {
                for event in events {
                    self.emit(event);
                }
            }
        }
        Ok(())
    }

    async fn cancel_series(&mut self, id: TickerId) -> Result<()> {
        self.log.calls.lock().unwrap().cancels.push(id);
        Ok(())
    }
}
