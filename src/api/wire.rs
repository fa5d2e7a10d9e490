use serde::{Deserialize, Serialize};

use crate::error::{AppError, Context};

use super::{ApiEvent, RawBar, SeriesRequest, TickerId};

/// Frames sent to the gateway, one JSON object per line.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Outbound<'a> {
    Connect {
        client_id: i32,
    },
    RequestSeries {
        id: TickerId,
        #[serde(flatten)]
        request: &'a SeriesRequest,
    },
    CancelSeries {
        id: TickerId,
    },
    Disconnect,
}

/// Frames received from the gateway.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Inbound {
    Bar {
        id: TickerId,
        bar: RawBar,
    },
    SeriesEnd {
        id: TickerId,
        start: String,
        end: String,
    },
    Error {
        id: TickerId,
        code: i32,
        #[serde(default)]
        message: String,
    },
}

impl From<Inbound> for ApiEvent {
    fn from(frame: Inbound) -> Self {
        match frame {
            Inbound::Bar { id, bar } => ApiEvent::Bar { id, bar },
            Inbound::SeriesEnd { id, start, end } => ApiEvent::SeriesEnd { id, start, end },
            Inbound::Error { id, code, message } => ApiEvent::Error { id, code, message },
        }
    }
}

pub fn encode(frame: &Outbound<'_>) -> crate::error::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode(line: &str) -> crate::error::Result<ApiEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(AppError::message("empty gateway frame"));
    }
    let frame: Inbound = serde_json::from_str(trimmed)
        .with_context(|| format!("undecodable gateway frame: {trimmed}"))?;
    Ok(frame.into())
}
