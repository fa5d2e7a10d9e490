//! Boundary to the vendor's historical-data session.
//!
//! The session is stateful and callback driven: requests go out through
//! [`MarketDataApi`] and every response comes back later as an [`ApiEvent`] on the
//! stream handed out by [`MarketDataApi::connect`]. Nothing in the extraction core
//! depends on how the events are transported.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{ContractConfig, QueryConfig};
use crate::error::Result;

pub mod gateway;
pub mod wire;

pub use gateway::GatewayClient;

/// Request id used by the vendor. Entity ids double as request ids.
pub type TickerId = i64;

/// Pseudo-id carried by connection-lifecycle and informational messages.
pub const SENTINEL_ID: TickerId = -1;

/// Raw bar as delivered by the vendor, before normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub average: f64,
    pub bar_count: i64,
}

/// Inbound callbacks, reduced to a closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiEvent {
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
        message: String,
    },
}

pub type EventStream = mpsc::UnboundedReceiver<ApiEvent>;
pub type EventSink = mpsc::UnboundedSender<ApiEvent>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: String,
    pub security_type: String,
    pub exchange: String,
    pub currency: String,
}

impl ContractSpec {
    pub fn stock(id: TickerId, contract: &ContractConfig) -> Self {
        Self {
            symbol: id.to_string(),
            security_type: contract.security_type.clone(),
            exchange: contract.exchange.clone(),
            currency: contract.currency.clone(),
        }
    }
}

/// Everything the vendor needs for one historical series request, minus the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRequest {
    pub contract: ContractSpec,
    pub end_date_time: String,
    pub duration: String,
    pub bar_size: String,
    pub what_to_show: String,
    pub use_rth: i32,
    pub date_format: i32,
    pub keep_up_to_date: bool,
    pub chart_options: Vec<String>,
}

/// Per-date query template; the contract is filled in per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub end_date_time: String,
    pub query: QueryConfig,
    pub contract: ContractConfig,
}

impl SeriesQuery {
    pub fn for_date(end_date: &str, query: &QueryConfig, contract: &ContractConfig) -> Self {
        Self {
            end_date_time: format!("{} {}", end_date, query.end_time),
            query: query.clone(),
            contract: contract.clone(),
        }
    }

    pub fn request_for(&self, id: TickerId) -> SeriesRequest {
        SeriesRequest {
            contract: ContractSpec::stock(id, &self.contract),
            end_date_time: self.end_date_time.clone(),
            duration: self.query.duration.clone(),
            bar_size: self.query.bar_size.clone(),
            what_to_show: self.query.what_to_show.clone(),
            use_rth: self.query.use_rth,
            date_format: self.query.date_format,
            keep_up_to_date: self.query.keep_up_to_date,
            chart_options: self.query.chart_options.clone(),
        }
    }
}

/// Outbound surface of the vendor session. One request may be in flight per session.
#[async_trait]
pub trait MarketDataApi: Send {
    /// Open the session. Handshake progress and every later callback arrive on the
    /// returned stream.
    async fn connect(&mut self, host: &str, port: u16, client_id: i32) -> Result<EventStream>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    async fn request_series(&mut self, id: TickerId, request: &SeriesRequest) -> Result<()>;

    async fn cancel_series(&mut self, id: TickerId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_contract_and_end_date_time() {
        let query = SeriesQuery::for_date(
            "20210120",
            &QueryConfig::default(),
            &ContractConfig::default(),
        );
        let request = query.request_for(1301);

        assert_eq!(request.end_date_time, "20210120 15:01:00");
        assert_eq!(request.contract.symbol, "1301");
        assert_eq!(request.contract.security_type, "STK");
        assert_eq!(request.contract.exchange, "SMART");
        assert_eq!(request.contract.currency, "JPY");
        assert_eq!(request.bar_size, "1 min");
    }
}
