use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, Context, Result};

use crate::extract::classify::CONNECTIVITY_LOST_CODE;

use super::wire::{self, Outbound};
use super::{ApiEvent, EventSink, EventStream, MarketDataApi, SeriesRequest, TickerId, SENTINEL_ID};

/// Longest inbound frame accepted; longer lines are skipped.
pub const MAX_FRAME_BYTES: u64 = 1 << 20;

/// Client for a line-delimited JSON gateway that fronts the vendor session.
///
/// Outbound calls are written straight to the socket; a reader task decodes inbound
/// frames and forwards them on the event stream. A closed socket is reported as a
/// connectivity-lost message on the sentinel id.
pub struct GatewayClient {
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl GatewayClient {
    pub fn new() -> Self {
        Self {
            writer: None,
            reader: None,
        }
    }

    async fn send(&mut self, frame: Outbound<'_>) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AppError::message("gateway session is not connected"))?;
        let line = wire::encode(&frame)?;
        writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write gateway frame")?;
        Ok(())
    }
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataApi for GatewayClient {
    async fn connect(&mut self, host: &str, port: u16, client_id: i32) -> Result<EventStream> {
        if self.writer.is_some() {
            return Err(AppError::message("gateway session already connected"));
        }

        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("could not reach gateway at {host}:{port}"))?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        self.writer = Some(write_half);
        self.reader = Some(tokio::spawn(pump_frames(BufReader::new(read_half), tx)));
        self.send(Outbound::Connect { client_id }).await?;
        debug!("gateway session opened at {host}:{port} as client {client_id}");

        Ok(rx)
    }

    async fn disconnect(&mut self) {
        if self.writer.is_some() {
            if let Err(err) = self.send(Outbound::Disconnect).await {
                debug!("disconnect frame not delivered: {err}");
            }
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    async fn request_series(&mut self, id: TickerId, request: &SeriesRequest) -> Result<()> {
        self.send(Outbound::RequestSeries { id, request }).await
    }

    async fn cancel_series(&mut self, id: TickerId) -> Result<()> {
        self.send(Outbound::CancelSeries { id }).await
    }
}

async fn pump_frames<R>(mut reader: BufReader<R>, tx: EventSink)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut oversized = false;
    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_FRAME_BYTES)
            .read_until(b'\n', &mut line)
            .await;
        match read {
            Ok(0) => {
                let _ = tx.send(ApiEvent::Error {
                    id: SENTINEL_ID,
                    code: CONNECTIVITY_LOST_CODE,
                    message: "gateway closed the connection".to_string(),
                });
                return;
            }
            Ok(_) => {
                let complete = line.last() == Some(&b'\n');
                if oversized || (!complete && line.len() as u64 == MAX_FRAME_BYTES) {
                    if !oversized {
                        warn!("skipping gateway frame longer than {MAX_FRAME_BYTES} bytes");
                    }
                    oversized = !complete;
                    continue;
                }
                let text = String::from_utf8_lossy(&line);
                if text.trim().is_empty() {
                    continue;
                }
                match wire::decode(&text) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!("skipping gateway frame: {err}"),
                }
            }
            Err(err) => {
                let _ = tx.send(ApiEvent::Error {
                    id: SENTINEL_ID,
                    code: CONNECTIVITY_LOST_CODE,
                    message: format!("gateway read failed: {err}"),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SeriesQuery;
    use crate::config::{ContractConfig, QueryConfig};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn round_trips_frames_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let connect = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all(b"{\"event\":\"error\",\"id\":-1,\"code\":2158,\"message\":\"ok\"}\n")
                .await
                .unwrap();
            let request = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all(b"garbage\n{\"event\":\"series_end\",\"id\":1301,\"start\":\"s\",\"end\":\"e\"}\n")
                .await
                .unwrap();
            (connect, request)
        });

        let mut client = GatewayClient::new();
        let mut events = client.connect("127.0.0.1", port, 7).await.unwrap();
        assert!(client.is_connected());

        let first = events.recv().await.unwrap();
        assert_eq!(
            first,
            ApiEvent::Error {
                id: SENTINEL_ID,
                code: 2158,
                message: "ok".into()
            }
        );

        let query = SeriesQuery::for_date(
            "20210120",
            &QueryConfig::default(),
            &ContractConfig::default(),
        );
        client
            .request_series(1301, &query.request_for(1301))
            .await
            .unwrap();

        let second = events.recv().await.unwrap();
        assert!(matches!(second, ApiEvent::SeriesEnd { id: 1301, .. }));

        let (connect, request) = server.await.unwrap();
        assert!(connect.contains("\"client_id\":7"));
        assert!(request.contains("\"op\":\"request_series\""));

        // server task dropped its socket
        let closed = events.recv().await.unwrap();
        assert!(matches!(
            closed,
            ApiEvent::Error {
                code: CONNECTIVITY_LOST_CODE,
                ..
            }
        ));

        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn oversized_frames_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut flood = vec![b'x'; MAX_FRAME_BYTES as usize * 2 + 17];
            flood.push(b'\n');
            socket.write_all(&flood).await.unwrap();
            socket
                .write_all(b"{\"event\":\"error\",\"id\":-1,\"code\":2158,\"message\":\"ok\"}\n")
                .await
                .unwrap();
            socket
        });

        let mut client = GatewayClient::new();
        let mut events = client.connect("127.0.0.1", port, 3).await.unwrap();
        let first = events.recv().await.unwrap();
        assert!(matches!(first, ApiEvent::Error { code: 2158, .. }));

        drop(server.await.unwrap());
        client.disconnect().await;
    }
}
