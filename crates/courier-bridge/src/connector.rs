// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `TransportConnector` backed by an out-of-process protocol sidecar.
//!
//! Each account gets its own WebSocket at `<bridge.url>/sessions/<accountId>`.
//! A writer task drains outgoing frames into the socket; a reader task
//! routes events into the bounded session channel and resolves pending
//! requests by id. When the socket goes away the event channel closes and
//! every pending request fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_config::model::BridgeConfig;
use courier_core::traits::transport::RawTransportEvent;
use courier_core::types::{AccountId, Credentials, GroupMetadata, MessagePayload, SentMessage};
use courier_core::{CourierError, TransportConnector, TransportHandle, TransportSession};

use crate::protocol::{ClientFrame, ServerFrame, response_outcome};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<DashMap<u64, oneshot::Sender<Result<serde_json::Value, String>>>>;

const OUTGOING_BUFFER: usize = 64;

fn socket_error(context: &str, e: tokio_tungstenite::tungstenite::Error) -> CourierError {
    CourierError::Transport {
        message: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    }
}

fn closed() -> CourierError {
    CourierError::transport("bridge connection closed")
}

/// Opens sidecar sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Socket URL of one account.
    pub fn session_url(&self, account: &AccountId) -> String {
        format!(
            "{}/sessions/{}",
            self.config.url.trim_end_matches('/'),
            account
        )
    }
}

#[async_trait]
impl TransportConnector for BridgeConnector {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn open(
        &self,
        account: &AccountId,
        credentials: Option<Credentials>,
    ) -> Result<TransportSession, CourierError> {
        let url = self.session_url(account);
        let limit = Duration::from_secs(self.config.connect_timeout_secs);
        let (socket, _) = tokio::time::timeout(limit, connect_async(url.as_str()))
            .await
            .map_err(|_| CourierError::Timeout { duration: limit })?
            .map_err(|e| socket_error(&format!("failed to connect to bridge at {url}"), e))?;

        let (mut sink, stream) = socket.split();
        let open = serde_json::to_string(&ClientFrame::Open { credentials })?;
        sink.send(Message::text(open))
            .await
            .map_err(|e| socket_error("failed to open bridge session", e))?;
        info!(account_id = %account, url = %url, "bridge session opened");

        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);
        let (events_tx, events) = mpsc::channel(self.config.event_buffer.max(1));
        let pending: Pending = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(sink, outgoing_rx, cancel.clone()));
        tokio::spawn(read_loop(
            stream,
            events_tx,
            pending.clone(),
            cancel.clone(),
            account.clone(),
        ));

        let handle = BridgeHandle {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: Duration::from_secs(self.config.request_timeout_secs),
            cancel,
        };
        Ok(TransportSession {
            handle: Arc::new(handle),
            events,
        })
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outgoing: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = outgoing.recv() => match next {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "bridge write failed");
                        cancel.cancel();
                        return;
                    }
                }
                None => break,
            },
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    events: mpsc::Sender<RawTransportEvent>,
    pending: Pending,
    cancel: CancellationToken,
    account: AccountId,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(ServerFrame::Event { event }) => {
                        if events.send(event).await.is_err() {
                            debug!(account_id = %account, "event receiver dropped");
                            break;
                        }
                    }
                    Ok(ServerFrame::Response {
                        request_id,
                        result,
                        error,
                    }) => match pending.remove(&request_id) {
                        Some((_, waiter)) => {
                            let _ = waiter.send(response_outcome(result, error));
                        }
                        None => debug!(account_id = %account, request_id, "late bridge response"),
                    },
                    Err(e) => warn!(account_id = %account, error = %e, "malformed bridge frame"),
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(account_id = %account, error = %e, "bridge read failed");
                break;
            }
        }
    }
    cancel.cancel();
    // Dropping the senders fails every waiter.
    pending.clear();
    debug!(account_id = %account, "bridge reader stopped");
}

/// Live sidecar session of one account.
pub struct BridgeHandle {
    outgoing: mpsc::Sender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl BridgeHandle {
    async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientFrame,
    ) -> Result<serde_json::Value, CourierError> {
        if self.cancel.is_cancelled() {
            return Err(closed());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&build(id))?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.outgoing.send(Message::text(text)).await.is_err() {
            self.pending.remove(&id);
            return Err(closed());
        }
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(CourierError::transport(message)),
            Ok(Err(_)) => Err(closed()),
            Err(_) => {
                self.pending.remove(&id);
                Err(CourierError::Timeout {
                    duration: self.request_timeout,
                })
            }
        }
    }
}

#[async_trait]
impl TransportHandle for BridgeHandle {
    async fn send(&self, to: &str, payload: &MessagePayload) -> Result<SentMessage, CourierError> {
        let value = self
            .request(|request_id| ClientFrame::Send {
                request_id,
                to: to.to_string(),
                payload: payload.clone(),
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, CourierError> {
        let value = self
            .request(|request_id| ClientFrame::GroupMetadata {
                request_id,
                group_id: group_id.to_string(),
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn logout(&self) -> Result<(), CourierError> {
        self.request(|request_id| ClientFrame::Logout { request_id })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CourierError> {
        self.cancel.cancel();
        Ok(())
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_joins_without_double_slash() {
        let connector = BridgeConnector::new(BridgeConfig {
            url: "ws://127.0.0.1:8787/".into(),
            ..BridgeConfig::default()
        });
        let account = AccountId::new("acct-1").unwrap();
        assert_eq!(
            connector.session_url(&account),
            "ws://127.0.0.1:8787/sessions/acct-1"
        );
    }
}
