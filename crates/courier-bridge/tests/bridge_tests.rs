// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connector tests against an in-process fake sidecar.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use courier_bridge::{BridgeConnector, ClientFrame};
use courier_config::model::BridgeConfig;
use courier_core::traits::transport::{ConnectionState, RawTransportEvent};
use courier_core::types::{AccountId, Credentials, DeliveryStatus, MessagePayload};
use courier_core::{CourierError, TransportConnector};

/// How the fake sidecar answers requests.
#[derive(Clone, Copy)]
enum Script {
    Answer,
    Silent,
    HangUpAfterOpen,
}

/// Accepts one socket, reports its path and first frame, then follows `script`.
async fn fake_sidecar(script: Script) -> (String, mpsc::Receiver<(String, ClientFrame)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (seen_tx, seen_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let path = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
        let captured = path.clone();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *captured.lock().unwrap() = req.uri().path().to_string();
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
        let path = path.lock().unwrap().clone();

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let frame: ClientFrame = serde_json::from_str(text.as_str()).unwrap();
            let _ = seen_tx.send((path.clone(), frame.clone())).await;

            let reply = match (&frame, script) {
                (ClientFrame::Open { .. }, Script::HangUpAfterOpen) => {
                    let _ = ws.close(None).await;
                    return;
                }
                (ClientFrame::Open { .. }, _) => json!({
                    "frame": "event",
                    "event": {"type": "connectionUpdate", "state": "open"}
                }),
                (_, Script::Silent) => continue,
                (ClientFrame::Send { request_id, .. }, _) => json!({
                    "frame": "response",
                    "requestId": request_id,
                    "result": {
                        "messageId": "BRIDGE1",
                        "status": "serverAck",
                        "timestamp": "2026-01-01T00:00:00Z"
                    }
                }),
                (ClientFrame::GroupMetadata { request_id, .. }, _) => json!({
                    "frame": "response",
                    "requestId": request_id,
                    "error": "item-not-found"
                }),
                (ClientFrame::Logout { request_id }, _) => json!({
                    "frame": "response",
                    "requestId": request_id
                }),
            };
            if ws.send(Message::text(reply.to_string())).await.is_err() {
                return;
            }
        }
    });

    (url, seen_rx)
}

fn connector(url: String) -> BridgeConnector {
    BridgeConnector::new(BridgeConfig {
        url,
        connect_timeout_secs: 2,
        request_timeout_secs: 1,
        event_buffer: 8,
    })
}

fn acct() -> AccountId {
    AccountId::new("acct-1").unwrap()
}

#[tokio::test]
async fn open_sends_credentials_and_relays_events() {
    let (url, mut seen) = fake_sidecar(Script::Answer).await;
    let creds = Credentials(json!({"me": "acct-1"}));
    let mut session = connector(url).open(&acct(), Some(creds.clone())).await.unwrap();

    let (path, first) = seen.recv().await.unwrap();
    assert_eq!(path, "/sessions/acct-1");
    assert_eq!(
        first,
        ClientFrame::Open {
            credentials: Some(creds)
        }
    );

    let event = tokio::time::timeout(Duration::from_secs(2), session.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        RawTransportEvent::ConnectionUpdate {
            state: ConnectionState::Open,
            qr: None
        }
    );
}

#[tokio::test]
async fn requests_resolve_by_id() {
    let (url, _seen) = fake_sidecar(Script::Answer).await;
    let session = connector(url).open(&acct(), None).await.unwrap();

    let sent = session
        .handle
        .send("1@s.whatsapp.net", &MessagePayload::Text { text: "hi".into() })
        .await
        .unwrap();
    assert_eq!(sent.message_id, "BRIDGE1");
    assert_eq!(sent.status, DeliveryStatus::ServerAck);

    let err = session.handle.group_metadata("9@g.us").await.unwrap_err();
    assert!(err.to_string().contains("item-not-found"), "{err}");

    session.handle.logout().await.unwrap();
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (url, _seen) = fake_sidecar(Script::Silent).await;
    let session = connector(url).open(&acct(), None).await.unwrap();

    let err = session
        .handle
        .send("1@s.whatsapp.net", &MessagePayload::Text { text: "hi".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Timeout { .. }));
}

#[tokio::test]
async fn sidecar_hang_up_closes_event_stream() {
    let (url, _seen) = fake_sidecar(Script::HangUpAfterOpen).await;
    let mut session = connector(url).open(&acct(), None).await.unwrap();

    let end = tokio::time::timeout(Duration::from_secs(2), session.events.recv())
        .await
        .unwrap();
    assert!(end.is_none());

    let err = session.handle.logout().await.unwrap_err();
    assert!(matches!(err, CourierError::Transport { .. }));
}

#[tokio::test]
async fn unreachable_bridge_fails_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = connector(url).open(&acct(), None).await.unwrap_err();
    assert!(matches!(err, CourierError::Transport { .. }));
}
