// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON frames exchanged with the protocol sidecar.
//!
//! Every WebSocket text message carries exactly one frame. Requests carry a
//! `requestId` that the sidecar echoes in its `response` frame; events are
//! unsolicited.

use serde::{Deserialize, Serialize};

use courier_core::traits::transport::RawTransportEvent;
use courier_core::types::{Credentials, MessagePayload};

/// Frames sent to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientFrame {
    /// First frame on every socket. `None` starts a fresh pairing.
    Open {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<Credentials>,
    },
    #[serde(rename_all = "camelCase")]
    Send {
        request_id: u64,
        to: String,
        payload: MessagePayload,
    },
    #[serde(rename_all = "camelCase")]
    GroupMetadata { request_id: u64, group_id: String },
    #[serde(rename_all = "camelCase")]
    Logout { request_id: u64 },
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "camelCase")]
pub enum ServerFrame {
    Event {
        event: RawTransportEvent,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: u64,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Outcome of a response frame. The error string wins over the result.
pub fn response_outcome(
    result: Option<serde_json::Value>,
    error: Option<String>,
) -> Result<serde_json::Value, String> {
    match error {
        Some(error) => Err(error),
        None => Ok(result.unwrap_or(serde_json::Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use courier_core::traits::transport::ConnectionState;

    use super::*;

    #[test]
    fn send_frame_shape() {
        let frame = ClientFrame::Send {
            request_id: 7,
            to: "1@s.whatsapp.net".into(),
            payload: MessagePayload::Text { text: "hi".into() },
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "op": "send",
                "requestId": 7,
                "to": "1@s.whatsapp.net",
                "payload": {"type": "text", "text": "hi"}
            })
        );
    }

    #[test]
    fn open_frame_omits_missing_credentials() {
        let frame = ClientFrame::Open { credentials: None };
        assert_eq!(serde_json::to_value(&frame).unwrap(), json!({"op": "open"}));
    }

    #[test]
    fn event_frame_wraps_raw_event() {
        let frame: ServerFrame = serde_json::from_value(json!({
            "frame": "event",
            "event": {"type": "connectionUpdate", "state": "open"}
        }))
        .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Event {
                event: RawTransportEvent::ConnectionUpdate {
                    state: ConnectionState::Open,
                    qr: None
                }
            }
        );
    }

    #[test]
    fn response_error_wins_over_result() {
        let frame: ServerFrame = serde_json::from_value(json!({
            "frame": "response",
            "requestId": 3,
            "result": {"ignored": true},
            "error": "not on whatsapp"
        }))
        .unwrap();
        let ServerFrame::Response {
            request_id,
            result,
            error,
        } = frame
        else {
            panic!("expected response frame");
        };
        assert_eq!(request_id, 3);
        assert_eq!(
            response_outcome(result, error),
            Err("not on whatsapp".to_string())
        );
        assert_eq!(
            response_outcome(None, None),
            Ok(serde_json::Value::Null)
        );
    }
}
