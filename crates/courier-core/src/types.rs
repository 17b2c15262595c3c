// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the connection manager, queue, and health service.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CourierError;

/// Server suffix appended to bare phone-number recipients.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server suffix identifying group chats.
pub const GROUP_SERVER: &str = "g.us";

/// Chat id of the broadcast status feed, never surfaced as a message.
pub const STATUS_BROADCAST: &str = "status@broadcast";

const MAX_ACCOUNT_ID_LEN: usize = 128;

/// Identifier of a tenant business account.
///
/// Account ids double as directory names in the session store, so only
/// `[A-Za-z0-9_.-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Validates and wraps an account id.
    pub fn new(raw: impl Into<String>) -> Result<Self, CourierError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_ACCOUNT_ID_LEN {
            return Err(CourierError::InvalidInput(format!(
                "account id must be 1 to {MAX_ACCOUNT_ID_LEN} characters"
            )));
        }
        if raw == "." || raw == ".." {
            return Err(CourierError::InvalidInput(format!(
                "account id '{raw}' is reserved"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(CourierError::InvalidInput(format!(
                "account id contains invalid character '{bad}'"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = CourierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::new(value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

/// Turns a caller-supplied recipient into a routable chat id.
///
/// Full chat ids (`user@server`) pass through; bare phone numbers are stripped
/// of formatting and suffixed with [`USER_SERVER`].
pub fn normalize_recipient(to: &str) -> Result<String, CourierError> {
    let to = to.trim();
    if to.is_empty() {
        return Err(CourierError::InvalidRecipient("recipient is empty".into()));
    }
    if let Some((user, server)) = to.split_once('@') {
        if user.is_empty() || server.is_empty() {
            return Err(CourierError::InvalidRecipient(to.to_string()));
        }
        return Ok(to.to_string());
    }
    let digits: String = to
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CourierError::InvalidRecipient(to.to_string()));
    }
    Ok(format!("{digits}@{USER_SERVER}"))
}

/// Whether a chat id addresses a group.
pub fn is_group_chat(chat_id: &str) -> bool {
    chat_id.ends_with(&format!("@{GROUP_SERVER}"))
}

/// Externally observable lifecycle state of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    QrPending,
    Connected,
}

/// Snapshot of one account's session as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub account_id: AccountId,
    pub status: SessionStatus,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Latest QR challenge while the session is `qrPending`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl SessionInfo {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            status: SessionStatus::Connecting,
            reconnect_attempts: 0,
            last_connected_at: None,
            qr: None,
        }
    }
}

/// Result of a connect call: either a QR challenge or the current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectOutcome {
    Qr {
        #[serde(rename = "qrCode")]
        qr_code: String,
    },
    Status { status: SessionStatus },
}

/// Queue side a job belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    /// Name of the durable queue backing this direction.
    pub fn queue_name(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// One quick-reply button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub text: String,
}

/// Message body carried through the queue and the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePayload {
    Text {
        text: String,
    },
    Media {
        url: String,
        mimetype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    Buttons {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
        buttons: Vec<Button>,
    },
}

impl MessagePayload {
    /// Rejects payloads the transport would refuse.
    pub fn validate(&self) -> Result<(), CourierError> {
        match self {
            MessagePayload::Text { text } if text.trim().is_empty() => {
                Err(CourierError::InvalidInput("text must not be empty".into()))
            }
            MessagePayload::Media { url, mimetype, .. } => {
                if url.trim().is_empty() {
                    return Err(CourierError::InvalidInput("media url must not be empty".into()));
                }
                if !mimetype.contains('/') {
                    return Err(CourierError::InvalidInput(format!(
                        "invalid mimetype '{mimetype}'"
                    )));
                }
                Ok(())
            }
            MessagePayload::Buttons { text, buttons, .. } => {
                if text.trim().is_empty() {
                    return Err(CourierError::InvalidInput("button text must not be empty".into()));
                }
                if buttons.is_empty() {
                    return Err(CourierError::InvalidInput("at least one button is required".into()));
                }
                Ok(())
            }
            MessagePayload::Text { .. } => Ok(()),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Text { .. } => "text",
            MessagePayload::Media { .. } => "media",
            MessagePayload::Buttons { .. } => "buttons",
        }
    }
}

/// Body of a queue job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessageData {
    pub account_id: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub direction: Direction,
    /// Counterpart chat: the recipient for outbound, the source chat for inbound.
    pub chat_id: String,
    pub payload: MessagePayload,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl QueueMessageData {
    pub fn outbound(account_id: AccountId, chat_id: String, payload: MessagePayload) -> Self {
        Self {
            account_id,
            tenant_id: None,
            direction: Direction::Outbound,
            chat_id,
            payload,
            priority: 0,
            delay_ms: 0,
            attempt_count: 0,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Delivery progress of a message, ordered by how far it got.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum DeliveryStatus {
    Error,
    Pending,
    ServerAck,
    Delivered,
    Read,
    Played,
}

impl DeliveryStatus {
    /// Maps the protocol's numeric ack level.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DeliveryStatus::Pending,
            2 => DeliveryStatus::ServerAck,
            3 => DeliveryStatus::Delivered,
            4 => DeliveryStatus::Read,
            5 => DeliveryStatus::Played,
            _ => DeliveryStatus::Error,
        }
    }
}

/// Receipt returned by the transport for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

/// A message received from the network, after filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub account_id: AccountId,
    pub chat_id: String,
    /// Author within a group chat; `None` for direct chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    pub payload: MessagePayload,
    /// Id of the button the user tapped, for button replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn is_group(&self) -> bool {
        is_group_chat(&self.chat_id)
    }
}

/// Group chat metadata as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Opaque credential bundle produced by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

/// One entry of the per-account message cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub message_id: String,
    pub chat_id: String,
    pub from_me: bool,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of an account's message cache written to the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistory {
    pub account_id: AccountId,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<HistoryRecord>,
}

/// Why a transport session ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "camelCase")]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    TimedOut,
    RestartRequired,
    ConnectionReplaced,
    BadSession,
    Other(u16),
}

impl DisconnectReason {
    /// Maps the protocol's numeric close codes.
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            428 => DisconnectReason::ConnectionClosed,
            408 => DisconnectReason::TimedOut,
            440 => DisconnectReason::ConnectionReplaced,
            500 => DisconnectReason::BadSession,
            515 => DisconnectReason::RestartRequired,
            other => DisconnectReason::Other(other),
        }
    }

    /// The remote side ended the session; stored credentials are dead.
    pub fn is_logout(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::LoggedOut => f.write_str("logged out"),
            DisconnectReason::ConnectionClosed => f.write_str("connection closed"),
            DisconnectReason::ConnectionLost => f.write_str("connection lost"),
            DisconnectReason::TimedOut => f.write_str("timed out"),
            DisconnectReason::RestartRequired => f.write_str("restart required"),
            DisconnectReason::ConnectionReplaced => f.write_str("connection replaced"),
            DisconnectReason::BadSession => f.write_str("bad session"),
            DisconnectReason::Other(code) => write!(f, "closed with code {code}"),
        }
    }
}

/// Health of one subsystem, ordered from best to worst.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemHealth {
    pub status: HealthLevel,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SubsystemHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthLevel::Healthy,
            latency_ms: 0,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Degraded,
            latency_ms: 0,
            detail: Some(detail.into()),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Unhealthy,
            latency_ms: 0,
            detail: Some(detail.into()),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Composite health derived from every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub subsystems: BTreeMap<String, SubsystemHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Worst subsystem wins; an empty report is healthy.
    pub fn aggregate(subsystems: BTreeMap<String, SubsystemHealth>) -> Self {
        let overall = subsystems
            .values()
            .map(|s| s.status)
            .max()
            .unwrap_or(HealthLevel::Healthy);
        Self {
            overall,
            subsystems,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn account_id_rejects_path_tricks() {
        assert!(AccountId::new("acct-1").is_ok());
        assert!(AccountId::new("tenant_a.main").is_ok());
        assert!(AccountId::new("").is_err());
        assert!(AccountId::new("..").is_err());
        assert!(AccountId::new("a/b").is_err());
        assert!(AccountId::new("x".repeat(129)).is_err());
    }

    #[test]
    fn account_id_deserialization_validates() {
        let ok: AccountId = serde_json::from_str("\"acct-1\"").unwrap();
        assert_eq!(ok.as_str(), "acct-1");
        assert!(serde_json::from_str::<AccountId>("\"../etc\"").is_err());
    }

    #[test]
    fn recipients_are_normalized() {
        assert_eq!(
            normalize_recipient("+1 (555) 010-2030").unwrap(),
            "15550102030@s.whatsapp.net"
        );
        assert_eq!(
            normalize_recipient("12345-678@g.us").unwrap(),
            "12345-678@g.us"
        );
        assert!(normalize_recipient("").is_err());
        assert!(normalize_recipient("hello").is_err());
        assert!(normalize_recipient("@s.whatsapp.net").is_err());
    }

    #[test]
    fn session_status_uses_camel_case() {
        assert_eq!(SessionStatus::QrPending.to_string(), "qrPending");
        let json = serde_json::to_string(&SessionStatus::QrPending).unwrap();
        assert_eq!(json, "\"qrPending\"");
    }

    #[test]
    fn connect_outcome_shapes() {
        let qr = ConnectOutcome::Qr {
            qr_code: "2@abc".into(),
        };
        assert_eq!(serde_json::to_value(&qr).unwrap()["qrCode"], "2@abc");
        let status = ConnectOutcome::Status {
            status: SessionStatus::Connected,
        };
        assert_eq!(serde_json::to_value(&status).unwrap()["status"], "connected");
    }

    #[test]
    fn payload_wire_format_is_tagged() {
        let payload: MessagePayload = serde_json::from_value(serde_json::json!({
            "type": "media",
            "url": "https://cdn.example/a.jpg",
            "mimetype": "image/jpeg",
            "fileName": "a.jpg"
        }))
        .unwrap();
        match payload {
            MessagePayload::Media { file_name, caption, .. } => {
                assert_eq!(file_name.as_deref(), Some("a.jpg"));
                assert!(caption.is_none());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn payload_validation() {
        assert!(MessagePayload::Text { text: " ".into() }.validate().is_err());
        let no_buttons = MessagePayload::Buttons {
            text: "pick".into(),
            footer: None,
            buttons: vec![],
        };
        assert!(no_buttons.validate().is_err());
        let media = MessagePayload::Media {
            url: "https://x/y.pdf".into(),
            mimetype: "pdf".into(),
            caption: None,
            file_name: None,
        };
        assert!(media.validate().is_err());
    }

    #[test]
    fn disconnect_codes_map_to_reasons() {
        assert_eq!(DisconnectReason::from_code(401), DisconnectReason::LoggedOut);
        assert!(DisconnectReason::from_code(401).is_logout());
        assert_eq!(DisconnectReason::from_code(515), DisconnectReason::RestartRequired);
        assert_eq!(DisconnectReason::from_code(999), DisconnectReason::Other(999));
    }

    #[test]
    fn empty_health_report_is_healthy() {
        let report = HealthStatus::aggregate(BTreeMap::new());
        assert_eq!(report.overall, HealthLevel::Healthy);
    }

    fn level() -> impl Strategy<Value = HealthLevel> {
        prop_oneof![
            Just(HealthLevel::Healthy),
            Just(HealthLevel::Degraded),
            Just(HealthLevel::Unhealthy),
        ]
    }

    proptest! {
        #[test]
        fn aggregation_is_worst_case(levels in proptest::collection::vec(level(), 0..6)) {
            let subsystems: BTreeMap<String, SubsystemHealth> = levels
                .iter()
                .enumerate()
                .map(|(i, l)| {
                    (format!("probe-{i}"), SubsystemHealth { status: *l, latency_ms: 0, detail: None })
                })
                .collect();
            let report = HealthStatus::aggregate(subsystems);
            let any_unhealthy = levels.contains(&HealthLevel::Unhealthy);
            let any_degraded = levels.contains(&HealthLevel::Degraded);
            prop_assert_eq!(report.overall == HealthLevel::Unhealthy, any_unhealthy);
            prop_assert_eq!(
                report.overall == HealthLevel::Degraded,
                !any_unhealthy && any_degraded
            );
        }
    }
}
