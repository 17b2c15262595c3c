// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport seam: the protocol library that performs the handshake and
//! message framing is driven through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CourierError;
use crate::types::{
    AccountId, Credentials, DisconnectReason, GroupMetadata, MessagePayload, SentMessage,
};

/// Opens transport sessions, one per account.
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Starts a session. With `None` credentials the transport begins a fresh
    /// pairing handshake and reports QR challenges through the event stream.
    async fn open(
        &self,
        account: &AccountId,
        credentials: Option<Credentials>,
    ) -> Result<TransportSession, CourierError>;
}

/// Commands accepted by a live transport session.
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    async fn send(&self, to: &str, payload: &MessagePayload) -> Result<SentMessage, CourierError>;

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, CourierError>;

    /// Ends the session remotely; the credentials become unusable.
    async fn logout(&self) -> Result<(), CourierError>;

    /// Closes the socket, leaving the credentials valid.
    async fn close(&self) -> Result<(), CourierError>;
}

/// A freshly opened transport session.
pub struct TransportSession {
    pub handle: Arc<dyn TransportHandle>,
    /// Bounded stream of raw events; closes when the socket is gone.
    pub events: mpsc::Receiver<RawTransportEvent>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession").finish_non_exhaustive()
    }
}

/// Socket state reported in a connection update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close { reason: DisconnectReason },
}

/// Content of a raw message before translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RawContent {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Media {
        url: String,
        mimetype: String,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ButtonReply {
        selected_id: String,
        display_text: String,
    },
    /// Key distribution, revokes, ephemeral settings and similar plumbing.
    Protocol,
    #[serde(other)]
    Unsupported,
}

/// A message as the transport delivers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub push_name: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
    pub content: RawContent,
}

/// Ack-level change for a previously sent or received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatusUpdate {
    pub message_id: String,
    pub chat_id: String,
    pub status: u8,
}

/// Everything a transport session can report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RawTransportEvent {
    ConnectionUpdate {
        #[serde(flatten)]
        state: ConnectionState,
        #[serde(default)]
        qr: Option<String>,
    },
    CredsUpdate {
        credentials: Credentials,
    },
    MessagesUpsert {
        messages: Vec<RawMessage>,
    },
    MessagesUpdate {
        updates: Vec<RawStatusUpdate>,
    },
    #[serde(rename_all = "camelCase")]
    MessagesDelete {
        chat_id: String,
        message_ids: Vec<String>,
    },
    GroupsUpdate {
        groups: Vec<GroupMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    GroupParticipantsUpdate {
        group_id: String,
        participants: Vec<String>,
        action: String,
    },
}
