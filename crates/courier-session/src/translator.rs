// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps raw transport events onto domain events.
//!
//! Pure functions; the connection manager's event pump calls them and
//! publishes the results on the bus.

use chrono::{DateTime, Utc};

use courier_bus::DomainEvent;
use courier_core::types::{
    AccountId, DeliveryStatus, HistoryRecord, InboundMessage, MessagePayload, STATUS_BROADCAST,
};
use courier_core::traits::transport::{RawContent, RawMessage, RawStatusUpdate};

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// The payload of a message, plus the tapped button id for button replies.
/// `None` for content that carries no user-visible body.
fn payload_of(content: &RawContent) -> Option<(MessagePayload, Option<String>)> {
    match content {
        RawContent::Text { text } => Some((MessagePayload::Text { text: text.clone() }, None)),
        RawContent::Media {
            url,
            mimetype,
            caption,
            file_name,
        } => Some((
            MessagePayload::Media {
                url: url.clone(),
                mimetype: mimetype.clone(),
                caption: caption.clone(),
                file_name: file_name.clone(),
            },
            None,
        )),
        RawContent::ButtonReply {
            selected_id,
            display_text,
        } => Some((
            MessagePayload::Text {
                text: display_text.clone(),
            },
            Some(selected_id.clone()),
        )),
        RawContent::Protocol | RawContent::Unsupported => None,
    }
}

/// Turns a raw message into an inbound message.
///
/// Returns `None` for our own echoes, status broadcasts and protocol or
/// unsupported content.
pub fn translate_message(account: &AccountId, raw: &RawMessage) -> Option<InboundMessage> {
    if raw.from_me || raw.chat_id == STATUS_BROADCAST {
        return None;
    }
    let (payload, button_id) = payload_of(&raw.content)?;
    Some(InboundMessage {
        id: raw.id.clone(),
        account_id: account.clone(),
        chat_id: raw.chat_id.clone(),
        sender: raw.participant.clone(),
        push_name: raw.push_name.clone(),
        payload,
        button_id,
        timestamp: timestamp(raw.timestamp),
    })
}

/// History entry for any message with a body, including our own echoes.
pub fn history_record(raw: &RawMessage) -> Option<HistoryRecord> {
    if raw.chat_id == STATUS_BROADCAST {
        return None;
    }
    let (payload, _) = payload_of(&raw.content)?;
    Some(HistoryRecord {
        message_id: raw.id.clone(),
        chat_id: raw.chat_id.clone(),
        from_me: raw.from_me,
        payload,
        timestamp: timestamp(raw.timestamp),
    })
}

pub fn status_event(account: &AccountId, update: &RawStatusUpdate) -> DomainEvent {
    DomainEvent::MessageStatus {
        account_id: account.clone(),
        chat_id: update.chat_id.clone(),
        message_id: update.message_id.clone(),
        status: DeliveryStatus::from_code(update.status),
    }
}

pub fn deletion_event(account: &AccountId, chat_id: &str, message_ids: &[String]) -> DomainEvent {
    DomainEvent::MessageDeleted {
        account_id: account.clone(),
        chat_id: chat_id.to_string(),
        message_ids: message_ids.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct() -> AccountId {
        AccountId::new("acct-1").unwrap()
    }

    fn raw(content: RawContent) -> RawMessage {
        RawMessage {
            id: "ABC123".into(),
            chat_id: "15551234567@s.whatsapp.net".into(),
            participant: None,
            from_me: false,
            push_name: Some("Ana".into()),
            timestamp: 1_700_000_000,
            content,
        }
    }

    #[test]
    fn text_message_is_translated() {
        let msg = translate_message(
            &acct(),
            &raw(RawContent::Text {
                text: "hello".into(),
            }),
        )
        .unwrap();
        assert_eq!(msg.id, "ABC123");
        assert_eq!(msg.account_id, acct());
        assert_eq!(msg.payload, MessagePayload::Text { text: "hello".into() });
        assert_eq!(msg.push_name.as_deref(), Some("Ana"));
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
        assert!(!msg.is_group());
    }

    #[test]
    fn echoes_broadcasts_and_protocol_messages_are_dropped() {
        let mut own = raw(RawContent::Text { text: "x".into() });
        own.from_me = true;
        assert!(translate_message(&acct(), &own).is_none());
        assert!(history_record(&own).unwrap().from_me);

        let mut status = raw(RawContent::Text { text: "x".into() });
        status.chat_id = STATUS_BROADCAST.into();
        assert!(translate_message(&acct(), &status).is_none());
        assert!(history_record(&status).is_none());

        assert!(translate_message(&acct(), &raw(RawContent::Protocol)).is_none());
        assert!(translate_message(&acct(), &raw(RawContent::Unsupported)).is_none());
    }

    #[test]
    fn button_reply_carries_selected_id() {
        let msg = translate_message(
            &acct(),
            &raw(RawContent::ButtonReply {
                selected_id: "opt-2".into(),
                display_text: "Option 2".into(),
            }),
        )
        .unwrap();
        assert_eq!(msg.button_id.as_deref(), Some("opt-2"));
        assert_eq!(
            msg.payload,
            MessagePayload::Text {
                text: "Option 2".into()
            }
        );
    }

    #[test]
    fn group_message_keeps_its_author() {
        let mut in_group = raw(RawContent::Media {
            url: "https://cdn.example/a.jpg".into(),
            mimetype: "image/jpeg".into(),
            caption: Some("look".into()),
            file_name: None,
        });
        in_group.chat_id = "12036304@g.us".into();
        in_group.participant = Some("15550001111@s.whatsapp.net".into());
        let msg = translate_message(&acct(), &in_group).unwrap();
        assert!(msg.is_group());
        assert_eq!(msg.sender.as_deref(), Some("15550001111@s.whatsapp.net"));
        assert_eq!(msg.payload.kind(), "media");
    }

    #[test]
    fn status_codes_map_to_delivery_levels() {
        let event = status_event(
            &acct(),
            &RawStatusUpdate {
                message_id: "m1".into(),
                chat_id: "1@s.whatsapp.net".into(),
                status: 4,
            },
        );
        match event {
            DomainEvent::MessageStatus { status, .. } => assert_eq!(status, DeliveryStatus::Read),
            other => panic!("unexpected {other:?}"),
        }
    }
}
