// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue job handlers wiring the queues to the session layer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use courier_core::CourierError;
use courier_core::types::{Direction, InboundMessage, QueueMessageData};
use courier_queue::{JobHandler, QueueJob};
use courier_session::ConnectionManager;

/// Metadata key carrying the full inbound message inside a queue job.
pub(crate) const INBOUND_MESSAGE_KEY: &str = "message";

/// Application hook for received messages.
///
/// Errors are retried by the inbound queue unless
/// [`CourierError::is_retryable`] says otherwise.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> Result<(), CourierError>;
}

/// Default inbound handler: logs each message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInboundHandler;

#[async_trait]
impl InboundHandler for LoggingInboundHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<(), CourierError> {
        info!(
            account_id = %message.account_id,
            chat_id = %message.chat_id,
            message_id = %message.id,
            kind = message.payload.kind(),
            group = message.is_group(),
            "inbound message"
        );
        Ok(())
    }
}

/// Packs an inbound message into queue data.
pub(crate) fn inbound_job(message: &InboundMessage) -> Result<QueueMessageData, CourierError> {
    let mut data = QueueMessageData::outbound(
        message.account_id.clone(),
        message.chat_id.clone(),
        message.payload.clone(),
    );
    data.direction = Direction::Inbound;
    data.metadata.insert(
        INBOUND_MESSAGE_KEY.to_string(),
        serde_json::to_value(message)?,
    );
    Ok(data)
}

/// Drains the inbound queue into the application's [`InboundHandler`].
pub(crate) struct InboundJobHandler {
    pub(crate) handler: Arc<dyn InboundHandler>,
}

#[async_trait]
impl JobHandler for InboundJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CourierError> {
        let raw = job
            .data
            .metadata
            .get(INBOUND_MESSAGE_KEY)
            .cloned()
            .ok_or_else(|| {
                CourierError::InvalidInput(format!("inbound job {} carries no message", job.id))
            })?;
        let message: InboundMessage = serde_json::from_value(raw)?;
        self.handler.handle(&message).await?;
        Ok(serde_json::Value::Null)
    }
}

/// Sends outbound jobs through the account's live connection.
pub(crate) struct OutboundJobHandler {
    pub(crate) manager: ConnectionManager,
}

#[async_trait]
impl JobHandler for OutboundJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CourierError> {
        let data = &job.data;
        debug!(
            job_id = job.id,
            attempt = job.attempt,
            account_id = %data.account_id,
            to = %data.chat_id,
            "delivering outbound job"
        );
        let sent = self
            .manager
            .send(&data.account_id, &data.chat_id, &data.payload)
            .await?;
        Ok(serde_json::to_value(sent)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use courier_core::types::{AccountId, MessagePayload};

    use super::*;

    fn message() -> InboundMessage {
        InboundMessage {
            id: "IN1".into(),
            account_id: AccountId::new("acct-1").unwrap(),
            chat_id: "123@g.us".into(),
            sender: Some("5@s.whatsapp.net".into()),
            push_name: Some("Ana".into()),
            payload: MessagePayload::Text { text: "hi".into() },
            button_id: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn inbound_job_round_trips_the_message() {
        struct Capture(std::sync::Mutex<Vec<InboundMessage>>);

        #[async_trait]
        impl InboundHandler for Capture {
            async fn handle(&self, message: &InboundMessage) -> Result<(), CourierError> {
                self.0.lock().unwrap().push(message.clone());
                Ok(())
            }
        }

        let capture = Arc::new(Capture(std::sync::Mutex::new(Vec::new())));
        let handler = InboundJobHandler {
            handler: capture.clone(),
        };
        let data = inbound_job(&message()).unwrap();
        assert_eq!(data.direction, Direction::Inbound);
        let job = QueueJob {
            id: 1,
            direction: Direction::Inbound,
            data,
            attempt: 1,
            max_attempts: 3,
        };
        handler.handle(&job).await.unwrap();
        assert_eq!(capture.0.lock().unwrap()[0], message());
    }

    #[tokio::test]
    async fn inbound_job_without_message_is_not_retried() {
        let handler = InboundJobHandler {
            handler: Arc::new(LoggingInboundHandler),
        };
        let mut data = inbound_job(&message()).unwrap();
        data.metadata.clear();
        let job = QueueJob {
            id: 7,
            direction: Direction::Inbound,
            data,
            attempt: 1,
            max_attempts: 3,
        };
        let err = handler.handle(&job).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
