// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence of per-account credentials and message history.

use async_trait::async_trait;

use crate::error::CourierError;
use crate::types::{AccountId, Credentials, MessageHistory};

/// Durable home of the opaque credential bundle and the message-history
/// snapshot for each account.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Loads stored credentials, `None` when the account never paired.
    async fn load(&self, account: &AccountId) -> Result<Option<Credentials>, CourierError>;

    /// Replaces the stored credentials.
    async fn save(&self, account: &AccountId, credentials: &Credentials)
    -> Result<(), CourierError>;

    /// Deletes credentials and history. Clearing an unknown account is a no-op.
    async fn clear(&self, account: &AccountId) -> Result<(), CourierError>;

    /// Accounts that currently have stored credentials.
    async fn list_accounts(&self) -> Result<Vec<AccountId>, CourierError>;

    async fn save_history(&self, history: &MessageHistory) -> Result<(), CourierError>;

    async fn load_history(&self, account: &AccountId)
    -> Result<Option<MessageHistory>, CourierError>;
}
