// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory `SessionStore` for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use courier_core::types::{AccountId, Credentials, MessageHistory};
use courier_core::{CourierError, SessionStore};

/// Keeps credentials and history snapshots in hash maps.
#[derive(Default)]
pub struct MemorySessionStore {
    credentials: Mutex<HashMap<AccountId, Credentials>>,
    history: Mutex<HashMap<AccountId, MessageHistory>>,
    unavailable: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds credentials as if the account had paired earlier.
    pub fn with_account(self, account: &AccountId) -> Self {
        self.credentials.lock().unwrap_or_else(PoisonError::into_inner).insert(
            account.clone(),
            Credentials(serde_json::json!({ "me": account.as_str() })),
        );
        self
    }

    pub fn credentials(&self, account: &AccountId) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .cloned()
    }

    pub fn history(&self, account: &AccountId) -> Option<MessageHistory> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .cloned()
    }

    /// Makes every call fail with a storage error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CourierError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CourierError::storage(std::io::Error::other(
                "session store unavailable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, account: &AccountId) -> Result<Option<Credentials>, CourierError> {
        self.check()?;
        Ok(self.credentials(account))
    }

    async fn save(&self, account: &AccountId, credentials: &Credentials) -> Result<(), CourierError> {
        self.check()?;
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.clone(), credentials.clone());
        Ok(())
    }

    async fn clear(&self, account: &AccountId) -> Result<(), CourierError> {
        self.check()?;
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account);
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<AccountId>, CourierError> {
        self.check()?;
        let mut accounts: Vec<AccountId> = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        accounts.sort();
        Ok(accounts)
    }

    async fn save_history(&self, history: &MessageHistory) -> Result<(), CourierError> {
        self.check()?;
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(history.account_id.clone(), history.clone());
        Ok(())
    }

    async fn load_history(
        &self,
        account: &AccountId,
    ) -> Result<Option<MessageHistory>, CourierError> {
        self.check()?;
        Ok(self.history(account))
    }
}
