// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File-backed session store.
//!
//! Layout: `<root>/<accountId>/creds.json` and `<root>/<accountId>/history.json`.
//! Every write goes to a temporary sibling first and is renamed into place, so
//! a crash never leaves a truncated bundle behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use courier_core::types::{AccountId, Credentials, MessageHistory};
use courier_core::{CourierError, SessionStore};

const CREDS_FILE: &str = "creds.json";
const HISTORY_FILE: &str = "history.json";

/// Stores each account's files in its own directory under `root`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn account_dir(&self, account: &AccountId) -> PathBuf {
        // AccountId only admits [A-Za-z0-9_.-], never "." or "..", so the
        // join cannot escape the root.
        self.root.join(account.as_str())
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CourierError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CourierError::storage)?;
        }
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(CourierError::storage)?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CourierError::storage(e));
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, CourierError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CourierError::storage(e)),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, account: &AccountId) -> Result<Option<Credentials>, CourierError> {
        self.read_json(&self.account_dir(account).join(CREDS_FILE))
            .await
    }

    async fn save(
        &self,
        account: &AccountId,
        credentials: &Credentials,
    ) -> Result<(), CourierError> {
        self.write_json(&self.account_dir(account).join(CREDS_FILE), credentials)
            .await?;
        debug!(account_id = %account, "credentials saved");
        Ok(())
    }

    async fn clear(&self, account: &AccountId) -> Result<(), CourierError> {
        match tokio::fs::remove_dir_all(self.account_dir(account)).await {
            Ok(()) => {
                debug!(account_id = %account, "session files removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CourierError::storage(e)),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<AccountId>, CourierError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CourierError::storage(e)),
        };

        let mut accounts = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(CourierError::storage)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(account) = AccountId::new(name) else {
                warn!(dir = %name, "skipping session directory with invalid account id");
                continue;
            };
            if tokio::fs::try_exists(entry.path().join(CREDS_FILE))
                .await
                .unwrap_or(false)
            {
                accounts.push(account);
            }
        }
        accounts.sort();
        Ok(accounts)
    }

    async fn save_history(&self, history: &MessageHistory) -> Result<(), CourierError> {
        self.write_json(
            &self.account_dir(&history.account_id).join(HISTORY_FILE),
            history,
        )
        .await
    }

    async fn load_history(
        &self,
        account: &AccountId,
    ) -> Result<Option<MessageHistory>, CourierError> {
        self.read_json(&self.account_dir(account).join(HISTORY_FILE))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::types::{HistoryRecord, MessagePayload};

    fn acct(id: &str) -> AccountId {
        AccountId::new(id).unwrap()
    }

    #[tokio::test]
    async fn credentials_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let account = acct("acct-1");

        assert!(store.load(&account).await.unwrap().is_none());
        let creds = Credentials(serde_json::json!({"noiseKey": "abc", "me": {"id": "1"}}));
        store.save(&account, &creds).await.unwrap();
        assert_eq!(store.load(&account).await.unwrap(), Some(creds));

        store.clear(&account).await.unwrap();
        assert!(store.load(&account).await.unwrap().is_none());
        store.clear(&account).await.unwrap();
    }

    #[tokio::test]
    async fn list_only_reports_paired_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let creds = Credentials(serde_json::json!({}));
        store.save(&acct("b-acct"), &creds).await.unwrap();
        store.save(&acct("a-acct"), &creds).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("no-creds"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("bad name"))
            .await
            .unwrap();

        let listed = store.list_accounts().await.unwrap();
        assert_eq!(listed, vec![acct("a-acct"), acct("b-acct")]);
    }

    #[tokio::test]
    async fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("absent"));
        assert!(store.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_snapshot_survives_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let history = MessageHistory {
            account_id: acct("acct-1"),
            saved_at: Utc::now(),
            records: vec![HistoryRecord {
                message_id: "m1".into(),
                chat_id: "1@s.whatsapp.net".into(),
                from_me: true,
                payload: MessagePayload::Text { text: "hi".into() },
                timestamp: Utc::now(),
            }],
        };
        store.save_history(&history).await.unwrap();
        store.save_history(&history).await.unwrap();

        let loaded = store.load_history(&acct("acct-1")).await.unwrap().unwrap();
        assert_eq!(loaded.records, history.records);

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path().join("acct-1")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["history.json".to_string()]);
    }
}
