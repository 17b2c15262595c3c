// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-account caches owned by the connection manager.
//!
//! Both caches are bounded and drop their oldest entries first. The group
//! cache additionally expires entries after a TTL so a read falls back to a
//! fresh fetch instead of serving metadata forever.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use courier_core::BoundedMap;
use courier_core::types::{AccountId, GroupMetadata, HistoryRecord};

struct CachedGroup {
    metadata: GroupMetadata,
    stored_at: Instant,
}

/// Group metadata keyed by account and group id.
pub struct GroupMetadataCache {
    ttl: Duration,
    entries: Mutex<BoundedMap<(AccountId, String), CachedGroup>>,
}

impl GroupMetadataCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(BoundedMap::new(capacity)),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BoundedMap<(AccountId, String), CachedGroup>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh entry for the group, if any. Expired entries are dropped.
    pub fn get(&self, account: &AccountId, group_id: &str) -> Option<GroupMetadata> {
        let key = (account.clone(), group_id.to_string());
        let mut entries = self.entries();
        let expired = match entries.get(&key) {
            Some(cached) if cached.stored_at.elapsed() < self.ttl => {
                return Some(cached.metadata.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(&key);
        }
        None
    }

    pub fn put(&self, account: &AccountId, metadata: GroupMetadata) {
        let key = (account.clone(), metadata.id.clone());
        let cached = CachedGroup {
            metadata,
            stored_at: Instant::now(),
        };
        // Refresh the insertion order so a re-fetched group is evicted last.
        let mut entries = self.entries();
        entries.remove(&key);
        entries.insert(key, cached);
    }

    pub fn invalidate(&self, account: &AccountId, group_id: &str) {
        self.entries()
            .remove(&(account.clone(), group_id.to_string()));
    }

    pub fn forget_account(&self, account: &AccountId) {
        self.entries().retain(|(owner, _), _| owner != account);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct AccountMessages {
    records: BoundedMap<String, HistoryRecord>,
    dirty: bool,
}

/// Recent inbound and outbound messages per account.
pub struct MessageCache {
    capacity: usize,
    accounts: DashMap<AccountId, AccountMessages>,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            accounts: DashMap::new(),
        }
    }

    pub fn contains_account(&self, account: &AccountId) -> bool {
        self.accounts.contains_key(account)
    }

    pub fn record(&self, account: &AccountId, record: HistoryRecord) {
        let mut entry = self
            .accounts
            .entry(account.clone())
            .or_insert_with(|| AccountMessages {
                records: BoundedMap::new(self.capacity),
                dirty: false,
            });
        entry.records.insert(record.message_id.clone(), record);
        entry.dirty = true;
    }

    pub fn remove(&self, account: &AccountId, message_ids: &[String]) {
        if let Some(mut entry) = self.accounts.get_mut(account) {
            for id in message_ids {
                if entry.records.remove(id).is_some() {
                    entry.dirty = true;
                }
            }
        }
    }

    /// Seeds an account from a stored snapshot. Newer in-memory records win.
    pub fn restore(&self, account: &AccountId, records: Vec<HistoryRecord>) {
        let mut entry = self
            .accounts
            .entry(account.clone())
            .or_insert_with(|| AccountMessages {
                records: BoundedMap::new(self.capacity),
                dirty: false,
            });
        let newer = entry.records.drain();
        for record in records {
            entry.records.insert(record.message_id.clone(), record);
        }
        for (id, record) in newer {
            entry.records.insert(id, record);
        }
    }

    /// Records of an account, oldest first.
    pub fn snapshot(&self, account: &AccountId) -> Vec<HistoryRecord> {
        self.accounts
            .get(account)
            .map(|entry| entry.records.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Accounts changed since their last snapshot was taken with
    /// [`take_dirty`](Self::take_dirty).
    pub fn dirty_accounts(&self) -> Vec<AccountId> {
        self.accounts
            .iter()
            .filter(|entry| entry.dirty)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of an account and clear its dirty flag.
    pub fn take_dirty(&self, account: &AccountId) -> Option<Vec<HistoryRecord>> {
        let mut entry = self.accounts.get_mut(account)?;
        entry.dirty = false;
        Some(entry.records.iter().map(|(_, r)| r.clone()).collect())
    }

    /// Flags an account for the next autosave, used when a save failed.
    pub fn mark_dirty(&self, account: &AccountId) {
        if let Some(mut entry) = self.accounts.get_mut(account) {
            entry.dirty = true;
        }
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn forget(&self, account: &AccountId) {
        self.accounts.remove(account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::types::MessagePayload;

    fn acct(id: &str) -> AccountId {
        AccountId::new(id).unwrap()
    }

    fn group(id: &str, subject: &str) -> GroupMetadata {
        GroupMetadata {
            id: id.into(),
            subject: subject.into(),
            owner: None,
            participants: vec![],
        }
    }

    fn record(id: &str) -> HistoryRecord {
        HistoryRecord {
            message_id: id.into(),
            chat_id: "1@s.whatsapp.net".into(),
            from_me: false,
            payload: MessagePayload::Text { text: id.into() },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn group_entries_expire() {
        let cache = GroupMetadataCache::new(10, Duration::from_millis(0));
        cache.put(&acct("a"), group("g1@g.us", "x"));
        assert!(cache.get(&acct("a"), "g1@g.us").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn group_cache_is_scoped_per_account() {
        let cache = GroupMetadataCache::new(10, Duration::from_secs(60));
        cache.put(&acct("a"), group("g1@g.us", "from a"));
        cache.put(&acct("b"), group("g1@g.us", "from b"));
        assert_eq!(cache.get(&acct("a"), "g1@g.us").unwrap().subject, "from a");

        cache.forget_account(&acct("a"));
        assert!(cache.get(&acct("a"), "g1@g.us").is_none());
        assert_eq!(cache.get(&acct("b"), "g1@g.us").unwrap().subject, "from b");

        cache.invalidate(&acct("b"), "g1@g.us");
        assert!(cache.is_empty());
    }

    #[test]
    fn group_cache_evicts_oldest() {
        let cache = GroupMetadataCache::new(2, Duration::from_secs(60));
        cache.put(&acct("a"), group("g1@g.us", "1"));
        cache.put(&acct("a"), group("g2@g.us", "2"));
        cache.put(&acct("a"), group("g1@g.us", "1 again"));
        cache.put(&acct("a"), group("g3@g.us", "3"));
        assert!(cache.get(&acct("a"), "g2@g.us").is_none());
        assert!(cache.get(&acct("a"), "g1@g.us").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn message_cache_is_bounded_per_account() {
        let cache = MessageCache::new(2);
        for id in ["m1", "m2", "m3"] {
            cache.record(&acct("a"), record(id));
        }
        cache.record(&acct("b"), record("m1"));
        let ids: Vec<_> = cache
            .snapshot(&acct("a"))
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(ids, vec!["m2", "m3"]);
        assert_eq!(cache.snapshot(&acct("b")).len(), 1);
    }

    #[test]
    fn dirty_tracking_follows_changes() {
        let cache = MessageCache::new(10);
        cache.restore(&acct("a"), vec![record("old")]);
        assert!(cache.dirty_accounts().is_empty());

        cache.record(&acct("a"), record("new"));
        assert_eq!(cache.dirty_accounts(), vec![acct("a")]);
        assert_eq!(cache.take_dirty(&acct("a")).unwrap().len(), 2);
        assert!(cache.dirty_accounts().is_empty());

        cache.remove(&acct("a"), &["old".to_string()]);
        assert_eq!(cache.dirty_accounts(), vec![acct("a")]);
        cache.forget(&acct("a"));
        assert!(cache.snapshot(&acct("a")).is_empty());
    }
}
