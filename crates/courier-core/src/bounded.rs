// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capacity-bounded map with insertion-order eviction.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A map that never holds more than `capacity` entries.
///
/// [`insert`](Self::insert) evicts the oldest entry when full, which suits
/// caches. [`try_insert`](Self::try_insert) refuses instead, which suits pools
/// whose entries must never be dropped silently.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Inserts or replaces, evicting the oldest entry if a new key would
    /// overflow. Returns the replaced value and the evicted entry.
    pub fn insert(&mut self, key: K, value: V) -> (Option<V>, Option<(K, V)>) {
        if let Some(slot) = self.entries.get_mut(&key) {
            return (Some(std::mem::replace(slot, value)), None);
        }
        let mut evicted = None;
        if self.is_full() {
            if let Some(oldest) = self.order.pop_front() {
                evicted = self.entries.remove(&oldest).map(|v| (oldest, v));
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        (None, evicted)
    }

    /// Inserts or replaces without evicting. A new key on a full map is
    /// handed back in `Err`.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, (K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            return Ok(Some(std::mem::replace(slot, value)));
        }
        if self.is_full() {
            return Err((key, value));
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        Ok(None)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(value)
    }

    /// Removes every entry the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let entries = &mut self.entries;
        self.order.retain(|k| match entries.get(k) {
            Some(v) if keep(k, v) => true,
            _ => {
                entries.remove(k);
                false
            }
        });
    }

    /// Removes and returns every entry, oldest first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(k) = self.order.pop_front() {
            if let Some(v) = self.entries.remove(&k) {
                out.push((k, v));
            }
        }
        out
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k, v)))
    }
}
