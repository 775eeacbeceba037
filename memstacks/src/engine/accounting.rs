//! Resource Accounting Table
//!
//! The live aggregate of the trace: a concurrent map from
//! {process id, stack id, thread-name snapshot} to a signed byte counter.
//! Handlers on many threads upsert concurrently, so the
//! insert-if-absent-then-mutate step must be atomic — the sharded entry API
//! gives us get-or-create-then-fetch-add under one shard lock.
//!
//! Invariant: an entry whose counter lands at or below zero is removed within
//! the same entry lock, so the table only ever holds entries believed to
//! represent net-outstanding, nonzero allocations.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::{Pid, StackId};

/// Composite accounting key. Equality is structural; `comm` is a snapshot
/// taken when the entry-creating event fired, not a live thread name.
///
/// The key carries no thread id: threads of one process allocating from the
/// identical call stack aggregate into a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountKey {
    pub pid: Pid,
    pub stack: StackId,
    pub comm: String,
}

/// Concurrent map of outstanding bytes per accounting key.
#[derive(Debug, Default)]
pub struct AccountingTable {
    bytes: DashMap<AccountKey, i64>,
}

impl AccountingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add `delta` to the entry for `key`, creating it at zero
    /// first if absent. Returns the resulting value.
    ///
    /// Collapse-to-zero: when the result is ≤ 0 the entry is removed before
    /// the shard lock is released, and the (now conceptual) value is still
    /// returned to the caller.
    pub fn upsert_add(&self, key: AccountKey, delta: i64) -> i64 {
        match self.bytes.entry(key) {
            Entry::Occupied(mut entry) => {
                let value = entry.get().saturating_add(delta);
                if value <= 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = value;
                }
                value
            }
            Entry::Vacant(entry) => {
                if delta > 0 {
                    entry.insert(delta);
                }
                delta
            }
        }
    }

    /// Remove the entry for `key` if present.
    pub fn remove_if_present(&self, key: &AccountKey) {
        self.bytes.remove(key);
    }

    /// Non-destructive full snapshot for reporting. No ordering guarantee;
    /// ordering is imposed at report time.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(AccountKey, i64)> {
        self.bytes.iter().map(|entry| (entry.key().clone(), *entry.value())).collect()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(stack: i32) -> AccountKey {
        AccountKey { pid: Pid(10), stack: StackId(stack), comm: "app".to_string() }
    }

    #[test]
    fn test_upsert_creates_then_accumulates() {
        let table = AccountingTable::new();
        assert_eq!(table.upsert_add(key(0), 64), 64);
        assert_eq!(table.upsert_add(key(0), 32), 96);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_share_counters() {
        let table = AccountingTable::new();
        table.upsert_add(key(0), 10);
        table.upsert_add(key(1), 20);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_collapse_to_zero_removes_entry() {
        let table = AccountingTable::new();
        table.upsert_add(key(0), 64);
        assert_eq!(table.upsert_add(key(0), -64), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_negative_result_also_removes() {
        let table = AccountingTable::new();
        table.upsert_add(key(0), 10);
        table.upsert_add(key(0), -16);
        assert!(table.is_empty());
    }

    #[test]
    fn test_negative_delta_on_absent_key_inserts_nothing() {
        let table = AccountingTable::new();
        table.upsert_add(key(0), -64);
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_if_present() {
        let table = AccountingTable::new();
        table.upsert_add(key(0), 5);
        table.remove_if_present(&key(0));
        table.remove_if_present(&key(1)); // absent: no-op
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_upserts_on_one_key_lose_nothing() {
        let table = Arc::new(AccountingTable::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    table.upsert_add(key(0), 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1, 8000);
    }
}
