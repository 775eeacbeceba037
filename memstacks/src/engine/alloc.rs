//! Allocation tracking state machine
//!
//! Correlates allocation-entry (carries the requested size), allocation-exit
//! (carries the returned address) and free-entry events into the accounting
//! table:
//!
//! ```text
//! alloc-enter(size) ──► pending[tid] = size
//! alloc-exit(addr)  ──► consume pending[tid], capture stack,
//!                       records[(tid,addr)] = {size, stack},
//!                       table += size
//! free-enter(addr)  ──► consume records[(tid,addr)], table -= size
//!                       (entry removed when it collapses to ≤ 0)
//! ```
//!
//! In *all* mode there is no free-side decrement: alloc-enter alone captures
//! a stack and credits the table with the requested size (gross bytes, not
//! net outstanding), and exit/free events are ignored.
//!
//! Known limitations, carried over deliberately:
//! - one pending slot per thread id — a reentrant allocation on the same
//!   thread overwrites the earlier pending size (last-writer-wins);
//! - records are keyed by {tid, address} only, so a free racing a
//!   reallocation at the same address can debit the older record.

use dashmap::DashMap;
use std::sync::Arc;

use crate::dispatch::EventMeta;
use crate::domain::{StackId, Tid};
use crate::engine::accounting::{AccountKey, AccountingTable};

/// Which bytes the trace accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Net outstanding bytes: allocations minus frees.
    Unfreed,
    /// Gross bytes requested; entries are never removed during the trace.
    All,
}

/// One matched allocation, awaiting its free.
#[derive(Debug, Clone, Copy)]
struct AllocRecord {
    size: u64,
    stack: StackId,
}

/// Trace-scoped allocation engine. Shared by every probe handler; all
/// internal tables are concurrent.
pub struct AllocEngine {
    mode: TraceMode,
    table: Arc<AccountingTable>,
    /// Per-thread scratchpad between an allocation's entry and its return.
    pending: DashMap<Tid, u64>,
    /// Outstanding allocations keyed by {thread id, returned address}.
    records: DashMap<(Tid, u64), AllocRecord>,
}

impl AllocEngine {
    #[must_use]
    pub fn new(mode: TraceMode, table: Arc<AccountingTable>) -> Self {
        Self { mode, table, pending: DashMap::new(), records: DashMap::new() }
    }

    #[must_use]
    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Allocation function entry.
    ///
    /// Unfreed mode: record the requested size under the calling thread,
    /// overwriting any stale pending entry (no error raised). All mode:
    /// capture a stack now and credit the table directly.
    pub fn on_alloc_enter(&self, meta: &EventMeta, size: u64, capture: impl FnOnce() -> StackId) {
        match self.mode {
            TraceMode::Unfreed => {
                self.pending.insert(meta.tid, size);
            }
            TraceMode::All => {
                let stack = capture();
                self.table.upsert_add(self.key(meta, stack), to_delta(size));
            }
        }
    }

    /// Allocation function return.
    ///
    /// Consumes the pending size for the calling thread; if none exists the
    /// entry was missed and the event is dropped (unobserved, not an error).
    pub fn on_alloc_exit(&self, meta: &EventMeta, ret_addr: u64, capture: impl FnOnce() -> StackId) {
        if self.mode == TraceMode::All {
            return;
        }

        let Some((_, size)) = self.pending.remove(&meta.tid) else {
            return; // missed malloc entry
        };

        let stack = capture();
        self.records.insert((meta.tid, ret_addr), AllocRecord { size, stack });
        self.table.upsert_add(self.key(meta, stack), to_delta(size));
    }

    /// Free function entry.
    ///
    /// Unknown addresses (freed twice, or allocated before tracing began)
    /// are silently ignored. Otherwise the record is consumed and the bytes
    /// are debited from the stack that allocated them; the accounting entry
    /// disappears once it collapses to ≤ 0.
    pub fn on_free(&self, meta: &EventMeta, addr: u64) {
        if self.mode == TraceMode::All {
            return;
        }

        let Some((_, record)) = self.records.remove(&(meta.tid, addr)) else {
            return;
        };

        self.table.upsert_add(self.key(meta, record.stack), -to_delta(record.size));
    }

    /// Outstanding (unfreed) allocation records currently tracked.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.records.len()
    }

    fn key(&self, meta: &EventMeta, stack: StackId) -> AccountKey {
        AccountKey { pid: meta.pid, stack, comm: meta.comm.clone() }
    }
}

/// Requested sizes are kernel `size_t`; clamp into the signed counter domain.
fn to_delta(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;

    fn meta(tid: u32) -> EventMeta {
        EventMeta { pid: Pid(10), tid: Tid(tid), comm: "app".to_string() }
    }

    fn engine(mode: TraceMode) -> (AllocEngine, Arc<AccountingTable>) {
        let table = Arc::new(AccountingTable::new());
        (AllocEngine::new(mode, Arc::clone(&table)), table)
    }

    #[test]
    fn test_enter_then_exit_credits_exit_stack() {
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_enter(&meta(100), 64, || unreachable!("no capture on enter"));
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId(3));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.stack, StackId(3));
        assert_eq!(snapshot[0].1, 64);
        assert_eq!(engine.outstanding(), 1);
    }

    #[test]
    fn test_exit_without_pending_is_dropped() {
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId(0));
        assert!(table.is_empty());
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_pending_overwrite_is_last_writer_wins() {
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_enter(&meta(100), 64, || unreachable!());
        engine.on_alloc_enter(&meta(100), 128, || unreachable!());
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId(0));

        assert_eq!(table.snapshot()[0].1, 128);
        // The first entry was consumed by the overwrite; a second exit has
        // nothing pending and is dropped.
        engine.on_alloc_exit(&meta(100), 0x2000, || StackId(0));
        assert_eq!(engine.outstanding(), 1);
    }

    #[test]
    fn test_matched_alloc_free_collapses_entry() {
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_enter(&meta(100), 64, || unreachable!());
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId(0));
        engine.on_free(&meta(100), 0x1000);

        assert!(table.is_empty());
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_free_of_unknown_address_is_noop() {
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_enter(&meta(100), 64, || unreachable!());
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId(0));

        engine.on_free(&meta(100), 0xdead);
        assert_eq!(table.snapshot()[0].1, 64);

        // Double free: first one consumes the record, second is a no-op
        engine.on_free(&meta(100), 0x1000);
        engine.on_free(&meta(100), 0x1000);
        assert!(table.is_empty());
    }

    #[test]
    fn test_same_stack_on_two_threads_aggregates_to_one_entry() {
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_enter(&meta(100), 10, || unreachable!());
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId(7));
        engine.on_alloc_enter(&meta(101), 10, || unreachable!());
        engine.on_alloc_exit(&meta(101), 0x2000, || StackId(7));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1, 20);
        assert_eq!(engine.outstanding(), 2);
    }

    #[test]
    fn test_all_mode_credits_on_enter_and_ignores_frees() {
        let (engine, table) = engine(TraceMode::All);
        engine.on_alloc_enter(&meta(100), 64, || StackId(1));
        engine.on_alloc_enter(&meta(100), 64, || StackId(1));
        engine.on_alloc_exit(&meta(100), 0x1000, || unreachable!("exit skipped in all mode"));
        engine.on_free(&meta(100), 0x1000);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1, 128);
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_sentinel_stack_still_accumulates_bytes() {
        // Capture failures must not lose accounting; the report phase hides
        // and tallies them instead.
        let (engine, table) = engine(TraceMode::Unfreed);
        engine.on_alloc_enter(&meta(100), 32, || unreachable!());
        engine.on_alloc_exit(&meta(100), 0x1000, || StackId::NO_SPACE);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.stack, StackId::NO_SPACE);
        assert_eq!(snapshot[0].1, 32);
    }
}
