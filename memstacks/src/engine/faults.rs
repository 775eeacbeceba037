//! Page-fault accounting
//!
//! The fault variant does not count bytes: each write-mode, not-present user
//! fault records *presence* under {thread id, stack id, fault address}, so a
//! page repeatedly faulted under the same stack is counted once. Multiplicity
//! is recovered at aggregation time by counting distinct addresses sharing
//! {thread id, stack id}.
//!
//! The region filter is applied at aggregation, after the trace window:
//! addresses that fall outside every mapped region of the target process are
//! stale (unmapped between fault and report) and are discarded.

use dashmap::DashMap;
use std::collections::HashMap;

use crate::dispatch::EventMeta;
use crate::domain::{StackId, Tid};
use crate::procmaps::RegionFilter;

/// Key of one recorded fault. Deduplicated by the full triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultKey {
    pub tid: Tid,
    pub stack: StackId,
    pub addr: u64,
}

/// One aggregated row: every distinct faulted address under this thread and
/// stack contributes one count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultGroup {
    pub tid: Tid,
    pub stack: StackId,
}

/// Trace-scoped fault presence set, concurrent like the byte table.
#[derive(Debug, Default)]
pub struct FaultEngine {
    faults: DashMap<FaultKey, ()>,
}

impl FaultEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fault. Capture runs even for repeated addresses; the
    /// presence set collapses duplicates.
    pub fn on_fault(&self, meta: &EventMeta, addr: u64, capture: impl FnOnce() -> StackId) {
        let stack = capture();
        self.faults.insert(FaultKey { tid: meta.tid, stack, addr }, ());
    }

    /// Number of distinct {tid, stack, addr} triples recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.faults.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    /// Group recorded faults by {tid, stack}, counting distinct addresses,
    /// discarding addresses outside every known mapped region.
    #[must_use]
    pub fn aggregate(&self, regions: &RegionFilter) -> Vec<(FaultGroup, u64)> {
        let mut groups: HashMap<FaultGroup, u64> = HashMap::new();
        for entry in &self.faults {
            let key = entry.key();
            if !regions.contains(key.addr) {
                continue;
            }
            *groups.entry(FaultGroup { tid: key.tid, stack: key.stack }).or_insert(0) += 1;
        }
        groups.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;
    use crate::procmaps::MemoryRegion;

    fn meta(tid: u32) -> EventMeta {
        EventMeta { pid: Pid(10), tid: Tid(tid), comm: "app".to_string() }
    }

    fn all_regions() -> RegionFilter {
        RegionFilter::from_regions(vec![MemoryRegion { start: 0, end: u64::MAX }])
    }

    #[test]
    fn test_repeated_fault_on_one_address_counts_once() {
        let engine = FaultEngine::new();
        engine.on_fault(&meta(100), 0x7000, || StackId(1));
        engine.on_fault(&meta(100), 0x7000, || StackId(1));
        engine.on_fault(&meta(100), 0x8000, || StackId(1));

        let groups = engine.aggregate(&all_regions());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1, 2);
    }

    #[test]
    fn test_groups_split_per_stack_and_thread() {
        let engine = FaultEngine::new();
        engine.on_fault(&meta(100), 0x7000, || StackId(1));
        engine.on_fault(&meta(100), 0x8000, || StackId(2));
        engine.on_fault(&meta(101), 0x9000, || StackId(1));

        let mut groups = engine.aggregate(&all_regions());
        groups.sort_by_key(|(g, _)| (g.tid.0, g.stack));
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|&(_, count)| count == 1));
    }

    #[test]
    fn test_unmapped_addresses_are_discarded() {
        let engine = FaultEngine::new();
        engine.on_fault(&meta(100), 0x7000, || StackId(1));
        engine.on_fault(&meta(100), 0xdead_0000, || StackId(1));

        let filter =
            RegionFilter::from_regions(vec![MemoryRegion { start: 0x6000, end: 0x7fff }]);
        let groups = engine.aggregate(&filter);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1, 1);
    }

    #[test]
    fn test_sentinel_stacks_still_group() {
        let engine = FaultEngine::new();
        engine.on_fault(&meta(100), 0x7000, || StackId::NO_SPACE);
        engine.on_fault(&meta(100), 0x8000, || StackId::NO_SPACE);

        let groups = engine.aggregate(&all_regions());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0.stack, StackId::NO_SPACE);
        assert_eq!(groups[0].1, 2);
    }
}
