//! Bounded stack trace storage
//!
//! The store owns every captured call stack for the duration of a trace and
//! hands out opaque [`StackId`]s. Accounting tables reference traces only by
//! id; frames are shared out as `Arc<[u64]>` and never copied.
//!
//! Capacity is fixed when the store is built (before tracing starts) and
//! overflow is a documented lossy behavior: once the table is full, further
//! captures of unseen stacks return [`StackId::NO_SPACE`] and the affected
//! entries are tallied into the end-of-run warning instead of being printed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::StackId;
use memstacks_common::MAX_STACK_DEPTH;

/// Deduplicating, fixed-capacity table of captured user stacks.
///
/// Identical traces intern to one stored entry reused by every key that
/// references it. Ids are stable for the lifetime of the store.
pub struct StackTraceStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_frames: HashMap<Arc<[u64]>, StackId>,
    by_id: Vec<Arc<[u64]>>,
}

impl StackTraceStore {
    /// Build a store holding at most `capacity` unique traces.
    ///
    /// The capacity cannot grow once tracing begins; it is surfaced on the
    /// CLI as `--stack-storage-size`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(Inner::default()) }
    }

    /// Intern a captured trace (innermost frame first) and return its id.
    ///
    /// Frames beyond [`MAX_STACK_DEPTH`] are truncated. An empty trace means
    /// the unwinder produced nothing usable and yields
    /// [`StackId::BAD_ADDRESS`]; a full table yields [`StackId::NO_SPACE`].
    pub fn intern(&self, frames: &[u64]) -> StackId {
        if frames.is_empty() {
            return StackId::BAD_ADDRESS;
        }

        let frames = &frames[..frames.len().min(MAX_STACK_DEPTH)];

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned store only means another handler panicked mid-intern;
            // the table itself is still consistent enough to read.
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(&id) = inner.by_frames.get(frames) {
            return id;
        }

        if inner.by_id.len() >= self.capacity {
            return StackId::NO_SPACE;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let id = StackId(inner.by_id.len() as i32);
        let stored: Arc<[u64]> = Arc::from(frames);
        inner.by_frames.insert(Arc::clone(&stored), id);
        inner.by_id.push(stored);
        id
    }

    /// Frames for a previously interned trace, innermost first.
    ///
    /// Returns `None` for sentinels and unknown ids.
    #[must_use]
    pub fn frames(&self, id: StackId) -> Option<Arc<[u64]>> {
        if !id.is_valid() {
            return None;
        }
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.by_id.get(id.index()).cloned()
    }

    /// Number of unique traces currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.by_id.len(),
            Err(poisoned) => poisoned.into_inner().by_id.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_traces_share_one_id() {
        let store = StackTraceStore::with_capacity(16);
        let a = store.intern(&[0x1000, 0x2000, 0x3000]);
        let b = store.intern(&[0x1000, 0x2000, 0x3000]);
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_distinct_traces_get_distinct_ids() {
        let store = StackTraceStore::with_capacity(16);
        let a = store.intern(&[0x1000]);
        let b = store.intern(&[0x2000]);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_frames_round_trip_innermost_first() {
        let store = StackTraceStore::with_capacity(16);
        let id = store.intern(&[0x30, 0x20, 0x10]);
        let frames = store.frames(id).unwrap();
        assert_eq!(&*frames, &[0x30, 0x20, 0x10]);
    }

    #[test]
    fn test_overflow_returns_no_space_sentinel() {
        let store = StackTraceStore::with_capacity(2);
        assert!(store.intern(&[1]).is_valid());
        assert!(store.intern(&[2]).is_valid());
        assert_eq!(store.intern(&[3]), StackId::NO_SPACE);
        // Already-interned traces stay reachable after overflow
        assert!(store.intern(&[1]).is_valid());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_empty_trace_is_bad_address() {
        let store = StackTraceStore::with_capacity(2);
        assert_eq!(store.intern(&[]), StackId::BAD_ADDRESS);
        assert!(store.is_empty());
    }

    #[test]
    fn test_deep_traces_truncate_to_max_depth() {
        let store = StackTraceStore::with_capacity(2);
        let deep: Vec<u64> = (0..500).collect();
        let id = store.intern(&deep);
        let frames = store.frames(id).unwrap();
        assert_eq!(frames.len(), MAX_STACK_DEPTH);
    }

    #[test]
    fn test_sentinel_lookup_yields_none() {
        let store = StackTraceStore::with_capacity(2);
        assert!(store.frames(StackId::NO_SPACE).is_none());
        assert!(store.frames(StackId(7)).is_none());
    }
}
