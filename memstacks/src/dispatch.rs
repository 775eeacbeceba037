//! Event Dispatcher boundary
//!
//! The instrumentation subsystem (kernel probes, or a synthetic source in
//! tests) delivers four kinds of events here. The dispatcher applies the
//! thread filter, composes the event's stack-capture mechanism with the
//! bounded [`StackTraceStore`], and routes the event into the accounting
//! engines. Events failing the filter are dropped with no side effects.

use std::sync::Arc;

use crate::domain::{Pid, StackId, Tid};
use crate::engine::alloc::AllocEngine;
use crate::engine::faults::FaultEngine;
use crate::stacks::StackTraceStore;

/// Predicate restricting event processing to one process, one thread, or
/// everything. Built once from the CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFilter {
    All,
    Process(Pid),
    Thread(Tid),
}

impl ThreadFilter {
    #[must_use]
    pub fn matches(&self, pid: Pid, tid: Tid) -> bool {
        match *self {
            ThreadFilter::All => true,
            ThreadFilter::Process(want) => pid == want,
            ThreadFilter::Thread(want) => tid == want,
        }
    }

    /// Human-readable description for the startup banner
    /// ("PID 185", "TID 188", "all threads").
    #[must_use]
    pub fn context_label(&self) -> String {
        match *self {
            ThreadFilter::All => "all threads".to_string(),
            ThreadFilter::Process(pid) => format!("PID {}", pid.0),
            ThreadFilter::Thread(tid) => format!("TID {}", tid.0),
        }
    }
}

/// Identity carried by every event: which thread produced it and the thread
/// name at that moment (a snapshot, not a live value).
#[derive(Debug, Clone)]
pub struct EventMeta {
    pub pid: Pid,
    pub tid: Tid,
    pub comm: String,
}

/// The four event kinds observed at the instrumented functions.
#[derive(Debug, Clone, Copy)]
pub enum ProbeEvent {
    /// Allocation function entry; carries the requested size.
    AllocEnter { size: u64 },
    /// Allocation function return; carries the returned address.
    AllocExit { ret_addr: u64 },
    /// Free function entry; carries the pointer being released.
    FreeEnter { addr: u64 },
    /// Write-mode, not-present user page fault; carries the fault address.
    PageFault { addr: u64 },
}

/// Why an on-demand stack capture failed before reaching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// The backend's own stack storage is exhausted.
    NoSpace,
    /// The stack could not be walked.
    BadAddress,
    /// Backend-specific failure code.
    Other(i64),
}

/// The mechanism to request the current call stack, delivered alongside each
/// event by the instrumentation subsystem. Must be usable from within the
/// handler for all four event kinds.
pub trait StackCapture {
    /// Unwind the user-mode call stack at the probe site, innermost first.
    ///
    /// # Errors
    /// Returns a [`CaptureError`] when the backend could not produce frames.
    fn unwind(&self) -> Result<Vec<u64>, CaptureError>;
}

/// Routes filtered events into the accounting engines.
///
/// Owns no table state itself; the engines and the store are trace-scoped
/// and shared with the reporting phase.
pub struct Dispatcher {
    filter: ThreadFilter,
    store: Arc<StackTraceStore>,
    alloc: Option<Arc<AllocEngine>>,
    faults: Option<Arc<FaultEngine>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(filter: ThreadFilter, store: Arc<StackTraceStore>) -> Self {
        Self { filter, store, alloc: None, faults: None }
    }

    #[must_use]
    pub fn with_alloc_engine(mut self, engine: Arc<AllocEngine>) -> Self {
        self.alloc = Some(engine);
        self
    }

    #[must_use]
    pub fn with_fault_engine(mut self, engine: Arc<FaultEngine>) -> Self {
        self.faults = Some(engine);
        self
    }

    /// Deliver one event. Returns `true` if the event passed the filter and
    /// was handed to an engine.
    pub fn dispatch(&self, meta: &EventMeta, event: ProbeEvent, capture: &dyn StackCapture) -> bool {
        if !self.filter.matches(meta.pid, meta.tid) {
            return false;
        }

        let stack = || self.capture_stack(capture);

        match event {
            ProbeEvent::AllocEnter { size } => {
                if let Some(alloc) = &self.alloc {
                    alloc.on_alloc_enter(meta, size, stack);
                }
            }
            ProbeEvent::AllocExit { ret_addr } => {
                if let Some(alloc) = &self.alloc {
                    alloc.on_alloc_exit(meta, ret_addr, stack);
                }
            }
            ProbeEvent::FreeEnter { addr } => {
                if let Some(alloc) = &self.alloc {
                    alloc.on_free(meta, addr);
                }
            }
            ProbeEvent::PageFault { addr } => {
                if let Some(faults) = &self.faults {
                    faults.on_fault(meta, addr, stack);
                }
            }
        }
        true
    }

    /// Capture-to-id composition: unwind via the event's mechanism, intern
    /// into the bounded store, collapse failures into sentinel ids.
    fn capture_stack(&self, capture: &dyn StackCapture) -> StackId {
        match capture.unwind() {
            Ok(frames) => self.store.intern(&frames),
            Err(CaptureError::NoSpace) => StackId::NO_SPACE,
            Err(CaptureError::BadAddress) => StackId::BAD_ADDRESS,
            #[allow(clippy::cast_possible_truncation)]
            Err(CaptureError::Other(code)) => StackId(code.clamp(i64::from(i32::MIN), -1) as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStack(Vec<u64>);

    impl StackCapture for FixedStack {
        fn unwind(&self) -> Result<Vec<u64>, CaptureError> {
            Ok(self.0.clone())
        }
    }

    fn meta(pid: u32, tid: u32) -> EventMeta {
        EventMeta { pid: Pid(pid), tid: Tid(tid), comm: "worker".to_string() }
    }

    #[test]
    fn test_filter_all_matches_everything() {
        let f = ThreadFilter::All;
        assert!(f.matches(Pid(1), Tid(2)));
        assert!(f.matches(Pid(999), Tid(1000)));
    }

    #[test]
    fn test_filter_by_process_and_thread() {
        let by_pid = ThreadFilter::Process(Pid(185));
        assert!(by_pid.matches(Pid(185), Tid(200)));
        assert!(!by_pid.matches(Pid(186), Tid(200)));

        let by_tid = ThreadFilter::Thread(Tid(188));
        assert!(by_tid.matches(Pid(185), Tid(188)));
        assert!(!by_tid.matches(Pid(185), Tid(189)));
    }

    #[test]
    fn test_context_labels() {
        assert_eq!(ThreadFilter::All.context_label(), "all threads");
        assert_eq!(ThreadFilter::Process(Pid(185)).context_label(), "PID 185");
        assert_eq!(ThreadFilter::Thread(Tid(188)).context_label(), "TID 188");
    }

    #[test]
    fn test_filtered_event_has_no_side_effects() {
        use crate::engine::alloc::{AllocEngine, TraceMode};
        use crate::engine::accounting::AccountingTable;

        let store = Arc::new(StackTraceStore::with_capacity(8));
        let table = Arc::new(AccountingTable::new());
        let engine = Arc::new(AllocEngine::new(TraceMode::Unfreed, Arc::clone(&table)));
        let dispatcher = Dispatcher::new(ThreadFilter::Process(Pid(1)), Arc::clone(&store))
            .with_alloc_engine(Arc::clone(&engine));

        let delivered = dispatcher.dispatch(
            &meta(2, 2),
            ProbeEvent::AllocEnter { size: 64 },
            &FixedStack(vec![0x10]),
        );

        assert!(!delivered);
        assert!(store.is_empty());
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn test_capture_failure_maps_to_sentinels() {
        struct Failing(CaptureError);
        impl StackCapture for Failing {
            fn unwind(&self) -> Result<Vec<u64>, CaptureError> {
                Err(self.0)
            }
        }

        let store = Arc::new(StackTraceStore::with_capacity(8));
        let d = Dispatcher::new(ThreadFilter::All, store);
        assert_eq!(d.capture_stack(&Failing(CaptureError::NoSpace)), StackId::NO_SPACE);
        assert_eq!(d.capture_stack(&Failing(CaptureError::BadAddress)), StackId::BAD_ADDRESS);
        assert_eq!(d.capture_stack(&Failing(CaptureError::Other(-5))), StackId(-5));
    }
}
