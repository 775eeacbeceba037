//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the raw event record and constants shared between the kernel-side
//! probes and userspace. All types use `#[repr(C)]` for consistent memory
//! layout across the kernel/userspace boundary.
//!
//! The kernel side deliberately carries no accounting state beyond the stack
//! trace map: correlation of entry/exit/free events and all byte accounting
//! happen in userspace, so a `RawEvent` is nothing more than probe context
//! plus one argument.

#![no_std]

// ============================================================================
// Event Kind Constants
// ============================================================================

/// `malloc()` entry — `arg` carries the requested size in bytes.
pub const EVENT_ALLOC_ENTER: u32 = 1;

/// `malloc()` return — `arg` carries the returned address.
pub const EVENT_ALLOC_EXIT: u32 = 2;

/// `free()` entry — `arg` carries the pointer being freed.
pub const EVENT_FREE_ENTER: u32 = 3;

/// Write-mode, not-present user page fault — `arg` carries the fault address.
pub const EVENT_PAGE_FAULT: u32 = 4;

// ============================================================================
// Thread Filter (CONFIG map keys and modes)
// ============================================================================

/// CONFIG map key holding the filter mode.
pub const CONFIG_FILTER_MODE: u32 = 0;

/// CONFIG map key holding the filter id (tgid or tid, depending on mode).
pub const CONFIG_FILTER_ID: u32 = 1;

/// Filter mode: match every thread.
pub const FILTER_MODE_ALL: u64 = 0;

/// Filter mode: match threads whose tgid equals the configured id.
pub const FILTER_MODE_PROCESS: u64 = 1;

/// Filter mode: match the single thread whose tid equals the configured id.
pub const FILTER_MODE_THREAD: u64 = 2;

/// Maximum number of stack frames to capture.
///
/// Kernel stack capture is limited to 127 frames (`PERF_MAX_STACK_DEPTH`);
/// the userspace stack store truncates to the same depth so a stack captured
/// by any backend fits one stored entry.
pub const MAX_STACK_DEPTH: usize = 127;

/// Length of a thread name (comm) snapshot, `TASK_COMM_LEN` in the kernel.
pub const COMM_LEN: usize = 16;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event sent from the eBPF probes to userspace via the ring buffer.
///
/// One record per observed probe hit. `pid`/`tid` follow userspace naming:
/// `pid` is the process id (kernel tgid) and `tid` the thread id (kernel
/// pid). `stack_id` refers to the kernel `STACK_TRACES` map and is negative
/// when the in-kernel unwinder failed (`-ENOMEM` map full, `-EFAULT`
/// unwalkable stack).
///
/// **Memory Layout**: `#[repr(C)]`, 8-byte aligned, no implicit padding.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawEvent {
    /// Probe argument: size for alloc-enter, address otherwise.
    pub arg: u64,

    /// Kernel stack trace id, or a negative errno on capture failure.
    pub stack_id: i64,

    /// Process id (tgid).
    pub pid: u32,

    /// Thread id (kernel pid).
    pub tid: u32,

    /// One of the `EVENT_*` constants.
    pub kind: u32,

    /// Padding keeping the record a multiple of 8 bytes.
    #[allow(clippy::pub_underscore_fields)]
    pub _pad: u32,

    /// Thread name snapshot (`bpf_get_current_comm`), NUL-padded.
    pub comm: [u8; COMM_LEN],
}

#[cfg(feature = "user")]
use aya::Pod;

// Required for reading RawEvent records out of the ring buffer as plain bytes
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for RawEvent {}
