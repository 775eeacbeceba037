//! # eBPF Kernel-Side Instrumentation
//!
//! Probe programs that run inside the Linux kernel and forward raw events to
//! userspace. No accounting happens here: each program snapshots probe
//! context (pid/tgid, comm, one argument, a stack id) into a `RawEvent` and
//! writes it to the ring buffer. The userspace engine owns all correlation
//! and byte accounting.
//!
//! ## Programs
//!
//! - **Uprobe** `malloc_enter` — allocation entry, argument 0 is the size
//! - **Uretprobe** `malloc_exit` — allocation return, return value is the address
//! - **Uprobe** `free_enter` — free entry, argument 0 is the pointer
//! - **Tracepoint** `page_fault` — `exceptions:page_fault_user`, gated on
//!   user|write|not-present faults (`error_code == 0x6`)
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (4MB) for the event stream
//! - `STACK_TRACES` - Deduplicated user stack traces by id
//! - `CONFIG` - Thread filter (mode + id), programmed before attach
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid},
    macros::{map, tracepoint, uprobe, uretprobe},
    maps::{HashMap, RingBuf, StackTrace},
    programs::{ProbeContext, RetProbeContext, TracePointContext},
    EbpfContext,
};
use memstacks_common::{
    RawEvent, CONFIG_FILTER_ID, CONFIG_FILTER_MODE, EVENT_ALLOC_ENTER, EVENT_ALLOC_EXIT,
    EVENT_FREE_ENTER, EVENT_PAGE_FAULT, FILTER_MODE_ALL, FILTER_MODE_PROCESS, FILTER_MODE_THREAD,
};

/// Stack capture flags for `bpf_get_stackid`:
///
/// - BPF_F_USER_STACK (0x100): Capture user-space stack (not kernel)
/// - BPF_F_FAST_STACK_CMP (0x200): Use stack hash for deduplication
/// - BPF_F_REUSE_STACKID (0x400): Overwrite existing entry on hash collision
const STACK_FLAGS: u64 = 0x100 | 0x200 | 0x400;

/// Fault error code for a user-mode write to a not-present page.
const FAULT_USER_WRITE_NOT_PRESENT: u64 = 0x6;

#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(4 * 1024 * 1024, 0); // 4MB buffer

/// Capacity declared here is a placeholder: userspace overrides max_entries
/// from `--stack-storage-size` before load, so the flag governs this map and
/// the userspace store alike. A full map makes `bpf_get_stackid` return
/// -ENOMEM, which userspace surfaces as the no-space sentinel.
#[map]
static STACK_TRACES: StackTrace = StackTrace::with_max_entries(10240, 0);

/// Thread filter programmed by userspace before attach:
/// key 0 = mode (all / process / thread), key 1 = tgid or tid to match.
#[map]
static CONFIG: HashMap<u32, u64> = HashMap::with_max_entries(2, 0);

/// Kernel-side mirror of the userspace thread filter.
///
/// Userspace applies the authoritative predicate; this copy just avoids
/// shipping events that would be dropped anyway.
fn filter_matches(pid: u32, tid: u32) -> bool {
    let mode = unsafe { CONFIG.get(&CONFIG_FILTER_MODE).copied().unwrap_or(FILTER_MODE_ALL) };
    let id = unsafe { CONFIG.get(&CONFIG_FILTER_ID).copied().unwrap_or(0) } as u32;

    match mode {
        FILTER_MODE_PROCESS => pid == id,
        FILTER_MODE_THREAD => tid == id,
        _ => true,
    }
}

fn emit<C: EbpfContext>(ctx: &C, kind: u32, arg: u64) -> Result<(), i64> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    let pid = (pid_tgid >> 32) as u32;
    let tid = pid_tgid as u32;

    if !filter_matches(pid, tid) {
        return Ok(());
    }

    let stack_id = unsafe { STACK_TRACES.get_stackid(ctx, STACK_FLAGS).unwrap_or_else(|e| e) };
    let comm = bpf_get_current_comm().unwrap_or([0u8; 16]);

    let event = RawEvent { arg, stack_id, pid, tid, kind, _pad: 0, comm };

    unsafe {
        EVENTS.output(&event, 0).map_err(|_| 1i64)?;
    }

    Ok(())
}

/// Hook: allocation function entry (`malloc` by default).
#[uprobe]
pub fn malloc_enter(ctx: ProbeContext) -> u32 {
    match try_malloc_enter(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_malloc_enter(ctx: &ProbeContext) -> Result<(), i64> {
    let size: u64 = ctx.arg(0).ok_or(1i64)?;
    emit(ctx, EVENT_ALLOC_ENTER, size)
}

/// Hook: allocation function return.
#[uretprobe]
pub fn malloc_exit(ctx: RetProbeContext) -> u32 {
    match try_malloc_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_malloc_exit(ctx: &RetProbeContext) -> Result<(), i64> {
    let ret: u64 = ctx.ret().ok_or(1i64)?;
    emit(ctx, EVENT_ALLOC_EXIT, ret)
}

/// Hook: `free` entry.
#[uprobe]
pub fn free_enter(ctx: ProbeContext) -> u32 {
    match try_free_enter(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_free_enter(ctx: &ProbeContext) -> Result<(), i64> {
    let ptr: u64 = ctx.arg(0).ok_or(1i64)?;
    emit(ctx, EVENT_FREE_ENTER, ptr)
}

/// Tracepoint arguments for `exceptions:page_fault_user`.
///
/// Layout from `/sys/kernel/debug/tracing/events/exceptions/page_fault_user/format`.
#[repr(C)]
struct PageFaultArgs {
    __unused__: u64,
    address: u64,
    ip: u64,
    error_code: u64,
}

/// Hook: user page fault tracepoint.
#[tracepoint]
pub fn page_fault(ctx: TracePointContext) -> u32 {
    match try_page_fault(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_page_fault(ctx: &TracePointContext) -> Result<(), i64> {
    let args: *const PageFaultArgs = ctx.as_ptr() as *const PageFaultArgs;
    let error_code = unsafe { (*args).error_code };

    // user, write, not-present
    if error_code != FAULT_USER_WRITE_NOT_PRESENT {
        return Ok(());
    }

    let address = unsafe { (*args).address };
    emit(ctx, EVENT_PAGE_FAULT, address)
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
