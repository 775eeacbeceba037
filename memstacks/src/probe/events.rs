//! Ring-buffer record decoding and kernel stack capture

use aya::maps::{MapData, StackTraceMap};
use memstacks_common::{
    RawEvent, EVENT_ALLOC_ENTER, EVENT_ALLOC_EXIT, EVENT_FREE_ENTER, EVENT_PAGE_FAULT,
};
use std::borrow::Borrow;

use crate::dispatch::{CaptureError, EventMeta, ProbeEvent, StackCapture};
use crate::domain::{Pid, Tid};

/// One decoded ring-buffer record: dispatcher inputs plus the kernel stack
/// id the record was captured under.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub meta: EventMeta,
    pub event: ProbeEvent,
    pub kernel_stack_id: i64,
}

/// Decode one ring-buffer item into dispatcher inputs.
///
/// Returns `None` for short records and unknown event kinds; both mean a
/// userspace/probe version mismatch and are dropped rather than fatal.
#[must_use]
pub fn decode_event(bytes: &[u8]) -> Option<DecodedEvent> {
    if bytes.len() < std::mem::size_of::<RawEvent>() {
        return None;
    }

    // SAFETY: length checked above; RawEvent is #[repr(C)] Pod data written
    // by the probe side, and read_unaligned has no alignment requirement.
    #[allow(unsafe_code)]
    let raw = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<RawEvent>()) };

    let event = match raw.kind {
        EVENT_ALLOC_ENTER => ProbeEvent::AllocEnter { size: raw.arg },
        EVENT_ALLOC_EXIT => ProbeEvent::AllocExit { ret_addr: raw.arg },
        EVENT_FREE_ENTER => ProbeEvent::FreeEnter { addr: raw.arg },
        EVENT_PAGE_FAULT => ProbeEvent::PageFault { addr: raw.arg },
        _ => return None,
    };

    let meta =
        EventMeta { pid: Pid(raw.pid), tid: Tid(raw.tid), comm: comm_to_string(&raw.comm) };
    Some(DecodedEvent { meta, event, kernel_stack_id: raw.stack_id })
}

/// NUL-padded kernel comm to a string, lossily.
fn comm_to_string(comm: &[u8]) -> String {
    let len = comm.iter().position(|&b| b == 0).unwrap_or(comm.len());
    String::from_utf8_lossy(&comm[..len]).into_owned()
}

/// Stack capture backed by the kernel `STACK_TRACES` map.
///
/// The probe already ran the in-kernel unwinder at the event site; this type
/// carries the resulting id and fetches the frames on demand, translating
/// the kernel's errno-style failures into the capture error taxonomy.
pub struct KernelStackCapture<'a, T: Borrow<MapData>> {
    stacks: &'a StackTraceMap<T>,
    kernel_stack_id: i64,
}

impl<'a, T: Borrow<MapData>> KernelStackCapture<'a, T> {
    #[must_use]
    pub fn new(stacks: &'a StackTraceMap<T>, kernel_stack_id: i64) -> Self {
        Self { stacks, kernel_stack_id }
    }
}

impl<T: Borrow<MapData>> StackCapture for KernelStackCapture<'_, T> {
    fn unwind(&self) -> Result<Vec<u64>, CaptureError> {
        let id = match self.kernel_stack_id {
            id if id == i64::from(-libc::ENOMEM) => return Err(CaptureError::NoSpace),
            id if id == i64::from(-libc::EFAULT) => return Err(CaptureError::BadAddress),
            id if id < 0 => return Err(CaptureError::Other(id)),
            id => u32::try_from(id).map_err(|_| CaptureError::Other(id))?,
        };

        // A valid id that cannot be fetched means the kernel recycled the
        // slot; the frames are gone, same outcome as an unwalkable stack.
        let trace = self.stacks.get(&id, 0).map_err(|_| CaptureError::BadAddress)?;
        Ok(trace.frames().iter().map(|frame| frame.ip).collect())
    }
}
