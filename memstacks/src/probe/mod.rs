//! Kernel probe plumbing
//!
//! Userspace side of the instrumentation: loading the compiled probe object,
//! attaching the allocator uprobes or the page-fault tracepoint, mirroring
//! the thread filter into the kernel, and decoding ring-buffer records into
//! dispatcher events. Everything above this module is kernel-agnostic.

pub mod events;
pub mod object_path;
pub mod setup;

pub use events::{decode_event, DecodedEvent, KernelStackCapture};
pub use object_path::resolve_object_path;
pub use setup::{
    attach_allocation_probes, attach_fault_tracepoint, configure_thread_filter, init_ebpf_logger,
    load_probe_object,
};
