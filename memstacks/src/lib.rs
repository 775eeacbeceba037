//! # Memstacks - eBPF-based Allocation and Page-Fault Stack Profiler
//!
//! Memstacks summarizes memory activity by user call stack. Two binaries
//! share this library: `memstacks` traces unfreed (or all) `malloc()` bytes,
//! `pgfaultstacks` traces user page faults, and both print per-stack totals
//! at end of trace, optionally in folded flame-graph format.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Target Process                           │
//! │        malloc()/free() calls, page faults                   │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ uprobes / tracepoint
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 eBPF Probes (Kernel)                        │
//! │  • Uprobes: malloc enter/return, free enter                 │
//! │  • Tracepoint: exceptions/page_fault_user                   │
//! │  • Stack capture via bpf_get_stackid()                      │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ ring buffer events
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Memstacks (This Crate)                      │
//! │                                                             │
//! │  ┌───────────┐   ┌─────────────┐   ┌──────────────────┐    │
//! │  │   Probe   │──▶│  Dispatcher │──▶│ Accounting       │    │
//! │  │  Decoding │   │  (filter)   │   │ Engines          │    │
//! │  └───────────┘   └──────┬──────┘   └────────┬─────────┘    │
//! │                         │                   │              │
//! │                         ▼                   ▼              │
//! │                  ┌─────────────┐   ┌──────────────────┐    │
//! │                  │ Stack Trace │──▶│ Report           │    │
//! │                  │ Store       │   │ (+ Symbolizer)   │    │
//! │                  └─────────────┘   └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`probe`]: probe object loading, attachment, ring-buffer decoding, and
//!   the kernel-backed stack capture
//! - [`dispatch`]: the boundary between instrumentation and accounting —
//!   thread filtering and event routing
//! - [`stacks`]: the bounded, deduplicating stack trace store
//! - [`engine`]: the trace-scoped accounting state machines (byte table,
//!   allocation correlation, fault presence set)
//! - [`symbolization`]: DWARF/ELF address-to-name resolution with PIE
//!   adjustment
//! - [`procmaps`]: `/proc` readers — region filter and thread-name cache
//! - [`report`]: aggregation, ordering, and the two output formats
//! - [`cli`]: argument parsing for both binaries
//! - [`domain`]: core domain types (Pid, Tid, StackId) and error taxonomy
//!
//! ## Key Concepts
//!
//! - **Stack id sentinels**: a failed capture yields a negative id
//!   (`-ENOMEM` storage full, `-EFAULT` unwalkable) that flows through the
//!   accounting keys; such entries are hidden at report time and tallied in
//!   a single warning.
//! - **Unfreed vs all**: the default mode nets frees against allocations and
//!   drops entries that collapse to zero; `-a` counts gross requested bytes.
//! - **Userspace accounting**: the kernel side only emits events and stack
//!   ids; all correlation and totals live here, where they are testable.

pub mod cli;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod probe;
pub mod procmaps;
pub mod report;
pub mod stacks;
pub mod symbolization;
