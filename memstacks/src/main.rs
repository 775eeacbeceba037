//! # memstacks - Main Entry Point
//!
//! Traces unfreed (default) or all (`-a`) `malloc()` bytes by user stack and
//! prints per-stack totals at end of trace.

use anyhow::{Context, Result};
use aya::maps::{RingBuf, StackTraceMap};
use clap::Parser;
use log::warn;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use memstacks::cli::{exit_code_for, MemstacksArgs, EXIT_SUCCESS};
use memstacks::dispatch::Dispatcher;
use memstacks::domain::TraceError;
use memstacks::engine::accounting::AccountingTable;
use memstacks::engine::alloc::AllocEngine;
use memstacks::probe::{
    attach_allocation_probes, configure_thread_filter, decode_event, init_ebpf_logger,
    load_probe_object, resolve_object_path, KernelStackCapture,
};
use memstacks::report::{render, OutputFormat, ReportEntry};
use memstacks::stacks::StackTraceStore;
use memstacks::symbolization::{object_range, HexResolver, SymbolResolver, Symbolizer};

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e}");
            code
        }
    });
}

#[tokio::main(flavor = "current_thread")]
#[allow(clippy::too_many_lines)]
async fn run() -> Result<()> {
    let args = MemstacksArgs::parse();
    let filter = args.thread_filter();
    let mode = args.trace_mode();
    let format = args.output_format();

    let object = resolve_object_path(&args.object)?;

    let mut bpf = load_probe_object(&args.bpf_object, args.stack_storage_size)?;
    init_ebpf_logger(&mut bpf);
    configure_thread_filter(&mut bpf, filter)?;

    // Uprobe-level pid filtering follows the TID flag only; the kernel and
    // userspace filters narrow the rest.
    let attach_pid = args.tid.and_then(|tid| i32::try_from(tid).ok());
    let attached = attach_allocation_probes(&mut bpf, &object, attach_pid, mode)?;
    if attached == 0 {
        return Err(TraceError::NoProbesAttached.into());
    }

    let store = Arc::new(StackTraceStore::with_capacity(args.stack_storage_size as usize));
    let table = Arc::new(AccountingTable::new());
    let engine = Arc::new(AllocEngine::new(mode, Arc::clone(&table)));
    let dispatcher =
        Dispatcher::new(filter, Arc::clone(&store)).with_alloc_engine(Arc::clone(&engine));

    let mut ring_buf =
        RingBuf::try_from(bpf.take_map("EVENTS").context("EVENTS map not found")?)?;
    let kernel_stacks: StackTraceMap<_> =
        StackTraceMap::try_from(bpf.take_map("STACK_TRACES").context("STACK_TRACES map not found")?)?;

    if format == OutputFormat::Default {
        println!("{}", args.banner());
    }

    trace_loop(&mut ring_buf, &kernel_stacks, &dispatcher, args.duration, format).await;

    if format == OutputFormat::Default {
        println!();
    }

    let resolver = build_resolver(&args, &object);
    let entries: Vec<ReportEntry> = table
        .snapshot()
        .into_iter()
        .map(|(key, value)| ReportEntry {
            comm: key.comm,
            display_id: key.pid.0,
            stack: key.stack,
            value,
        })
        .collect();

    let tally = render(entries, &store, resolver.as_ref(), format, &mut io::stdout().lock())?;
    if let Some(warning) = tally.warning() {
        eprintln!("{warning}");
    }

    Ok(())
}

/// Poll the ring buffer until the duration elapses or Ctrl-C arrives.
/// Either way the trace ends normally and the report phase runs.
async fn trace_loop(
    ring_buf: &mut RingBuf<aya::maps::MapData>,
    kernel_stacks: &StackTraceMap<aya::maps::MapData>,
    dispatcher: &Dispatcher,
    duration: Option<u32>,
    format: OutputFormat,
) {
    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(u64::from(duration.unwrap_or(u32::MAX)));
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());

    loop {
        while let Some(item) = ring_buf.next() {
            if let Some(decoded) = decode_event(&item) {
                let capture = KernelStackCapture::new(kernel_stacks, decoded.kernel_stack_id);
                dispatcher.dispatch(&decoded.meta, decoded.event, &capture);
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            () = tokio::time::sleep_until(deadline) => break,
            _ = &mut ctrl_c => {
                if format == OutputFormat::Default {
                    println!();
                }
                break;
            }
        }
    }

    // Final drain of events that arrived during the last tick
    while let Some(item) = ring_buf.next() {
        if let Some(decoded) = decode_event(&item) {
            let capture = KernelStackCapture::new(kernel_stacks, decoded.kernel_stack_id);
            dispatcher.dispatch(&decoded.meta, decoded.event, &capture);
        }
    }
}

/// Symbolize through the traced allocator object, with PIE adjustment when a
/// single target process is known. Falls back to bare hex addresses.
fn build_resolver(args: &MemstacksArgs, object: &std::path::Path) -> Box<dyn SymbolResolver> {
    match Symbolizer::new(object) {
        Ok(symbolizer) => {
            let symbolizer = match args.pid {
                Some(pid) => {
                    match object_range(memstacks::domain::Pid(pid), &object.to_string_lossy()) {
                        Ok(range) => symbolizer.with_range(range),
                        Err(e) => {
                            warn!("Failed to get object range: {e}. Addresses may not resolve.");
                            symbolizer
                        }
                    }
                }
                None => symbolizer,
            };
            Box::new(symbolizer)
        }
        Err(e) => {
            warn!("Failed to open {} for symbols: {e}", object.display());
            Box::new(HexResolver)
        }
    }
}
