//! # pgfaultstacks - Main Entry Point
//!
//! Traces user page faults of one process by user stack. Fault addresses are
//! deduplicated during the trace; at report time, addresses no longer inside
//! any mapped region of the target are discarded before counting.

use anyhow::{Context, Result};
use aya::maps::{RingBuf, StackTraceMap};
use clap::Parser;
use log::warn;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use memstacks::cli::{exit_code_for, PgfaultstacksArgs, EXIT_SUCCESS};
use memstacks::dispatch::Dispatcher;
use memstacks::domain::Pid;
use memstacks::engine::faults::FaultEngine;
use memstacks::probe::{
    attach_fault_tracepoint, configure_thread_filter, decode_event, init_ebpf_logger,
    load_probe_object, KernelStackCapture,
};
use memstacks::procmaps::{CommCache, RegionFilter};
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
async fn run() -> Result<()> {
    let args = PgfaultstacksArgs::parse();
    let pid = Pid(args.pid);
    let filter = args.thread_filter();
    let format = args.output_format();

    let mut bpf = load_probe_object(&args.bpf_object, args.stack_storage_size)?;
    init_ebpf_logger(&mut bpf);
    configure_thread_filter(&mut bpf, filter)?;
    attach_fault_tracepoint(&mut bpf)?;

    let store = Arc::new(StackTraceStore::with_capacity(args.stack_storage_size as usize));
    let engine = Arc::new(FaultEngine::new());
    let dispatcher =
        Dispatcher::new(filter, Arc::clone(&store)).with_fault_engine(Arc::clone(&engine));

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

    // Region list is read once, after the trace window, so addresses whose
    // mapping disappeared mid-trace are dropped.
    let regions = RegionFilter::for_process(pid)?;
    let mut comms = CommCache::new(pid);

    let entries: Vec<ReportEntry> = engine
        .aggregate(&regions)
        .into_iter()
        .map(|(group, count)| ReportEntry {
            comm: comms.comm(group.tid).to_string(),
            display_id: group.tid.0,
            stack: group.stack,
            value: i64::try_from(count).unwrap_or(i64::MAX),
        })
        .collect();

    let resolver = build_resolver(pid);
    let tally = render(entries, &store, resolver.as_ref(), format, &mut io::stdout().lock())?;
    if let Some(warning) = tally.warning() {
        eprintln!("{warning}");
    }

    Ok(())
}

/// Poll the ring buffer until the duration elapses or Ctrl-C arrives.
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

    while let Some(item) = ring_buf.next() {
        if let Some(decoded) = decode_event(&item) {
            let capture = KernelStackCapture::new(kernel_stacks, decoded.kernel_stack_id);
            dispatcher.dispatch(&decoded.meta, decoded.event, &capture);
        }
    }
}

/// Symbolize through the target's main executable, with PIE adjustment.
/// Falls back to bare hex addresses when the executable cannot be read.
fn build_resolver(pid: Pid) -> Box<dyn SymbolResolver> {
    let exe = match std::fs::read_link(format!("/proc/{}/exe", pid.0)) {
        Ok(exe) => exe,
        Err(e) => {
            warn!("Failed to resolve executable of {pid}: {e}");
            return Box::new(HexResolver);
        }
    };

    match Symbolizer::new(&exe) {
        Ok(symbolizer) => match object_range(pid, &exe.to_string_lossy()) {
            Ok(range) => Box::new(symbolizer.with_range(range)),
            Err(e) => {
                warn!("Failed to get object range: {e}. Addresses may not resolve.");
                Box::new(symbolizer)
            }
        },
        Err(e) => {
            warn!("Failed to open {} for symbols: {e}", exe.display());
            Box::new(HexResolver)
        }
    }
}
