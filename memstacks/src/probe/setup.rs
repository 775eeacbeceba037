//! Probe loading and attachment

use anyhow::{Context, Result};
use aya::{
    maps::HashMap,
    programs::{TracePoint, UProbe},
    Ebpf, EbpfLoader,
};
use aya_log::EbpfLogger;
use log::{info, warn};
use memstacks_common::{
    CONFIG_FILTER_ID, CONFIG_FILTER_MODE, FILTER_MODE_ALL, FILTER_MODE_PROCESS, FILTER_MODE_THREAD,
};
use std::path::Path;

use crate::dispatch::ThreadFilter;
use crate::domain::TraceError;
use crate::engine::alloc::TraceMode;

/// Kernel stack-trace map; its capacity is set at load time from
/// `--stack-storage-size` so the flag governs both stores.
const STACK_TRACES_MAP: &str = "STACK_TRACES";

/// Load the compiled probe object from disk, sizing the kernel stack-trace
/// map to `stack_storage_size` entries.
///
/// The declared capacity in the probe source is only a placeholder; without
/// the override here, exhausting the kernel map would produce no-space
/// sentinels that the warning's `--stack-storage-size` hint could not fix.
///
/// The object is built separately (`cargo xtask build-ebpf`) because it needs
/// a nightly toolchain and bpf-linker; loading at runtime keeps this binary
/// buildable without either.
///
/// # Errors
/// Returns an error if the file is missing or rejected by the verifier.
pub fn load_probe_object(path: &Path, stack_storage_size: u32) -> Result<Ebpf> {
    let bpf = EbpfLoader::new()
        .set_max_entries(STACK_TRACES_MAP, stack_storage_size)
        .load_file(path)
        .map_err(|e| TraceError::ProbeLoadFailed {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
    info!("Loaded probe object {} ({stack_storage_size} stack slots)", path.display());
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Mirror the thread filter into the kernel CONFIG map.
///
/// The kernel-side check is an optimization that keeps uninteresting events
/// out of the ring buffer; the userspace dispatcher applies the same
/// predicate authoritatively.
///
/// # Errors
/// Returns an error if the CONFIG map is missing or the insert fails.
pub fn configure_thread_filter(bpf: &mut Ebpf, filter: ThreadFilter) -> Result<()> {
    let mut config: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut("CONFIG").context("CONFIG map not found")?)?;

    let (mode, id) = match filter {
        ThreadFilter::All => (FILTER_MODE_ALL, 0),
        ThreadFilter::Process(pid) => (FILTER_MODE_PROCESS, u64::from(pid.0)),
        ThreadFilter::Thread(tid) => (FILTER_MODE_THREAD, u64::from(tid.0)),
    };
    config.insert(CONFIG_FILTER_MODE, mode, 0)?;
    config.insert(CONFIG_FILTER_ID, id, 0)?;
    Ok(())
}

/// Attach the allocator probes to `object` and return how many attached.
///
/// Always attaches the `malloc` entry uprobe; unless tracing all bytes, also
/// the `malloc` return probe and the `free` entry probe. A probe that fails
/// to attach is logged and skipped — zero attachments is the caller's fatal
/// condition, not ours.
///
/// # Errors
/// Returns an error only when a program is missing from the object or fails
/// to load, which means a broken probe object rather than a missing symbol.
pub fn attach_allocation_probes(
    bpf: &mut Ebpf,
    object: &Path,
    pid: Option<i32>,
    mode: TraceMode,
) -> Result<usize> {
    let mut probes: Vec<(&str, &str)> = vec![("malloc_enter", "malloc")];
    if mode == TraceMode::Unfreed {
        probes.push(("malloc_exit", "malloc"));
        probes.push(("free_enter", "free"));
    }

    let mut attached = 0;
    for (program_name, symbol) in probes {
        let program: &mut UProbe = bpf
            .program_mut(program_name)
            .with_context(|| format!("{program_name} program not found"))?
            .try_into()?;
        program.load()?;
        match program.attach(Some(symbol), 0, object, pid) {
            Ok(_) => {
                info!("Attached {program_name} to {symbol} in {}", object.display());
                attached += 1;
            }
            Err(e) => {
                warn!("Could not attach {program_name} to {symbol}: {e}");
            }
        }
    }
    Ok(attached)
}

/// Attach the page-fault tracepoint and return how many attached.
///
/// # Errors
/// Returns an error if the program is missing, fails to load, or the
/// tracepoint does not exist on this kernel.
pub fn attach_fault_tracepoint(bpf: &mut Ebpf) -> Result<usize> {
    let program: &mut TracePoint =
        bpf.program_mut("page_fault").context("page_fault program not found")?.try_into()?;
    program.load()?;
    program.attach("exceptions", "page_fault_user").map_err(|e| {
        TraceError::ProbeAttachFailed {
            probe: "page_fault".to_string(),
            target: "exceptions:page_fault_user".to_string(),
            error: e.to_string(),
        }
    })?;
    info!("Attached tracepoint: exceptions/page_fault_user");
    Ok(1)
}
