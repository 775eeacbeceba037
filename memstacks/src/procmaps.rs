//! Process memory-map filter and thread-name lookup
//!
//! Two small `/proc` readers used by the fault variant:
//!
//! - [`RegionFilter`]: every `start-end` address range from
//!   `/proc/<pid>/maps`, parsed once per trace and used only as a predicate
//!   to drop fault addresses that no longer fall inside any mapping.
//! - [`CommCache`]: lazy, memoized `/proc/<pid>/task/<tid>/comm` lookup for
//!   report rendering.

use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::domain::{Pid, Tid, TraceError};

/// One mapped address range. Bounds are inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
}

impl MemoryRegion {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr <= self.end
    }
}

/// Address-range predicate built from a process's mapping list.
#[derive(Debug, Default)]
pub struct RegionFilter {
    regions: Vec<MemoryRegion>,
}

impl RegionFilter {
    #[must_use]
    pub fn from_regions(regions: Vec<MemoryRegion>) -> Self {
        Self { regions }
    }

    /// Parse every `start-end` range out of `/proc/<pid>/maps` content.
    ///
    /// Lines that do not begin with a hex range are skipped rather than
    /// treated as errors; the maps format grows fields over kernel versions.
    #[must_use]
    pub fn parse(maps: &str) -> Self {
        let mut regions = Vec::new();
        for line in maps.lines() {
            let Some(range) = line.split_whitespace().next() else {
                continue;
            };
            let Some((start, end)) = range.split_once('-') else {
                continue;
            };
            let (Ok(start), Ok(end)) =
                (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
            else {
                continue;
            };
            regions.push(MemoryRegion { start, end });
        }
        Self { regions }
    }

    /// Read and parse the live mapping list of `pid`.
    ///
    /// # Errors
    /// Returns [`TraceError::MemoryMapsParseFailed`] if `/proc/<pid>/maps`
    /// cannot be read (process gone, or insufficient privileges).
    pub fn for_process(pid: Pid) -> Result<Self> {
        let maps_path = format!("/proc/{}/maps", pid.0);
        let maps =
            fs::read_to_string(&maps_path).map_err(|_| TraceError::MemoryMapsParseFailed(pid))?;
        let filter = Self::parse(&maps);
        info!("Parsed {} memory regions for {pid}", filter.regions.len());
        Ok(filter)
    }

    /// True if `addr` falls inside any known region.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.regions.iter().any(|region| region.contains(addr))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Memoized thread-name lookup via `/proc/<pid>/task/<tid>/comm`.
///
/// Unreadable entries (thread exited mid-trace) resolve to `"--"`, once.
pub struct CommCache {
    proc_root: PathBuf,
    pid: Pid,
    cache: HashMap<Tid, String>,
}

impl CommCache {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self::with_proc_root(PathBuf::from("/proc"), pid)
    }

    /// Test seam: resolve under an alternate proc-like tree.
    #[must_use]
    pub fn with_proc_root(proc_root: PathBuf, pid: Pid) -> Self {
        Self { proc_root, pid, cache: HashMap::new() }
    }

    /// Thread name for `tid`, resolved lazily and cached for the lifetime of
    /// the report phase.
    pub fn comm(&mut self, tid: Tid) -> &str {
        let Self { proc_root, pid, cache } = self;
        cache.entry(tid).or_insert_with(|| {
            let path = proc_root.join(format!("{}/task/{}/comm", pid.0, tid.0));
            match fs::read_to_string(&path) {
                Ok(comm) => comm.trim_end().to_string(),
                Err(_) => "--".to_string(),
            }
        })
    }
}
