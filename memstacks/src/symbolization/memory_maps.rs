//! Mapped range of the traced object
//!
//! Position-independent objects are loaded at a randomized base, so frame
//! addresses must be rebased before DWARF lookup. This module finds the full
//! mapped range of one object in a process's address space by scanning
//! `/proc/<pid>/maps` for every mapping of that path.

use anyhow::{Context, Result};
use log::info;
use std::fs;

use crate::domain::Pid;

/// Mapped range of one loaded object. Half-open: `[start, end)`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Find the full mapped range of `object_path` inside process `pid`.
///
/// An object is usually mapped as several segments (text, rodata, data); the
/// returned range spans from the lowest segment start to the highest end.
///
/// # Errors
/// Returns an error if `/proc/<pid>/maps` cannot be read or the object has no
/// mapping in this process.
pub fn object_range(pid: Pid, object_path: &str) -> Result<MemoryRange> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps =
        fs::read_to_string(&maps_path).with_context(|| format!("Failed to read {maps_path}"))?;
    let range = range_from_maps(&maps, object_path)
        .with_context(|| format!("No mapping of {object_path} in process {pid}"))?;
    info!(
        "Object {} mapped at 0x{:x}-0x{:x} in {pid}",
        object_path, range.start, range.end
    );
    Ok(range)
}

fn range_from_maps(maps: &str, object_path: &str) -> Option<MemoryRange> {
    let mut start_addr: Option<u64> = None;
    let mut end_addr: Option<u64> = None;

    for line in maps.lines() {
        if !line.ends_with(object_path) {
            continue;
        }
        let Some(range) = line.split_whitespace().next() else {
            continue;
        };
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };
        start_addr = Some(start_addr.map_or(start, |s| s.min(start)));
        end_addr = Some(end_addr.map_or(end, |e| e.max(end)));
    }

    match (start_addr, end_addr) {
        (Some(start), Some(end)) => Some(MemoryRange { start, end }),
        _ => None,
    }
}
