//! Report aggregation and rendering
//!
//! Turns a table snapshot into the end-of-trace report. Two shapes:
//!
//! - default: one symbolized frame per line (innermost first), a separator
//!   line with the thread name, the metric value, then a blank line;
//! - folded: one line per stack, `comm;outer;...;inner value`, suitable for
//!   flame-graph tooling. Frame order is reversed here because stacks are
//!   stored innermost-first.
//!
//! Entries whose stack id is a capture-failure sentinel are never rendered;
//! they are tallied and surfaced as a single warning after the report.

use std::io::{self, Write};

use crate::domain::StackId;
use crate::stacks::StackTraceStore;
use crate::symbolization::SymbolResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Default,
    Folded,
}

/// One renderable row: an accounting or fault-group entry plus its metric.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub comm: String,
    /// Thread id shown in the default format's separator line.
    pub display_id: u32,
    pub stack: StackId,
    pub value: i64,
}

/// Count of entries hidden because their stack could not be captured.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SentinelTally {
    pub hidden: usize,
    pub saw_no_space: bool,
}

impl SentinelTally {
    /// Warning line for the hidden entries, if any. The capacity hint is
    /// only appended when at least one failure was storage exhaustion.
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        if self.hidden == 0 {
            return None;
        }
        let hint = if self.saw_no_space { " Consider increasing --stack-storage-size." } else { "" };
        Some(format!("WARNING: {} stack traces could not be displayed.{hint}", self.hidden))
    }
}

/// Render `entries` to `out`, ascending by metric value.
///
/// # Errors
/// Propagates write failures from `out`.
pub fn render(
    mut entries: Vec<ReportEntry>,
    store: &StackTraceStore,
    resolver: &dyn SymbolResolver,
    format: OutputFormat,
    out: &mut dyn Write,
) -> io::Result<SentinelTally> {
    entries.sort_by_key(|entry| entry.value);

    let mut tally = SentinelTally::default();
    for entry in entries {
        let frames = match entry.stack.failure() {
            None => store.frames(entry.stack),
            Some(failure) => {
                tally.hidden += 1;
                tally.saw_no_space |= failure == crate::domain::CaptureFailure::NoSpace;
                continue;
            }
        };
        // A valid id always resolves against the store that produced it; a
        // miss means the entry outlived its trace and cannot be shown.
        let Some(frames) = frames else {
            tally.hidden += 1;
            continue;
        };

        match format {
            OutputFormat::Folded => {
                let mut line = entry.comm.clone();
                for addr in frames.iter().rev() {
                    line.push(';');
                    line.push_str(&resolver.resolve(*addr));
                }
                writeln!(out, "{} {}", line, entry.value)?;
            }
            OutputFormat::Default => {
                for addr in frames.iter() {
                    writeln!(out, "    {}", resolver.resolve(*addr))?;
                }
                writeln!(out, "    {:<16} {} ({})", "-", entry.comm, entry.display_id)?;
                writeln!(out, "        {}\n", entry.value)?;
            }
        }
    }

    Ok(tally)
}
