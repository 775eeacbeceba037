//! CLI argument definitions
//!
//! One args struct per binary. Validation that can fail before tracing
//! starts lives here: non-positive storage sizes and zero durations are
//! rejected at parse time, and `-p`/`-t` exclusion is enforced by clap.

use clap::Parser;
use std::path::PathBuf;

use crate::dispatch::ThreadFilter;
use crate::domain::{Pid, Tid};
use crate::engine::alloc::TraceMode;
use crate::report::OutputFormat;

/// Compiled probe bytecode, produced by `cargo xtask build-ebpf`.
pub const DEFAULT_BPF_OBJECT: &str = "target/bpfel-unknown-none/release/memstacks-ebpf";

fn positive_nonzero(val: &str) -> Result<u32, String> {
    let parsed: u32 = val.parse().map_err(|_| "must be an integer".to_string())?;
    if parsed == 0 {
        return Err("must be nonzero".to_string());
    }
    Ok(parsed)
}

#[derive(Parser)]
#[command(
    name = "memstacks",
    about = "Summarize unfreed or all malloc() bytes by stack trace",
    after_help = "\
EXAMPLES:
    memstacks             Trace unfreed malloc() bytes until Ctrl-C
    memstacks 5           Trace for 5 seconds only
    memstacks -f 5        5 seconds, and output in folded format
    memstacks -p 185      Only trace threads for PID 185
    memstacks -t 188      Only trace thread 188
    memstacks -a          Trace all malloc() bytes until Ctrl-C"
)]
pub struct MemstacksArgs {
    /// Trace this PID only
    #[arg(short, long, conflicts_with = "tid")]
    pub pid: Option<u32>,

    /// Trace this TID only
    #[arg(short, long)]
    pub tid: Option<u32>,

    /// Output folded format
    #[arg(short, long)]
    pub folded: bool,

    /// Trace all malloc() bytes instead of unfreed bytes
    #[arg(short, long)]
    pub all: bool,

    /// Attach to allocator functions in the specified object
    #[arg(short = 'O', long, default_value = "c")]
    pub object: String,

    /// Number of unique stack traces that can be stored and displayed
    #[arg(long, default_value = "10240", value_parser = positive_nonzero)]
    pub stack_storage_size: u32,

    /// Compiled probe object to load
    #[arg(long, value_name = "FILE", default_value = DEFAULT_BPF_OBJECT)]
    pub bpf_object: PathBuf,

    /// Duration of trace, in seconds (default: run until Ctrl-C)
    #[arg(value_parser = positive_nonzero)]
    pub duration: Option<u32>,
}

impl MemstacksArgs {
    #[must_use]
    pub fn thread_filter(&self) -> ThreadFilter {
        match (self.pid, self.tid) {
            (Some(pid), _) => ThreadFilter::Process(Pid(pid)),
            (_, Some(tid)) => ThreadFilter::Thread(Tid(tid)),
            _ => ThreadFilter::All,
        }
    }

    #[must_use]
    pub fn trace_mode(&self) -> TraceMode {
        if self.all { TraceMode::All } else { TraceMode::Unfreed }
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        if self.folded { OutputFormat::Folded } else { OutputFormat::Default }
    }

    /// Start-of-trace banner, printed only in default format.
    #[must_use]
    pub fn banner(&self) -> String {
        let mode = if self.all { "all" } else { "unfreed" };
        let tail = match self.duration {
            Some(secs) => format!(" for {secs} secs."),
            None => "... Hit Ctrl-C to end.".to_string(),
        };
        format!(
            "Tracing {mode} malloc() bytes of {} by user stack{tail}",
            self.thread_filter().context_label()
        )
    }
}

#[derive(Parser)]
#[command(
    name = "pgfaultstacks",
    about = "Summarize page faults by stack trace",
    after_help = "\
EXAMPLES:
    pgfaultstacks -p 185        Trace page faults of PID 185 until Ctrl-C
    pgfaultstacks -p 185 5      Trace for 5 seconds only
    pgfaultstacks -p 185 -f 5   5 seconds, and output in folded format"
)]
pub struct PgfaultstacksArgs {
    /// Trace this PID only
    #[arg(short, long, required = true)]
    pub pid: u32,

    /// Output folded format
    #[arg(short, long)]
    pub folded: bool,

    /// Number of unique stack traces that can be stored and displayed
    #[arg(long, default_value = "102400", value_parser = positive_nonzero)]
    pub stack_storage_size: u32,

    /// Compiled probe object to load
    #[arg(long, value_name = "FILE", default_value = DEFAULT_BPF_OBJECT)]
    pub bpf_object: PathBuf,

    /// Duration of trace, in seconds (default: run until Ctrl-C)
    #[arg(value_parser = positive_nonzero)]
    pub duration: Option<u32>,
}

impl PgfaultstacksArgs {
    #[must_use]
    pub fn thread_filter(&self) -> ThreadFilter {
        ThreadFilter::Process(Pid(self.pid))
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        if self.folded { OutputFormat::Folded } else { OutputFormat::Default }
    }

    /// Start-of-trace banner, printed only in default format.
    #[must_use]
    pub fn banner(&self) -> String {
        let tail = match self.duration {
            Some(secs) => format!(" for {secs} seconds."),
            None => "... Hit Ctrl-C to end.".to_string(),
        };
        format!("Tracing page faults of PID {} by user stack{tail}", self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = MemstacksArgs::parse_from(["memstacks"]);
        assert_eq!(args.stack_storage_size, 10240);
        assert_eq!(args.object, "c");
        assert_eq!(args.duration, None);
        assert_eq!(args.thread_filter(), ThreadFilter::All);
        assert_eq!(args.trace_mode(), TraceMode::Unfreed);
        assert_eq!(args.output_format(), OutputFormat::Default);
    }

    #[test]
    fn test_pid_and_tid_are_mutually_exclusive() {
        assert!(MemstacksArgs::try_parse_from(["memstacks", "-p", "185", "-t", "188"]).is_err());
    }

    #[test]
    fn test_storage_size_must_be_positive_nonzero() {
        assert!(MemstacksArgs::try_parse_from(["memstacks", "--stack-storage-size", "0"]).is_err());
        assert!(
            MemstacksArgs::try_parse_from(["memstacks", "--stack-storage-size", "-1"]).is_err()
        );
        let args = MemstacksArgs::parse_from(["memstacks", "--stack-storage-size", "64"]);
        assert_eq!(args.stack_storage_size, 64);
    }

    #[test]
    fn test_duration_is_optional_positional() {
        let args = MemstacksArgs::parse_from(["memstacks", "5"]);
        assert_eq!(args.duration, Some(5));
        assert!(MemstacksArgs::try_parse_from(["memstacks", "0"]).is_err());
    }

    #[test]
    fn test_banner_variants() {
        let args = MemstacksArgs::parse_from(["memstacks", "-p", "185"]);
        assert_eq!(
            args.banner(),
            "Tracing unfreed malloc() bytes of PID 185 by user stack... Hit Ctrl-C to end."
        );

        let args = MemstacksArgs::parse_from(["memstacks", "-a", "-t", "188", "5"]);
        assert_eq!(args.banner(), "Tracing all malloc() bytes of TID 188 by user stack for 5 secs.");
    }

    #[test]
    fn test_pgfaultstacks_requires_pid() {
        assert!(PgfaultstacksArgs::try_parse_from(["pgfaultstacks"]).is_err());
        let args = PgfaultstacksArgs::parse_from(["pgfaultstacks", "-p", "185"]);
        assert_eq!(args.stack_storage_size, 102_400);
        assert_eq!(
            args.banner(),
            "Tracing page faults of PID 185 by user stack... Hit Ctrl-C to end."
        );
    }
}
