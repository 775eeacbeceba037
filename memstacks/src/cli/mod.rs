//! CLI argument definitions and exit codes

pub mod args;

pub use args::{MemstacksArgs, PgfaultstacksArgs, DEFAULT_BPF_OBJECT};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_NOPERM: i32 = 77;

/// Map a run failure to a process exit code.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}
