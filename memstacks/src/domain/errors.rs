//! Structured error types for memstacks
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    /// Instrumentation error: tracing cannot proceed with nothing attached.
    #[error("0 functions traced. Exiting.")]
    NoProbesAttached,

    #[error("Failed to load probe object from {path}: {error}")]
    ProbeLoadFailed { path: String, error: String },

    #[error("Failed to attach {probe} to {target}: {error}")]
    ProbeAttachFailed { probe: String, target: String, error: String },

    #[error("Could not resolve allocator object '{0}' to a shared library")]
    ObjectNotFound(String),

    #[error("Failed to read /proc/{}/maps", .0.0)]
    MemoryMapsParseFailed(Pid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_probes_message_matches_fatal_output() {
        let err = TraceError::NoProbesAttached;
        assert_eq!(err.to_string(), "0 functions traced. Exiting.");
    }

    #[test]
    fn test_probe_attach_error() {
        let err = TraceError::ProbeAttachFailed {
            probe: "malloc_enter".to_string(),
            target: "/usr/lib/libc.so.6".to_string(),
            error: "symbol not found".to_string(),
        };
        assert!(err.to_string().contains("malloc_enter"));
        assert!(err.to_string().contains("libc.so.6"));
    }

    #[test]
    fn test_maps_error_names_the_proc_path() {
        let err = TraceError::MemoryMapsParseFailed(Pid(185));
        assert_eq!(err.to_string(), "Failed to read /proc/185/maps");
    }
}
