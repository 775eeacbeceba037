//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a TID where a
//! PID is expected, and make function signatures more expressive.

use std::fmt;

/// Process ID (tgid in kernel terms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    #[allow(clippy::cast_sign_loss)]
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

/// Thread ID (pid in kernel terms, TID in userspace)
///
/// The kernel hands probes a single `pid_tgid` word; the low half is the
/// thread id. Everything keyed "per thread" in the accounting engine uses
/// this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Opaque handle identifying one captured call stack.
///
/// Non-negative values index the [`crate::stacks::StackTraceStore`]. Negative
/// values are capture-failure sentinels carried in the same integer so they
/// travel through accounting keys without a separate error channel:
///
/// - [`StackId::NO_SPACE`] (`-ENOMEM`): the store's fixed capacity is exhausted
/// - [`StackId::BAD_ADDRESS`] (`-EFAULT`): the stack could not be unwound
/// - any other negative value: unknown failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId(pub i32);

impl StackId {
    /// Capture failed because stack storage is full.
    pub const NO_SPACE: StackId = StackId(-libc::ENOMEM);

    /// Capture failed because the stack could not be walked
    /// (missing frame pointers, JIT code without frame info).
    pub const BAD_ADDRESS: StackId = StackId(-libc::EFAULT);

    /// Returns true if this id indexes a stored stack trace.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Classify a failed capture. Returns `None` for valid ids.
    #[must_use]
    pub fn failure(self) -> Option<CaptureFailure> {
        if self.is_valid() {
            return None;
        }
        Some(match self {
            Self::NO_SPACE => CaptureFailure::NoSpace,
            Self::BAD_ADDRESS => CaptureFailure::BadAddress,
            _ => CaptureFailure::Other,
        })
    }

    /// Store index for a valid id.
    ///
    /// # Panics
    /// Panics if the id is a failure sentinel.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn index(self) -> usize {
        assert!(self.is_valid(), "Cannot index the stack store with a sentinel");
        self.0 as usize
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack#{}", self.0)
    }
}

/// Why a stack capture produced a sentinel instead of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFailure {
    /// Storage exhausted; `--stack-storage-size` bounds the table.
    NoSpace,
    /// Unwinder could not walk the stack.
    BadAddress,
    /// Any other negative id; treated as an unknown failure.
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_id_validity() {
        assert!(StackId(0).is_valid());
        assert!(StackId(5).is_valid());
        assert!(!StackId::NO_SPACE.is_valid());
        assert!(!StackId::BAD_ADDRESS.is_valid());
        assert!(!StackId(-1).is_valid());
    }

    #[test]
    fn test_stack_id_failure_classification() {
        assert_eq!(StackId(3).failure(), None);
        assert_eq!(StackId::NO_SPACE.failure(), Some(CaptureFailure::NoSpace));
        assert_eq!(StackId::BAD_ADDRESS.failure(), Some(CaptureFailure::BadAddress));
        assert_eq!(StackId(-1).failure(), Some(CaptureFailure::Other));
    }

    #[test]
    fn test_sentinels_use_errno_values() {
        assert_eq!(StackId::NO_SPACE.0, -12);
        assert_eq!(StackId::BAD_ADDRESS.0, -14);
    }
}
