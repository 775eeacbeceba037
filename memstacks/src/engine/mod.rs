//! Event-to-stack accounting engines
//!
//! Trace-scoped state machines fed by the [`crate::dispatch::Dispatcher`]:
//!
//! - [`accounting`]: the live resource table keyed by
//!   {process id, stack id, thread name}
//! - [`alloc`]: correlation of allocation entry/return/free events
//! - [`faults`]: page-fault presence tracking and grouping
//!
//! All tables support concurrent mutation from many probe handlers without a
//! global lock; they are created at trace start, read once by the report
//! phase, then discarded.

pub mod accounting;
pub mod alloc;
pub mod faults;
