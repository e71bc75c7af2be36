//! bwlimit: bandwidth throttling for accepted connections.
//!
//! Two levels of token buckets guard every read and write:
//!   global:   one read and one write bucket shared by all connections of a listener
//!   per-conn: a private read and write bucket per accepted connection
//!
//! A call drains the global bucket first, then its own. Per-connection limit
//! changes reach open connections lazily: each I/O call compares the
//! listener's current target with its own bucket and re-applies on drift.

mod budget;
mod connection_budget;
mod error;
mod listener;
mod listener_budget;
mod scope;
mod stream;

pub use budget::RateBudget;
pub use connection_budget::{ConnectionBudget, Direction};
pub use error::ThrottleError;
pub use listener::{Accept, ThrottledListener};
pub use listener_budget::{LimitsSnapshot, ListenerBudget};
pub use scope::WaitScope;
pub use stream::ThrottledStream;

pub use bwlimit_core::Limit;
