//! Per-connection budget.
//!
//! Holds the connection's private read and write buckets plus a reference to
//! its listener's budget for the shared global buckets.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{ListenerBudget, RateBudget, ThrottleError, WaitScope};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug)]
pub struct ConnectionBudget {
    listener: Arc<ListenerBudget>,
    read: Arc<RateBudget>,
    write: Arc<RateBudget>,
}

impl ConnectionBudget {
    /// Seed private buckets from the listener's current per-connection targets.
    pub fn new(listener: Arc<ListenerBudget>) -> Self {
        let read = RateBudget::new(listener.per_conn_read_limit());
        let write = RateBudget::new(listener.per_conn_write_limit());
        Self {
            listener,
            read,
            write,
        }
    }

    pub fn listener(&self) -> &Arc<ListenerBudget> {
        &self.listener
    }

    pub fn global(&self, direction: Direction) -> &Arc<RateBudget> {
        self.listener.global(direction)
    }

    pub fn per_conn(&self, direction: Direction) -> &Arc<RateBudget> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    /// Drift check. Returns true if the private bucket was re-synced.
    pub fn sync(&self, direction: Direction) -> bool {
        sync_with_listener(&self.listener, self.per_conn(direction), direction)
    }

    /// Global bucket first, then drift check, then the private bucket.
    ///
    /// The returned future owns everything it needs, so it can be parked
    /// inside a poll-based stream across wake-ups.
    pub fn admit(
        &self,
        direction: Direction,
        n: usize,
        scope: WaitScope,
    ) -> BoxFuture<'static, Result<(), ThrottleError>> {
        let listener = self.listener.clone();
        let local = self.per_conn(direction).clone();
        Box::pin(async move {
            listener.global(direction).consume(n, &scope).await?;
            sync_with_listener(&listener, &local, direction);
            local.consume(n, &scope).await
        })
    }
}

fn sync_with_listener(listener: &ListenerBudget, local: &RateBudget, direction: Direction) -> bool {
    let target = listener.per_conn_limit(direction);
    let current = local.limit();
    if target == current {
        return false;
    }
    local.set_limit(target);
    tracing::debug!(?direction, from = %current, to = %target, "per-connection limit re-synced");
    true
}
