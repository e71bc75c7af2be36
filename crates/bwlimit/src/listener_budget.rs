//! Budget shared by every connection accepted from one listener.
//!
//! The global read and write buckets are live limiters and are mutated in
//! place, never replaced, so connections holding them see changes at once.
//! Per-connection limits are only target values here; each connection pulls
//! them into its own buckets on its next I/O call.

use std::sync::{Arc, PoisonError, RwLock};

use bwlimit_core::Limit;

use crate::{Direction, RateBudget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PerConnTargets {
    read: Limit,
    write: Limit,
}

/// Point-in-time view of a listener's configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitsSnapshot {
    pub global_read: Limit,
    pub global_write: Limit,
    pub per_conn_read: Limit,
    pub per_conn_write: Limit,
}

#[derive(Debug)]
pub struct ListenerBudget {
    global_read: Arc<RateBudget>,
    global_write: Arc<RateBudget>,
    // Also serialises reconfiguration of the global buckets.
    per_conn: RwLock<PerConnTargets>,
}

impl ListenerBudget {
    pub fn new(global: impl Into<Limit>, per_conn: impl Into<Limit>) -> Arc<Self> {
        let global = global.into();
        let per_conn = per_conn.into();
        Arc::new(Self {
            global_read: RateBudget::new(global),
            global_write: RateBudget::new(global),
            per_conn: RwLock::new(PerConnTargets {
                read: per_conn,
                write: per_conn,
            }),
        })
    }

    pub fn global(&self, direction: Direction) -> &Arc<RateBudget> {
        match direction {
            Direction::Read => &self.global_read,
            Direction::Write => &self.global_write,
        }
    }

    pub fn global_read(&self) -> &Arc<RateBudget> {
        &self.global_read
    }

    pub fn global_write(&self) -> &Arc<RateBudget> {
        &self.global_write
    }

    pub fn per_conn_limit(&self, direction: Direction) -> Limit {
        let targets = self.per_conn.read().unwrap_or_else(PoisonError::into_inner);
        match direction {
            Direction::Read => targets.read,
            Direction::Write => targets.write,
        }
    }

    pub fn per_conn_read_limit(&self) -> Limit {
        self.per_conn_limit(Direction::Read)
    }

    pub fn per_conn_write_limit(&self) -> Limit {
        self.per_conn_limit(Direction::Write)
    }

    pub fn set_global_limit(&self, limit: impl Into<Limit>) {
        let limit = limit.into();
        self.set_global_limits(limit, limit);
    }

    pub fn set_global_limits(&self, read: impl Into<Limit>, write: impl Into<Limit>) {
        let (read, write) = (read.into(), write.into());
        let _guard = self.per_conn.write().unwrap_or_else(PoisonError::into_inner);
        self.global_read.set_limit(read);
        self.global_write.set_limit(write);
        tracing::info!(%read, %write, "global limits updated");
    }

    /// Updates the targets only; open connections converge on their next I/O call.
    pub fn set_per_conn_limit(&self, limit: impl Into<Limit>) {
        let limit = limit.into();
        self.set_per_conn_limits(limit, limit);
    }

    pub fn set_per_conn_limits(&self, read: impl Into<Limit>, write: impl Into<Limit>) {
        let (read, write) = (read.into(), write.into());
        *self.per_conn.write().unwrap_or_else(PoisonError::into_inner) =
            PerConnTargets { read, write };
        tracing::info!(%read, %write, "per-connection limits updated");
    }

    /// Apply both limits under one write lock.
    pub fn set_limits(&self, global: impl Into<Limit>, per_conn: impl Into<Limit>) {
        let (global, per_conn) = (global.into(), per_conn.into());
        {
            let mut targets = self.per_conn.write().unwrap_or_else(PoisonError::into_inner);
            self.global_read.set_limit(global);
            self.global_write.set_limit(global);
            *targets = PerConnTargets {
                read: per_conn,
                write: per_conn,
            };
        }
        tracing::info!(%global, %per_conn, "listener limits updated");
    }

    pub fn snapshot(&self) -> LimitsSnapshot {
        let targets = *self.per_conn.read().unwrap_or_else(PoisonError::into_inner);
        LimitsSnapshot {
            global_read: self.global_read.limit(),
            global_write: self.global_write.limit(),
            per_conn_read: targets.read,
            per_conn_write: targets.write,
        }
    }
}
