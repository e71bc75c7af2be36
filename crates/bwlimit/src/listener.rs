//! ThrottledListener: wraps a raw listener so every accepted stream is
//! throttled against one shared [`ListenerBudget`].

use std::future::Future;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bwlimit_core::{Limit, LimitsConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::{ConnectionBudget, LimitsSnapshot, ListenerBudget, ThrottledStream};

/// Anything that hands out new byte streams.
pub trait Accept {
    type Stream;
    type Addr;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, Self::Addr)>> + Send;

    fn local_addr(&self) -> io::Result<Self::Addr>;
}

impl Accept for TcpListener {
    type Stream = TcpStream;
    type Addr = std::net::SocketAddr;

    async fn accept(&self) -> io::Result<(TcpStream, std::net::SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        TcpListener::local_addr(self)
    }
}

#[cfg(unix)]
impl Accept for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;
    type Addr = tokio::net::unix::SocketAddr;

    async fn accept(&self) -> io::Result<(Self::Stream, Self::Addr)> {
        tokio::net::UnixListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::UnixListener::local_addr(self)
    }
}

pub struct ThrottledListener<L> {
    inner: L,
    budget: Arc<ListenerBudget>,
    cancel: CancellationToken,
    wait_timeout: RwLock<Option<Duration>>,
}

impl<L: Accept> ThrottledListener<L> {
    /// `None` or `0` for either limit means unlimited.
    pub fn new(inner: L, global: impl Into<Limit>, per_conn: impl Into<Limit>) -> Self {
        Self {
            inner,
            budget: ListenerBudget::new(global, per_conn),
            cancel: CancellationToken::new(),
            wait_timeout: RwLock::new(None),
        }
    }

    pub fn from_config(inner: L, limits: &LimitsConfig) -> Self {
        let listener = Self::new(inner, limits.global(), limits.per_conn());
        listener.set_wait_timeout(limits.wait_timeout());
        listener
    }

    /// Accept the next raw stream and wrap it with a fresh connection budget.
    pub async fn accept(&self) -> io::Result<(ThrottledStream<L::Stream>, L::Addr)> {
        let (stream, addr) = self.inner.accept().await?;
        let budget = ConnectionBudget::new(self.budget.clone());
        tracing::debug!(
            per_conn_read = %budget.per_conn(crate::Direction::Read).limit(),
            per_conn_write = %budget.per_conn(crate::Direction::Write).limit(),
            "accepted throttled connection"
        );
        let mut stream = ThrottledStream::with_cancel(stream, budget, self.cancel.child_token());
        stream.set_wait_timeout(self.wait_timeout());
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> io::Result<L::Addr> {
        self.inner.local_addr()
    }
}

impl<L> ThrottledListener<L> {
    /// Global buckets change immediately; open connections pick up the
    /// per-connection limit on their next read or write.
    pub fn set_limits(&self, global: impl Into<Limit>, per_conn: impl Into<Limit>) {
        self.budget.set_limits(global, per_conn);
    }

    pub fn set_global_limit(&self, limit: impl Into<Limit>) {
        self.budget.set_global_limit(limit);
    }

    pub fn set_per_conn_limit(&self, limit: impl Into<Limit>) {
        self.budget.set_per_conn_limit(limit);
    }

    /// Applies to connections accepted from now on.
    pub fn set_wait_timeout(&self, timeout: Option<Duration>) {
        *self.wait_timeout.write().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        *self.wait_timeout.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limits(&self) -> LimitsSnapshot {
        self.budget.snapshot()
    }

    pub fn budget(&self) -> &Arc<ListenerBudget> {
        &self.budget
    }

    /// Fail every pending and future wait on streams from this listener.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn get_ref(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}
