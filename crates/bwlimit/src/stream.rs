//! ThrottledStream: a stream decorator that charges every read and write
//! against its connection budget before touching the inner stream.
//!
//! Each call is charged for the full buffer it offers, whether or not the
//! inner stream ends up moving that many bytes. Admission is remembered
//! across `Poll::Pending` from the inner stream so a call is charged once.

use std::fmt;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, ReusableBoxFuture};

use crate::{ConnectionBudget, Direction, ThrottleError, WaitScope};

#[derive(Debug, Clone, Copy)]
enum AdmitState {
    Idle,
    Waiting(usize),
    Admitted(usize),
}

/// Admission for one direction of a stream.
struct Admission {
    state: AdmitState,
    fut: ReusableBoxFuture<'static, Result<(), ThrottleError>>,
}

impl Admission {
    fn new() -> Self {
        Self {
            state: AdmitState::Idle,
            fut: ReusableBoxFuture::new(std::future::ready(Ok(()))),
        }
    }

    /// Drive admission for a call of `len` bytes; yields the admitted size.
    fn poll_admit(
        &mut self,
        cx: &mut Context<'_>,
        len: usize,
        start: impl Fn(usize) -> BoxFuture<'static, Result<(), ThrottleError>>,
    ) -> Poll<Result<usize, ThrottleError>> {
        loop {
            match self.state {
                AdmitState::Admitted(n) => return Poll::Ready(Ok(n)),
                AdmitState::Waiting(n) => match ready!(self.fut.poll(cx)) {
                    Ok(()) => self.state = AdmitState::Admitted(n),
                    Err(e) => {
                        self.state = AdmitState::Idle;
                        return Poll::Ready(Err(e));
                    }
                },
                AdmitState::Idle => {
                    self.fut.set(start(len));
                    self.state = AdmitState::Waiting(len);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = AdmitState::Idle;
    }
}

#[pin_project]
pub struct ThrottledStream<S> {
    #[pin]
    inner: S,
    budget: ConnectionBudget,
    cancel: CancellationToken,
    wait_timeout: Option<Duration>,
    reading: Admission,
    writing: Admission,
}

impl<S> ThrottledStream<S> {
    pub fn new(inner: S, budget: ConnectionBudget) -> Self {
        Self::with_cancel(inner, budget, CancellationToken::new())
    }

    /// Waits on this stream fail with `Cancelled` once `cancel` fires.
    pub fn with_cancel(inner: S, budget: ConnectionBudget, cancel: CancellationToken) -> Self {
        Self {
            inner,
            budget,
            cancel,
            wait_timeout: None,
            reading: Admission::new(),
            writing: Admission::new(),
        }
    }

    /// Longest a single read or write may wait for tokens. `None` waits forever.
    pub fn set_wait_timeout(&mut self, timeout: Option<Duration>) {
        self.wait_timeout = timeout;
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn budget(&self) -> &ConnectionBudget {
        &self.budget
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn get_pin_mut(self: Pin<&mut Self>) -> Pin<&mut S> {
        self.project().inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl ThrottledStream<TcpStream> {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn nodelay(&self) -> io::Result<bool> {
        self.inner.nodelay()
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.inner.set_nodelay(nodelay)
    }
}

fn admitter<'a>(
    budget: &'a ConnectionBudget,
    cancel: &'a CancellationToken,
    timeout: Option<Duration>,
    direction: Direction,
) -> impl Fn(usize) -> BoxFuture<'static, Result<(), ThrottleError>> + 'a {
    move |n| {
        let scope = WaitScope::unbounded()
            .with_token(cancel.clone())
            .with_timeout(timeout);
        budget.admit(direction, n, scope)
    }
}

impl<S: AsyncRead> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();

        let want = buf.remaining();
        if want == 0 {
            return this.inner.poll_read(cx, buf);
        }

        let start = admitter(this.budget, this.cancel, *this.wait_timeout, Direction::Read);
        let admitted = ready!(this.reading.poll_admit(cx, want, start))?;

        let res = if admitted >= buf.remaining() {
            ready!(this.inner.poll_read(cx, buf))
        } else {
            let mut limited = ReadBuf::new(buf.initialize_unfilled_to(admitted));
            let res = ready!(this.inner.poll_read(cx, &mut limited));
            let filled = limited.filled().len();
            buf.advance(filled);
            res
        };
        this.reading.reset();
        Poll::Ready(res)
    }
}

impl<S: AsyncWrite> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();

        if buf.is_empty() {
            return this.inner.poll_write(cx, buf);
        }

        let start = admitter(this.budget, this.cancel, *this.wait_timeout, Direction::Write);
        let admitted = ready!(this.writing.poll_admit(cx, buf.len(), start))?;

        let end = admitted.min(buf.len());
        let res = ready!(this.inner.poll_write(cx, &buf[..end]));
        this.writing.reset();
        Poll::Ready(res)
    }

    /// Charged for the combined length of all slices.
    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();

        let total: usize = bufs.iter().map(|b| b.len()).sum();
        if total == 0 {
            return this.inner.poll_write_vectored(cx, bufs);
        }

        let start = admitter(this.budget, this.cancel, *this.wait_timeout, Direction::Write);
        let admitted = ready!(this.writing.poll_admit(cx, total, start))?;

        let res = if admitted >= total {
            ready!(this.inner.poll_write_vectored(cx, bufs))
        } else {
            // Caller shrank its slices between polls; stay within what was admitted.
            let first = bufs.iter().find(|b| !b.is_empty()).map_or(&[][..], |b| &b[..]);
            let end = admitted.min(first.len());
            ready!(this.inner.poll_write(cx, &first[..end]))
        };
        this.writing.reset();
        Poll::Ready(res)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl<S: fmt::Debug> fmt::Debug for ThrottledStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledStream")
            .field("inner", &self.inner)
            .field("budget", &self.budget)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}
