//! Accept loop and per-connection echo handler.

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use bwlimit::{ConnectionBudget, Direction, ThrottleError, ThrottledListener, ThrottledStream};
use bwlimit_core::BwlimitConfig;

const ECHO_BUF_SIZE: usize = 16 * 1024;

pub struct EchoServer {
    listener: Arc<ThrottledListener<TcpListener>>,
    shutdown: broadcast::Receiver<()>,
}

impl EchoServer {
    pub fn new(
        listener: Arc<ThrottledListener<TcpListener>>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self { listener, shutdown }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    self.listener.shutdown();
                    tracing::info!("echo server shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(%peer, "connection accepted");
                    tokio::spawn(async move {
                        match echo(stream).await {
                            Ok(bytes) => tracing::debug!(%peer, bytes, "connection closed"),
                            Err(e) if is_cancelled(&e) => {
                                tracing::debug!(%peer, "connection cancelled by shutdown")
                            }
                            Err(e) => tracing::warn!(%peer, error = %e, "connection failed"),
                        }
                    });
                }
            }
        }
    }
}

/// Copy everything read back to the peer until EOF. Returns bytes echoed.
///
/// Reads are charged for the buffer offered, so each read offers at most one
/// second of the tightest current read limit.
async fn echo(mut stream: ThrottledStream<TcpStream>) -> io::Result<u64> {
    let mut buf = vec![0u8; ECHO_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let len = read_size(stream.budget());
        let n = stream.read(&mut buf[..len]).await?;
        if n == 0 {
            stream.shutdown().await?;
            return Ok(total);
        }
        stream.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

fn read_size(budget: &ConnectionBudget) -> usize {
    [
        budget.listener().per_conn_read_limit(),
        budget.global(Direction::Read).limit(),
    ]
    .iter()
    .filter_map(|limit| limit.bytes_per_sec())
    .fold(ECHO_BUF_SIZE as u64, u64::min)
    .max(1) as usize
}

fn is_cancelled(e: &io::Error) -> bool {
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<ThrottleError>())
        .is_some_and(|t| *t == ThrottleError::Cancelled)
}

/// Re-read the config file and push its limits into the live listener.
pub fn reload(listener: &ThrottledListener<TcpListener>) {
    let config = match BwlimitConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "config reload failed, keeping current limits");
            return;
        }
    };
    apply(listener, &config);
}

fn apply(listener: &ThrottledListener<TcpListener>, config: &BwlimitConfig) {
    listener.set_limits(config.limits.global(), config.limits.per_conn());
    listener.set_wait_timeout(config.limits.wait_timeout());
    tracing::info!(
        global = %config.limits.global(),
        per_conn = %config.limits.per_conn(),
        wait_timeout_ms = config.limits.wait_timeout_ms,
        "config reloaded"
    );
}
