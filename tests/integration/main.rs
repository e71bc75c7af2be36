//! bwlimit integration test harness.
//!
//! Every test binds its own loopback listener on an OS-assigned port, so
//! tests run in parallel without interfering. Timing assertions use the
//! wall clock and carry generous upper bounds.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};

use bwlimit::{Limit, ThrottleError, ThrottledListener, ThrottledStream};

mod reconfigure;
mod throughput;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Bind a throttled listener on 127.0.0.1 with an OS-assigned port.
pub async fn bind(
    global: impl Into<Limit>,
    per_conn: impl Into<Limit>,
) -> Result<(ThrottledListener<TcpListener>, SocketAddr)> {
    let raw = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind loopback listener")?;
    let listener = ThrottledListener::new(raw, global, per_conn);
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// Accept one connection: the throttled server side and the raw client side.
pub async fn connect_pair(
    listener: &ThrottledListener<TcpListener>,
    addr: SocketAddr,
) -> Result<(ThrottledStream<TcpStream>, TcpStream)> {
    let (accepted, client) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (server, _) = accepted.context("accept failed")?;
    Ok((server, client.context("connect failed")?))
}

/// Drain `client` until EOF in the background. Resolves to the byte count.
pub fn drain(mut client: TcpStream) -> tokio::task::JoinHandle<std::io::Result<usize>> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut buf).await
    })
}

pub fn throttle_error(e: &std::io::Error) -> Option<ThrottleError> {
    e.get_ref()?.downcast_ref::<ThrottleError>().copied()
}

pub fn assert_between(elapsed: Duration, lo: f64, hi: f64) {
    let secs = elapsed.as_secs_f64();
    assert!(
        (lo..=hi).contains(&secs),
        "elapsed {secs:.3}s outside [{lo}, {hi}]"
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The listener hands out streams whose peer is the connecting client.
#[tokio::test]
async fn test_accept_wraps_peer() -> Result<()> {
    let (listener, addr) = bind(None::<u64>, None::<u64>).await?;
    let (server, client) = connect_pair(&listener, addr).await?;

    assert_eq!(server.peer_addr()?, client.local_addr()?);
    assert_eq!(server.local_addr()?, addr);
    server.set_nodelay(true)?;
    assert!(server.nodelay()?);
    Ok(())
}

/// Unix sockets get the same per-connection throttling as TCP.
#[cfg(unix)]
#[tokio::test]
async fn test_unix_listener_is_throttled_too() -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{UnixListener, UnixStream};

    let path = std::env::temp_dir().join(format!("bwlimit-it-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = ThrottledListener::new(UnixListener::bind(&path)?, None::<u64>, 20u64);

    let (accepted, client) = tokio::join!(listener.accept(), UnixStream::connect(&path));
    let (mut server, _) = accepted?;
    let mut client = client?;

    let start = tokio::time::Instant::now();
    server.write_all(&[1u8; 50]).await?;
    server.shutdown().await?;
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await?;
    assert_eq!(buf.len(), 50);
    assert_between(start.elapsed(), 1.45, 3.0);

    std::fs::remove_file(&path)?;
    Ok(())
}
