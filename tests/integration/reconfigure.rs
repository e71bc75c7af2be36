use crate::*;

use bwlimit_core::LimitsConfig;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

/// Raising the per-connection limit reaches a connection that is already open.
#[tokio::test]
async fn test_per_conn_change_reaches_open_connection() -> Result<()> {
    let (listener, addr) = bind(None::<u64>, 10u64).await?;
    let (mut server, client) = connect_pair(&listener, addr).await?;
    let reader = drain(client);

    listener.set_limits(None::<u64>, 100_000u64);

    let start = Instant::now();
    server.write_all(&[4u8; 1000]).await?;
    let elapsed = start.elapsed();
    server.shutdown().await?;

    assert_eq!(reader.await??, 1000);
    // At the old 10 B/s this would take 99 seconds.
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(listener.limits().per_conn_write, Limit::from(100_000u64));
    Ok(())
}

/// Lowering the global limit slows a writer that is already waiting.
#[tokio::test]
async fn test_global_change_reaches_waiting_writer() -> Result<()> {
    let (listener, addr) = bind(10u64, None::<u64>).await?;
    let (mut server, client) = connect_pair(&listener, addr).await?;
    let reader = drain(client);

    let start = Instant::now();
    let writer = tokio::spawn(async move {
        server.write_all(&[5u8; 100]).await?;
        server.shutdown().await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    listener.set_global_limit(1_000u64);

    writer.await??;
    assert_eq!(reader.await??, 100);
    // Roughly 9 seconds at the old rate.
    assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
    Ok(())
}

/// Shutting the listener down fails pending waits with `Cancelled`.
#[tokio::test]
async fn test_shutdown_cancels_pending_writes() -> Result<()> {
    let (listener, addr) = bind(None::<u64>, 1u64).await?;
    let (mut server, client) = connect_pair(&listener, addr).await?;
    let reader = drain(client);

    server.write_all(&[6u8; 1]).await?;
    let writer = tokio::spawn(async move { server.write_all(&[6u8; 100]).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    listener.shutdown();

    let err = writer.await?.expect_err("write should be cancelled");
    assert_eq!(throttle_error(&err), Some(ThrottleError::Cancelled));
    // Nothing past the first byte was written.
    assert_eq!(reader.await??, 1);

    // Streams accepted after shutdown fail their first throttled call.
    let (mut late, _client) = connect_pair(&listener, addr).await?;
    let err = late.write_all(&[0u8; 5]).await.expect_err("late write should be cancelled");
    assert_eq!(throttle_error(&err), Some(ThrottleError::Cancelled));
    Ok(())
}

/// A wait timeout shorter than the wait needed fails fast with `TimedOut`.
#[tokio::test]
async fn test_wait_timeout_from_config() -> Result<()> {
    let raw = TcpListener::bind("127.0.0.1:0").await?;
    let limits = LimitsConfig {
        global_bytes_per_sec: 0,
        per_conn_bytes_per_sec: 10,
        wait_timeout_ms: 200,
    };
    let listener = ThrottledListener::from_config(raw, &limits);
    let addr = listener.local_addr()?;
    let (mut server, _client) = connect_pair(&listener, addr).await?;

    server.write_all(&[7u8; 10]).await?;

    let start = Instant::now();
    let err = server.write_all(&[7u8; 100]).await.expect_err("write should time out");
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    assert_eq!(throttle_error(&err), Some(ThrottleError::DeadlineExceeded));
    assert!(start.elapsed() < Duration::from_millis(200), "{:?}", start.elapsed());
    Ok(())
}
