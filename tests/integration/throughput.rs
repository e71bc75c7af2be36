use crate::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

/// No limits: a megabyte crosses loopback without measurable delay.
#[tokio::test]
async fn test_unlimited_is_passthrough() -> Result<()> {
    let (listener, addr) = bind(None::<u64>, None::<u64>).await?;
    let (mut server, client) = connect_pair(&listener, addr).await?;
    let reader = drain(client);

    let start = Instant::now();
    server.write_all(&vec![0xabu8; 1 << 20]).await?;
    server.shutdown().await?;
    assert_eq!(reader.await??, 1 << 20);
    assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
    Ok(())
}

/// 20 B/s per connection, one 50-byte write: 20 from the burst, 30 more at 20 B/s.
#[tokio::test]
async fn test_per_conn_limit_single_write() -> Result<()> {
    let (listener, addr) = bind(None::<u64>, 20u64).await?;
    let (mut server, client) = connect_pair(&listener, addr).await?;
    let reader = drain(client);

    let start = Instant::now();
    server.write_all(&[1u8; 50]).await?;
    let elapsed = start.elapsed();
    server.shutdown().await?;

    assert_eq!(reader.await??, 50);
    assert_between(elapsed, 1.45, 3.0);
    Ok(())
}

/// 100 B/s global over 5 connections, two 100-byte writes each: 1000 bytes
/// against a 100-byte burst is at least 9 seconds in aggregate.
#[tokio::test]
async fn test_global_limit_bounds_aggregate() -> Result<()> {
    let (listener, addr) = bind(100u64, None::<u64>).await?;

    let mut pairs = Vec::new();
    for _ in 0..5 {
        pairs.push(connect_pair(&listener, addr).await?);
    }

    let start = Instant::now();
    let mut writers = Vec::new();
    let mut readers = Vec::new();
    for (mut server, client) in pairs {
        readers.push(drain(client));
        writers.push(tokio::spawn(async move {
            for _ in 0..2 {
                server.write_all(&[2u8; 100]).await?;
            }
            server.shutdown().await
        }));
    }
    for w in writers {
        w.await??;
    }
    let elapsed = start.elapsed();

    let mut total = 0;
    for r in readers {
        total += r.await??;
    }
    assert_eq!(total, 1000);
    assert_between(elapsed, 8.9, 11.0);
    Ok(())
}

/// Reads are charged for the buffer offered, so a slow reader paces a fast writer.
#[tokio::test]
async fn test_read_side_is_throttled() -> Result<()> {
    let (listener, addr) = bind(None::<u64>, 10u64).await?;
    let (mut server, mut client) = connect_pair(&listener, addr).await?;

    client.write_all(&[3u8; 30]).await?;
    client.shutdown().await?;

    let start = Instant::now();
    let mut got = 0;
    let mut buf = [0u8; 10];
    loop {
        let n = server.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        got += n;
    }
    assert_eq!(got, 30);
    // 10 from the burst, then 10 per second for each later call, EOF included.
    assert!(start.elapsed() >= Duration::from_millis(1900), "{:?}", start.elapsed());
    Ok(())
}
