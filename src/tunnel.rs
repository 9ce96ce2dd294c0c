//! Bidirectional byte pump between an already-handshaken client and backend.
//! Once the frontend has replayed the handshake, the proxy's only remaining
//! job is to move bytes until either side closes — and, per the no-half-close
//! rule, to bring the *other* direction down with it rather than let a still
//! talking peer keep the tunnel open.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy)]
pub struct TunnelStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Reads from `reader` and writes to `writer` in fixed-size chunks until EOF
/// or an I/O error, shutting `writer` down on a clean EOF. `counter` is
/// shared with the opposite direction's pump so bytes already moved are
/// still reflected in `TunnelStats` even if this pump is cancelled mid-flight
/// by the other direction finishing first.
async fn pump<R, W>(reader: &mut R, writer: &mut W, counter: &AtomicU64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Races both copy directions against each other. Minecraft sessions end
/// when either party disconnects, so the first direction to hit EOF or an
/// error wins the race; the still-running direction is dropped mid-read and
/// both sockets are shut down explicitly, instead of letting
/// `copy_bidirectional`-style independent completion keep the loser's
/// direction alive until it separately reaches EOF.
pub async fn run<C, B>(client: &mut C, backend: &mut B) -> std::io::Result<TunnelStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_r, mut client_w) = split(client);
    let (mut backend_r, mut backend_w) = split(backend);

    let up = AtomicU64::new(0);
    let down = AtomicU64::new(0);

    let result = tokio::select! {
        r = pump(&mut client_r, &mut backend_w, &up) => r,
        r = pump(&mut backend_r, &mut client_w, &down) => r,
    };

    let _ = backend_w.shutdown().await;
    let _ = client_w.shutdown().await;

    let stats = TunnelStats {
        client_to_backend: up.load(Ordering::Relaxed),
        backend_to_client: down.load(Ordering::Relaxed),
    };
    result.map(|_| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_bytes_both_ways_until_close() {
        let (mut client_local, mut client_remote) = duplex(64);
        let (mut backend_local, mut backend_remote) = duplex(64);

        let handle = tokio::spawn(async move { run(&mut client_local, &mut backend_local).await });

        client_remote.write_all(b"hello backend").await.unwrap();
        let mut from_client = [0u8; 13];
        backend_remote.read_exact(&mut from_client).await.unwrap();
        assert_eq!(&from_client, b"hello backend");

        backend_remote.write_all(b"hello client!").await.unwrap();
        let mut from_backend = [0u8; 13];
        client_remote.read_exact(&mut from_backend).await.unwrap();
        assert_eq!(&from_backend, b"hello client!");

        drop(client_remote);
        drop(backend_remote);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.client_to_backend, 13);
        assert_eq!(stats.backend_to_client, 13);
    }

    #[tokio::test]
    async fn client_disconnect_closes_tunnel_even_if_backend_keeps_sending() {
        let (mut client_local, client_remote) = duplex(64);
        let (mut backend_local, mut backend_remote) = duplex(1024);

        let handle = tokio::spawn(async move { run(&mut client_local, &mut backend_local).await });

        // Client vanishes immediately; the backend keeps talking as if
        // nothing happened. A half-close-tolerant implementation (e.g. plain
        // `copy_bidirectional`) would keep pumping backend->client data (or
        // at least keep the task alive) until the backend itself stops;
        // this tunnel must tear down both directions as soon as the client
        // side observes EOF.
        drop(client_remote);
        let sender = tokio::spawn(async move {
            let _ = backend_remote.write_all(b"still talking after client left").await;
            backend_remote
        });

        let stats = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("tunnel must close promptly once the client side is gone, not wait on the backend")
            .unwrap()
            .unwrap();

        assert_eq!(stats.client_to_backend, 0);
        let _ = sender.await;
    }
}
