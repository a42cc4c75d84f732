//! Byte-stream access to the sensor board.
//!
//! The board presents a serial-like link bridged onto a stream socket.
//! The pipeline only needs poll-style reads and the ability to write raw
//! control commands back over the same link, so that seam is a trait and
//! the TCP implementation lives behind it.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Non-blocking byte-stream access to the sensor peer.
#[async_trait]
pub trait ByteSource: Send {
    /// Read available bytes into `buf`.
    ///
    /// Poll semantics: returns `Ok(0)` when nothing is available instead
    /// of blocking. A closed peer is an error, not a zero-length read.
    async fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write a raw control command to the peer over the same link.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Release the underlying transport.
    async fn close(&mut self) -> io::Result<()>;
}

/// [`ByteSource`] over a TCP connection to the bridged sensor board.
pub struct TcpByteSource {
    stream: TcpStream,
    peer: String,
}

impl TcpByteSource {
    /// Connect to the sensor bridge at `addr` (`host:port`).
    pub async fn connect(addr: &str, timeout: Duration) -> io::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out connecting to {addr}"),
                )
            })??;
        info!(peer = %addr, "connected to sensor bridge");

        Ok(Self {
            stream,
            peer: addr.to_string(),
        })
    }
}

#[async_trait]
impl ByteSource for TcpByteSource {
    async fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.try_read(buf) {
            // a successful zero-length read on TCP means the peer closed
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("sensor bridge {} closed the connection", self.peer),
            )),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        debug!(peer = %self.peer, "closing sensor bridge connection");
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_polls_without_blocking() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"O3,40,20,t,SN123!").await.unwrap();
            // hold the socket open so the client sees quiet, not EOF
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut source = TcpByteSource::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let mut received = Vec::new();
        // poll until the payload has arrived
        for _ in 0..50 {
            let n = source.read_into(&mut buf).await.unwrap();
            if n > 0 {
                received.extend_from_slice(&buf[..n]);
                if received.len() >= 17 {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        assert_eq!(&received, b"O3,40,20,t,SN123!");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (peer, _) = listener.accept().await.unwrap();
            drop(peer);
        });

        let mut source = TcpByteSource::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        server.await.unwrap();

        let mut buf = [0u8; 16];
        // keep polling until the close is observed
        let mut saw_error = false;
        for _ in 0..100 {
            match source.read_into(&mut buf).await {
                Err(e) => {
                    assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
                    saw_error = true;
                    break;
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8];
            peer.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut source = TcpByteSource::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        ByteSource::write_all(&mut source, b"shutdown").await.unwrap();

        assert_eq!(server.await.unwrap(), b"shutdown");
    }
}
