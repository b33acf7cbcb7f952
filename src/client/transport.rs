//! Timeout transport
//!
//! Wraps a `TcpStream` so every write carries a wall-clock deadline: either
//! the bytes are fully handed to the OS before the deadline, or the write
//! fails with `WriteTimeout`. Writes are funnelled through a dedicated writer
//! task; the caller enqueues one buffer and awaits its completion through a
//! oneshot. Closing the transport aborts the writer task, which also unblocks
//! a writer stuck against a full socket buffer.
//!
//! The read half is handed back to the caller: the handshake reads exact
//! frames from it, then the reader task owns it for the rest of the session.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Fallback deadline applied when the configured write timeout is zero
const WRITE_TIMEOUT_CAP: Duration = Duration::from_secs(60);

struct WriteRequest {
    data: Bytes,
    done: oneshot::Sender<io::Result<()>>,
}

/// Write side of the connection, owned by a dedicated task.
pub struct Transport {
    tx: mpsc::Sender<WriteRequest>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Transport {
    /// Connect to the server, applying the connect timeout, and split the
    /// stream into the writer task and the raw read half.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        tcp_nodelay: bool,
    ) -> Result<(Self, OwnedReadHalf)> {
        let connect = TcpStream::connect((host, port));
        let stream = if connect_timeout.is_zero() {
            connect.await?
        } else {
            timeout(connect_timeout, connect)
                .await
                .map_err(|_| {
                    Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    ))
                })??
        };

        if tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let (read_half, write_half) = stream.into_split();

        // Capacity 1: the single-writer discipline means at most one request
        // is ever in flight.
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(write_loop(write_half, rx));

        Ok((
            Self {
                tx,
                writer_task: Mutex::new(Some(task)),
                closed: AtomicBool::new(false),
            },
            read_half,
        ))
    }

    /// Hand one buffer to the OS before the deadline elapses.
    ///
    /// A zero deadline falls back to the 60-second safety cap.
    pub async fn write(&self, data: Bytes, deadline: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let deadline = if deadline.is_zero() {
            WRITE_TIMEOUT_CAP
        } else {
            deadline
        };

        let (done_tx, done_rx) = oneshot::channel();
        let request = WriteRequest {
            data,
            done: done_tx,
        };

        let write = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| Error::ConnectionClosed)?;
            match done_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(_) => Err(Error::ConnectionClosed),
            }
        };

        timeout(deadline, write)
            .await
            .map_err(|_| Error::WriteTimeout)?
    }

    /// Close the transport, cancelling any blocked write.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.writer_task.lock().unwrap().take() {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(request) = rx.recv().await {
        let result = async {
            write_half.write_all(&request.data).await?;
            write_half.flush().await
        }
        .await;

        let failed = result.is_err();
        let _ = request.done.send(result);
        if failed {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn transport_pair() -> (Transport, OwnedReadHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let (transport, read_half) =
            Transport::connect("127.0.0.1", addr.port(), Duration::from_secs(5), true)
                .await
                .unwrap();
        let server = accept.await.unwrap();
        (transport, read_half, server)
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (transport, _read, mut server) = transport_pair().await;

        transport
            .write(Bytes::from_static(b"hello"), Duration::from_secs(5))
            .await
            .unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (transport, _read, _server) = transport_pair().await;
        transport.close();

        let err = transport
            .write(Bytes::from_static(b"x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Transport::connect("127.0.0.1", port, Duration::from_secs(2), true)
            .await
            .err()
            .expect("connect must fail");
        assert!(matches!(err, Error::Io(_)));
    }
}
