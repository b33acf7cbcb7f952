//! Serialized message writer with acknowledgement backpressure
//!
//! All outbound messages pass through here. The writer enforces:
//!
//! - the single-writer discipline: a compare-and-swap busy flag held for the
//!   whole message rejects a concurrent send with `Busy`, so chunks of one
//!   payload are never interleaved with anything else;
//! - ACK-window backpressure: once the bytes sent since the last server ACK
//!   exceed 1.2x the window, the send blocks until the window drains (the
//!   reader resets the counter on ACK) or the ACK-wait timeout fires.
//!   Continuation chunks of a payload already being sent never wait, they
//!   ride on the acquisition made for the whole message;
//! - per-write deadlines, via the timeout transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::client::session::SharedState;
use crate::client::transport::Transport;
use crate::error::{Error, Result};

/// Poll cadence while waiting on the ACK window
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The connection's single writer.
pub struct MessageWriter {
    transport: Arc<Transport>,
    shared: Arc<SharedState>,
    busy: AtomicBool,
}

impl MessageWriter {
    pub fn new(transport: Arc<Transport>, shared: Arc<SharedState>) -> Self {
        Self {
            transport,
            shared,
            busy: AtomicBool::new(false),
        }
    }

    /// Send one message serialized as a single buffer.
    pub async fn send(&self, message: Bytes) -> Result<()> {
        self.transmit(std::slice::from_ref(&message)).await
    }

    /// Send one message serialized as multiple chunks.
    ///
    /// The chunks go out back to back under one busy acquisition; the ACK
    /// window is checked once, before the first chunk.
    pub async fn send_chunked(&self, chunks: &[Bytes]) -> Result<()> {
        self.transmit(chunks).await
    }

    /// The reader observed a server ACK.
    pub fn on_ack(&self, bytes_received: u32) {
        tracing::debug!(
            bytes_received = bytes_received,
            since_ack = self.shared.bytes_sent_since_ack.load(Ordering::SeqCst),
            total = self.shared.bytes_sent_total.load(Ordering::SeqCst),
            "ack received from server"
        );
        self.shared.on_ack();
    }

    async fn transmit(&self, chunks: &[Bytes]) -> Result<()> {
        self.wait_for_ack_window().await?;

        let _guard = self.acquire()?;
        for chunk in chunks {
            let len = chunk.len() as u64;
            self.transport
                .write(chunk.clone(), self.shared.write_timeout())
                .await?;
            self.shared.bytes_sent_total.fetch_add(len, Ordering::SeqCst);
            self.shared
                .bytes_sent_since_ack
                .fetch_add(len, Ordering::SeqCst);
        }
        Ok(())
    }

    fn acquire(&self) -> Result<BusyGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(BusyGuard(&self.busy))
    }

    /// Block until the server has acknowledged enough of the window.
    ///
    /// The 1.2 multiplier gives the server a bit of latency headroom before
    /// the stream is cut off.
    async fn wait_for_ack_window(&self) -> Result<()> {
        let window = self.shared.ack_window_out();
        let sent = self.shared.bytes_sent_since_ack.load(Ordering::SeqCst);
        if (sent as f64) < window as f64 * 1.2 {
            return Ok(());
        }

        tracing::debug!(sent = sent, window = window, "waiting for ack");

        let timeout = self.shared.ack_wait_timeout();
        let started = Instant::now();
        loop {
            if self.shared.bytes_sent_since_ack.load(Ordering::SeqCst) < window {
                return Ok(());
            }
            if !timeout.is_zero() && started.elapsed() >= timeout {
                return Err(Error::AckTimeout);
            }
            tokio::time::sleep(ACK_POLL_INTERVAL).await;
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
