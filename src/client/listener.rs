//! Connection event listener

use crate::error::Error;

/// Listener for connection events, invoked from the reader task.
///
/// `on_connection_error` only reports failures detected while reading from
/// the server; errors on the write path are returned from the method that
/// performed the write.
#[async_trait::async_trait]
pub trait ConnectionListener: Send + Sync {
    /// The handshake completed and the server accepted `connect`. Call
    /// [`crate::RtmpPublisher::create_stream`] to continue.
    async fn on_connected(&self);

    /// The stream exists server-side and `publish` was accepted; media can
    /// be posted now.
    async fn on_ready_to_publish(&self);

    /// The session died while reading from the server. The publisher has
    /// already been torn down when this fires.
    async fn on_connection_error(&self, error: Error);
}
