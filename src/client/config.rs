//! Publisher configuration

use std::time::Duration;

use crate::protocol::constants::RTMP_PORT;

/// Publisher configuration
///
/// A timeout of zero means "no deadline" for connect, handshake and ACK
/// waiting; writes fall back to a 60-second safety cap.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// RTMP server host
    pub host: String,

    /// RTMP server port
    pub port: u16,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Per-read timeout while waiting for S1 and S2 (applied twice)
    pub handshake_timeout: Duration,

    /// Deadline for handing one write to the OS
    pub write_timeout: Duration,

    /// How long a send may wait for the server to acknowledge the window
    pub ack_wait_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: RTMP_PORT,
            connect_timeout: Duration::from_millis(5000),
            handshake_timeout: Duration::from_millis(2500),
            write_timeout: Duration::from_millis(10_000),
            ack_wait_timeout: Duration::from_millis(5000),
            tcp_nodelay: true,
        }
    }
}

impl PublisherConfig {
    /// Create a config for the given server
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PublisherConfig::new("localhost", 1935);
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.write_timeout, Duration::from_millis(10_000));
        assert_eq!(config.ack_wait_timeout, Duration::from_millis(5000));
        assert!(config.tcp_nodelay);
    }
}
