//! Statistics for a publishing session

use std::time::Duration;

/// Point-in-time snapshot of a publishing session.
#[derive(Debug, Clone, Default)]
pub struct PublisherStats {
    /// Total bytes handed to the OS
    pub bytes_sent: u64,
    /// Bytes sent since the server's last acknowledgement
    pub bytes_sent_since_ack: u64,
    /// Total bytes read from the server
    pub bytes_received: u64,
    /// Video frames posted
    pub video_frames: u64,
    /// Audio frames posted
    pub audio_frames: u64,
    /// Keyframes posted
    pub keyframes: u64,
    /// Time since the session opened
    pub duration: Duration,
    /// Outbound bitrate estimate (bits/sec)
    pub bitrate: u64,
}

impl PublisherStats {
    /// Calculate the outbound bitrate from bytes and duration.
    pub fn send_bitrate(bytes_sent: u64, duration: Duration) -> u64 {
        let secs = duration.as_secs();
        if secs > 0 {
            (bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate() {
        assert_eq!(
            PublisherStats::send_bitrate(1_000_000, Duration::from_secs(8)),
            1_000_000
        );
        assert_eq!(PublisherStats::send_bitrate(1_000_000, Duration::ZERO), 0);
    }
}
