//! Session state shared between the application task and the reader task
//!
//! The reader performs the state transitions driven by server responses while
//! the application task checks preconditions and posts media, so the session
//! lives behind atomics. The pending-ACK and pending-ping values follow the
//! single-writer/single-reader pattern: the reader stores the value, then
//! raises the flag; the sender lowers the flag, then reads the value.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::client::config::PublisherConfig;
use crate::protocol::constants::{DEFAULT_ACK_WINDOW_SIZE, DEFAULT_INBOUND_CHUNK_SIZE};

/// Publishing controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Terminal / initial state
    Stopped = 0,
    /// Transport open, handshake in progress
    Connecting = 1,
    /// `connect` sent, waiting for its `_result`
    AwaitingConnect = 2,
    /// `NetConnection.Connect.Success` received
    Connected = 3,
    /// `createStream` sent, waiting for its `_result`
    AwaitingStream = 4,
    /// `publish` sent, waiting for `onStatus`
    PublishSent = 5,
    /// `NetStream.Publish.Start` received, media may flow
    Streaming = 6,
}

impl SessionState {
    fn from_u8(value: u8) -> SessionState {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::AwaitingConnect,
            3 => SessionState::Connected,
            4 => SessionState::AwaitingStream,
            5 => SessionState::PublishSent,
            6 => SessionState::Streaming,
            _ => SessionState::Stopped,
        }
    }
}

/// No peer-bandwidth message seen yet
const LIMIT_TYPE_NONE: u8 = u8::MAX;

/// State shared across the application, writer and reader tasks.
pub struct SharedState {
    state: AtomicU8,

    /// Bytes handed to the OS since the connection opened
    pub bytes_sent_total: AtomicU64,
    /// Bytes handed to the OS since the last server ACK
    pub bytes_sent_since_ack: AtomicU64,
    /// Bytes read off the socket (statistics)
    pub bytes_read_total: AtomicU64,

    /// Outbound ACK window; the server adjusts it via peer-bandwidth messages
    ack_window_out: AtomicU64,
    /// Chunk size the server announced for its own messages
    chunk_size_in: AtomicU32,
    /// Message stream ID assigned by `createStream`
    stream_id: AtomicU32,
    /// Last peer-bandwidth limit type, LIMIT_TYPE_NONE before the first one
    limit_type: AtomicU8,

    /// Live-updatable timeouts, in milliseconds (0 = no deadline)
    write_timeout_ms: AtomicU64,
    ack_wait_timeout_ms: AtomicU64,

    should_send_ack: AtomicBool,
    bytes_read_for_ack: AtomicU64,
    should_send_ping_response: AtomicBool,
    ping_timestamp: AtomicU32,

    playpath: Mutex<Option<String>>,

    /// Frame counters (statistics)
    pub video_frames: AtomicU64,
    pub audio_frames: AtomicU64,
    pub keyframes: AtomicU64,

    started_at: Instant,
}

impl SharedState {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            state: AtomicU8::new(SessionState::Stopped as u8),
            bytes_sent_total: AtomicU64::new(0),
            bytes_sent_since_ack: AtomicU64::new(0),
            bytes_read_total: AtomicU64::new(0),
            ack_window_out: AtomicU64::new(DEFAULT_ACK_WINDOW_SIZE as u64),
            chunk_size_in: AtomicU32::new(DEFAULT_INBOUND_CHUNK_SIZE),
            stream_id: AtomicU32::new(0),
            limit_type: AtomicU8::new(LIMIT_TYPE_NONE),
            write_timeout_ms: AtomicU64::new(config.write_timeout.as_millis() as u64),
            ack_wait_timeout_ms: AtomicU64::new(config.ack_wait_timeout.as_millis() as u64),
            should_send_ack: AtomicBool::new(false),
            bytes_read_for_ack: AtomicU64::new(0),
            should_send_ping_response: AtomicBool::new(false),
            ping_timestamp: AtomicU32::new(0),
            playpath: Mutex::new(None),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn ack_window_out(&self) -> u64 {
        self.ack_window_out.load(Ordering::SeqCst)
    }

    pub fn set_ack_window_out(&self, window: u64) {
        self.ack_window_out.store(window, Ordering::SeqCst);
    }

    pub fn on_ack(&self) {
        self.bytes_sent_since_ack.store(0, Ordering::SeqCst);
    }

    pub fn chunk_size_in(&self) -> u32 {
        self.chunk_size_in.load(Ordering::SeqCst)
    }

    pub fn set_chunk_size_in(&self, size: u32) {
        self.chunk_size_in.store(size, Ordering::SeqCst);
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id.load(Ordering::SeqCst)
    }

    pub fn set_stream_id(&self, id: u32) {
        self.stream_id.store(id, Ordering::SeqCst);
    }

    /// The previous limit type, if any peer-bandwidth message arrived before.
    pub fn limit_type(&self) -> Option<u8> {
        match self.limit_type.load(Ordering::SeqCst) {
            LIMIT_TYPE_NONE => None,
            t => Some(t),
        }
    }

    pub fn set_limit_type(&self, limit: u8) {
        self.limit_type.store(limit, Ordering::SeqCst);
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.load(Ordering::SeqCst))
    }

    pub fn set_write_timeout(&self, timeout: Duration) {
        self.write_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn ack_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_wait_timeout_ms.load(Ordering::SeqCst))
    }

    pub fn set_ack_wait_timeout(&self, timeout: Duration) {
        self.ack_wait_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    /// Reader side: note that an ACK must precede the next media payload.
    pub fn request_ack(&self, bytes_read: u64) {
        self.bytes_read_for_ack.store(bytes_read, Ordering::SeqCst);
        self.should_send_ack.store(true, Ordering::SeqCst);
    }

    /// Sender side: claim the pending ACK, if one is due.
    pub fn take_ack_request(&self) -> Option<u64> {
        if self
            .should_send_ack
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(self.bytes_read_for_ack.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Reader side: note that a ping response must precede the next payload.
    pub fn request_ping_response(&self, timestamp: u32) {
        self.ping_timestamp.store(timestamp, Ordering::SeqCst);
        self.should_send_ping_response.store(true, Ordering::SeqCst);
    }

    /// Sender side: claim the pending ping response, if one is due.
    pub fn take_ping_request(&self) -> Option<u32> {
        if self
            .should_send_ping_response
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(self.ping_timestamp.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    pub fn set_playpath(&self, playpath: &str) {
        *self.playpath.lock().unwrap() = Some(playpath.to_string());
    }

    pub fn playpath(&self) -> Option<String> {
        self.playpath.lock().unwrap().clone()
    }

    pub fn clear_playpath(&self) {
        *self.playpath.lock().unwrap() = None;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedState {
        SharedState::new(&PublisherConfig::new("localhost", 1935))
    }

    #[test]
    fn test_state_transitions() {
        let s = shared();
        assert_eq!(s.state(), SessionState::Stopped);
        s.set_state(SessionState::Streaming);
        assert_eq!(s.state(), SessionState::Streaming);
    }

    #[test]
    fn test_ack_request_is_claimed_once() {
        let s = shared();
        assert!(s.take_ack_request().is_none());

        s.request_ack(1234);
        assert_eq!(s.take_ack_request(), Some(1234));
        assert!(s.take_ack_request().is_none());
    }

    #[test]
    fn test_ping_request_is_claimed_once() {
        let s = shared();
        s.request_ping_response(42);
        assert_eq!(s.take_ping_request(), Some(42));
        assert!(s.take_ping_request().is_none());
    }

    #[test]
    fn test_ack_resets_counter() {
        let s = shared();
        s.bytes_sent_since_ack.store(999, Ordering::SeqCst);
        s.on_ack();
        assert_eq!(s.bytes_sent_since_ack.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_limit_type_starts_unset() {
        let s = shared();
        assert!(s.limit_type().is_none());
        s.set_limit_type(0);
        assert_eq!(s.limit_type(), Some(0));
    }
}
