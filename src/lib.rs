//! rtmp-mux: RTMP publishing client
//!
//! A one-way muxer that connects to an RTMP (version 3) server, performs the
//! handshake, negotiates chunk parameters, opens a publishing stream and
//! transmits H.264 video and AAC audio frames together with metadata.
//!
//! Strictly a publisher: no playback, no server role, no relay, no
//! transcoding.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_mux::{ConnectionListener, Error, MonotonicClock, RtmpPublisher};
//!
//! struct Listener;
//!
//! #[async_trait::async_trait]
//! impl ConnectionListener for Listener {
//!     async fn on_connected(&self) {
//!         println!("connected, call create_stream next");
//!     }
//!
//!     async fn on_ready_to_publish(&self) {
//!         println!("publishing accepted, media can flow");
//!     }
//!
//!     async fn on_connection_error(&self, error: Error) {
//!         eprintln!("connection lost: {}", error);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = Arc::new(MonotonicClock::new());
//!     let mut publisher = RtmpPublisher::new("localhost", 1935, clock);
//!     publisher.start(Arc::new(Listener), "live", None, None).await?;
//!     // create_stream / post_video / post_audio once the listener fires
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod clock;
pub mod error;
pub mod media;
pub mod protocol;
pub mod stats;

// Re-export main types for convenience
pub use client::config::PublisherConfig;
pub use client::listener::ConnectionListener;
pub use client::publisher::RtmpPublisher;
pub use clock::{Clock, MonotonicClock};
pub use error::{Error, Result};
pub use media::{AacFrame, AacHeader, H264Frame, StreamDataFrame};
pub use stats::PublisherStats;
