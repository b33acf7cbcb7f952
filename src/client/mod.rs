//! RTMP publishing client
//!
//! The pieces of the publish path:
//! - [`transport`]: TCP wrapper with per-write deadlines
//! - [`writer`]: serialized sender with ACK-window backpressure
//! - [`reader`]: task that parses and dispatches server messages
//! - [`session`]: state shared between the application and reader tasks
//! - [`publisher`]: the public controller tying it all together

pub mod config;
pub mod listener;
pub mod publisher;
pub(crate) mod reader;
pub mod session;
pub mod transport;
pub mod writer;

pub use config::PublisherConfig;
pub use listener::ConnectionListener;
pub use publisher::RtmpPublisher;
