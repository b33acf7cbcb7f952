//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0/C1/C2 against S0/S1/S2)
//! - Chunk header packing, message framing and deframing
//! - Message parsing and control payload encoding

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{InboundMessage, MessageDeframer};
pub use message::{Command, DataMessage, ServerMessage};
