//! Media handling for the publish path
//!
//! This module provides:
//! - FLV payload envelopes for RTMP AUDIO/VIDEO messages
//! - H.264 parameter-set extraction and the AVC decoder configuration record
//! - The AAC descriptor byte derived from the stream's audio header
//! - The frame types the publisher accepts from its media sources

pub mod aac;
pub mod flv;
pub mod h264;

pub use aac::{AacFrame, AacHeader};
pub use flv::StreamDataFrame;
pub use h264::H264Frame;
