//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// RTMP version number (always 3 for standard RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Handshake packet size (C1/C2/S1/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// Outbound chunk size, announced via SET_CHUNK_SIZE right after the handshake
pub const OUTBOUND_CHUNK_SIZE: u32 = 4096;

/// Inbound chunk size before the server announces one (per RTMP spec)
pub const DEFAULT_INBOUND_CHUNK_SIZE: u32 = 128;

/// Default acknowledgement window, in both directions
pub const DEFAULT_ACK_WINDOW_SIZE: u32 = 5_000_000;

// ============================================================================
// Chunk Stream IDs (CSID)
// This publisher emits on four fixed chunk streams.
// ============================================================================

/// Protocol control and command messages
pub const CSID_CONTROL: u8 = 2;

/// Audio data
pub const CSID_AUDIO: u8 = 8;

/// Video data
pub const CSID_VIDEO: u8 = 9;

/// AMF0 data messages (metadata)
pub const CSID_DATA: u8 = 18;

/// Message stream ID carried by control and connection-level command messages
pub const CONTROL_STREAM_ID: u32 = 0;

// ============================================================================
// Message Type IDs
// ============================================================================

/// Set Chunk Size (1)
pub const MSG_SET_CHUNK_SIZE: u8 = 1;

/// Acknowledgement (3)
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;

/// User Control Message (4)
pub const MSG_USER_CONTROL: u8 = 4;

/// Window Acknowledgement Size (5)
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;

/// Set Peer Bandwidth (6)
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;

/// Audio Message (8)
pub const MSG_AUDIO: u8 = 8;

/// Video Message (9)
pub const MSG_VIDEO: u8 = 9;

/// AMF0 Data Message (18) - @setDataFrame, onTextData
pub const MSG_DATA_AMF0: u8 = 18;

/// AMF0 Command Message (20) - connect, createStream, publish, ...
pub const MSG_COMMAND_AMF0: u8 = 20;

// ============================================================================
// User Control Event Types
// ============================================================================

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_STREAM_DRY: u16 = 2;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_STREAM_IS_RECORDED: u16 = 4;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

// ============================================================================
// Peer Bandwidth Limit Types
// ============================================================================

/// The peer SHOULD limit its output bandwidth to the indicated window size
pub const BANDWIDTH_LIMIT_HARD: u8 = 0;

/// Limit output to the indicated window or the one in effect, whichever is smaller
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;

/// Hard if the previous limit was hard, otherwise ignored
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// ============================================================================
// Command Names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_PUBLISH: &str = "publish";

/// Server response commands
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";

/// Data message handlers
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";
pub const CMD_ON_TEXT_DATA: &str = "onTextData";

/// Publishing type sent with the publish command
pub const PUBLISH_TYPE_LIVE: &str = "live";

// ============================================================================
// Transaction IDs
// ============================================================================

/// `connect` always uses transaction ID 1
pub const TID_CONNECT: f64 = 1.0;

/// `createStream` uses a fixed transaction ID so the `_result` can be matched
pub const TID_CREATE_STREAM: f64 = 10.0;

/// `publish`, `deleteStream` and `onStatus` carry transaction ID 0
pub const TID_STREAM_COMMAND: f64 = 0.0;

// ============================================================================
// Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_PREFIX: &str = "NetConnection.Connect";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_PREFIX: &str = "NetStream.Publish";
