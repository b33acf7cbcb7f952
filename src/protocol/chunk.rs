//! RTMP chunk stream codec
//!
//! Outbound messages are serialized into chunks; inbound bytes are
//! reassembled into whole messages.
//!
//! ```text
//! Chunk Format:
//! +-------------+------------------+-------------------+
//! | Basic Header| Message Header   | Chunk Data        |
//! | (1 byte)    | (0,3,7,11 bytes) | (variable)        |
//! +-------------+------------------+-------------------+
//!
//! Basic Header: fmt(2 bits) + csid(6 bits), csid 2-63 only
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4, LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (continuation, previous chunk's values)
//! ```
//!
//! The extended basic header forms (csid 64+) and the extended timestamp word
//! are not implemented; timestamps are truncated to 24 bits.
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::message::ServerMessageKind;

/// Byte length of a full type-0 chunk header (basic header included)
pub const TYPE0_HEADER_SIZE: usize = 12;

/// Byte length of a type-1 chunk header (basic header included)
pub const TYPE1_HEADER_SIZE: usize = 8;

fn check_chunk_stream_id(csid: u8) -> Result<()> {
    if !(2..=63).contains(&csid) {
        return Err(Error::InvalidArgument(format!(
            "chunk stream ID must be in [2, 63], got {}",
            csid
        )));
    }
    Ok(())
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u8) {
    buf.put_u8((fmt << 6) | (csid & 0x3F));
}

fn write_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

/// Write a type-0 header: absolute timestamp, length, type, stream ID.
pub fn write_type0_header(
    buf: &mut BytesMut,
    csid: u8,
    timestamp: u32,
    length: u32,
    msg_type: u8,
    stream_id: u32,
) -> Result<()> {
    check_chunk_stream_id(csid)?;
    write_basic_header(buf, 0, csid);
    write_u24(buf, timestamp & 0xFF_FFFF);
    write_u24(buf, length);
    buf.put_u8(msg_type);
    buf.put_u32_le(stream_id);
    Ok(())
}

/// Write a type-1 header: timestamp delta, length, type (stream ID inherited).
pub fn write_type1_header(
    buf: &mut BytesMut,
    csid: u8,
    timestamp_delta: u32,
    length: u32,
    msg_type: u8,
) -> Result<()> {
    check_chunk_stream_id(csid)?;
    write_basic_header(buf, 1, csid);
    write_u24(buf, timestamp_delta & 0xFF_FFFF);
    write_u24(buf, length);
    buf.put_u8(msg_type);
    Ok(())
}

/// Write a type-2 header: timestamp delta only.
pub fn write_type2_header(buf: &mut BytesMut, csid: u8, timestamp_delta: u32) -> Result<()> {
    check_chunk_stream_id(csid)?;
    write_basic_header(buf, 2, csid);
    write_u24(buf, timestamp_delta & 0xFF_FFFF);
    Ok(())
}

/// Write a type-3 header: the basic byte alone, continuing the previous chunk.
pub fn write_type3_header(buf: &mut BytesMut, csid: u8) -> Result<()> {
    check_chunk_stream_id(csid)?;
    write_basic_header(buf, 3, csid);
    Ok(())
}

/// Serialize a message that fits a single type-0 chunk.
///
/// Control messages, commands, sequence headers and metadata all travel this
/// way; their payloads stay well under the chunk size.
pub fn frame_type0_message(
    csid: u8,
    timestamp: u32,
    msg_type: u8,
    stream_id: u32,
    payload: &[u8],
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(TYPE0_HEADER_SIZE + payload.len());
    write_type0_header(
        &mut buf,
        csid,
        timestamp,
        payload.len() as u32,
        msg_type,
        stream_id,
    )?;
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Serialize a media payload as a type-1 chunk followed by type-3
/// continuations.
///
/// The first chunk carries the timestamp delta and the total message length
/// plus up to `chunk_size` payload bytes; each continuation carries a single
/// basic-header byte plus up to `chunk_size` more. The concatenation of the
/// chunk payloads is the original payload, byte for byte.
pub fn frame_media_message(
    csid: u8,
    timestamp_delta: u32,
    msg_type: u8,
    payload: &[u8],
    chunk_size: usize,
) -> Result<Vec<Bytes>> {
    let first_len = payload.len().min(chunk_size);
    let mut chunks = Vec::with_capacity(1 + payload.len().saturating_sub(first_len) / chunk_size);

    let mut first = BytesMut::with_capacity(TYPE1_HEADER_SIZE + first_len);
    write_type1_header(
        &mut first,
        csid,
        timestamp_delta,
        payload.len() as u32,
        msg_type,
    )?;
    first.put_slice(&payload[..first_len]);
    chunks.push(first.freeze());

    let mut offset = first_len;
    while offset < payload.len() {
        let len = chunk_size.min(payload.len() - offset);
        let mut cont = BytesMut::with_capacity(1 + len);
        write_type3_header(&mut cont, csid)?;
        cont.put_slice(&payload[offset..offset + len]);
        chunks.push(cont.freeze());
        offset += len;
    }

    Ok(chunks)
}

/// A whole message read off the wire.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub kind: ServerMessageKind,
    pub timestamp: u32,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Reassembles inbound bytes into whole messages.
///
/// Servers talking to a publisher send every message as a single type-0 chunk
/// on chunk stream 2, 3 or 5, so the decoder expects exactly that framing:
/// any other basic header byte is a protocol error. Incomplete input leaves
/// the buffer untouched and returns `None` so the caller can read more.
///
/// The deframer also keeps the inbound acknowledgement accounting: each
/// delivered message adds `length + 12` to the running counter, and once it
/// reaches the window announced by the server an ACK becomes due.
pub struct MessageDeframer {
    ack_window: u64,
    bytes_since_ack: u64,
    ack_due: Option<u64>,
}

impl MessageDeframer {
    pub fn new() -> Self {
        Self {
            ack_window: DEFAULT_ACK_WINDOW_SIZE as u64,
            bytes_since_ack: 0,
            ack_due: None,
        }
    }

    /// Update the window after a WINDOW_ACK_SIZE from the server.
    pub fn set_ack_window(&mut self, window: u32) {
        self.ack_window = window as u64;
    }

    /// Credit bytes read outside the chunk stream (the handshake).
    pub fn record_raw_bytes(&mut self, n: u64) {
        self.bytes_since_ack += n;
    }

    /// Take the pending acknowledgement value, if the window was reached.
    pub fn take_ack_due(&mut self) -> Option<u64> {
        self.ack_due.take()
    }

    /// Try to decode one complete message from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed; nothing is consumed in
    /// that case. Messages of unknown type are skipped whole.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<InboundMessage>> {
        loop {
            if buf.is_empty() {
                return Ok(None);
            }

            let basic = buf[0];
            // fmt 0 with csid 2, 3 or 5: the only framing a publisher's peer
            // uses. Anything else means we lost chunk sync.
            if basic != 2 && basic != 3 && basic != 5 {
                return Err(ProtocolError::BadFraming(basic).into());
            }

            if buf.len() < TYPE0_HEADER_SIZE {
                return Ok(None);
            }

            let length = ((buf[4] as usize) << 16) | ((buf[5] as usize) << 8) | buf[6] as usize;
            if buf.len() < TYPE0_HEADER_SIZE + length {
                return Ok(None);
            }

            buf.advance(1);
            let timestamp = buf.get_uint(3) as u32;
            buf.advance(3); // length, already peeked
            let type_id = buf.get_u8();
            let stream_id = buf.get_u32_le();
            let payload = buf.copy_to_bytes(length);

            let kind = match ServerMessageKind::from_u8(type_id) {
                Some(kind) => kind,
                None => {
                    tracing::warn!(type_id = type_id, length = length, "unknown message type, skipping");
                    continue;
                }
            };

            self.bytes_since_ack += (length + TYPE0_HEADER_SIZE) as u64;
            if self.bytes_since_ack >= self.ack_window {
                self.ack_due = Some(self.bytes_since_ack);
                self.bytes_since_ack = 0;
            }

            return Ok(Some(InboundMessage {
                kind,
                timestamp,
                stream_id,
                payload,
            }));
        }
    }
}

impl Default for MessageDeframer {
    fn default() -> Self {
        Self::new()
    }
}
