//! RTMP message types: inbound parsing and outbound payload encoding
//!
//! A publisher's peer sends protocol control messages (types 1, 3, 4, 5, 6)
//! and AMF0 commands (type 20). Outbound, the publisher adds audio/video
//! (8, 9) and AMF0 data (18) messages, whose payloads are built by the media
//! layer.
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, Amf0Encoder, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::InboundMessage;
use crate::protocol::constants::*;

/// Message types a publisher's peer sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessageKind {
    SetChunkSize,
    Acknowledgement,
    UserControl,
    WindowAckSize,
    SetPeerBandwidth,
    Command,
}

impl ServerMessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            MSG_SET_CHUNK_SIZE => Some(ServerMessageKind::SetChunkSize),
            MSG_ACKNOWLEDGEMENT => Some(ServerMessageKind::Acknowledgement),
            MSG_USER_CONTROL => Some(ServerMessageKind::UserControl),
            MSG_WINDOW_ACK_SIZE => Some(ServerMessageKind::WindowAckSize),
            MSG_SET_PEER_BANDWIDTH => Some(ServerMessageKind::SetPeerBandwidth),
            MSG_COMMAND_AMF0 => Some(ServerMessageKind::Command),
            _ => None,
        }
    }
}

/// Peer bandwidth limit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBandwidthLimit {
    /// Limit output bandwidth to the indicated window size
    Hard,
    /// Limit output to the indicated window or the current one, whichever is smaller
    Soft,
    /// Hard if the previous limit was hard, otherwise ignore
    Dynamic,
}

impl PeerBandwidthLimit {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            BANDWIDTH_LIMIT_HARD => Some(PeerBandwidthLimit::Hard),
            BANDWIDTH_LIMIT_SOFT => Some(PeerBandwidthLimit::Soft),
            BANDWIDTH_LIMIT_DYNAMIC => Some(PeerBandwidthLimit::Dynamic),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PeerBandwidthLimit::Hard => BANDWIDTH_LIMIT_HARD,
            PeerBandwidthLimit::Soft => BANDWIDTH_LIMIT_SOFT,
            PeerBandwidthLimit::Dynamic => BANDWIDTH_LIMIT_DYNAMIC,
        }
    }
}

/// User control event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
}

/// RTMP command (connect, createStream, publish, _result, onStatus, ...)
#[derive(Debug, Clone)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID
    pub transaction_id: f64,
    /// Command object (null for most responses)
    pub command_object: AmfValue,
    /// Additional values after the command object
    pub arguments: Vec<AmfValue>,
}

impl Command {
    /// The `connect` command: transaction ID 1 and a command object carrying
    /// `app` plus the optional tcUrl / pageUrl.
    pub fn connect(app: &str, server_url: Option<&str>, page_url: Option<&str>) -> Self {
        let mut obj = std::collections::HashMap::new();
        obj.insert("app".to_string(), AmfValue::String(app.to_string()));
        if let Some(url) = server_url {
            obj.insert("tcUrl".to_string(), AmfValue::String(url.to_string()));
        }
        if let Some(url) = page_url {
            obj.insert("pageUrl".to_string(), AmfValue::String(url.to_string()));
        }

        Command {
            name: CMD_CONNECT.to_string(),
            transaction_id: TID_CONNECT,
            command_object: AmfValue::Object(obj),
            arguments: vec![],
        }
    }

    /// The `createStream` command with its fixed transaction ID.
    pub fn create_stream() -> Self {
        Command {
            name: CMD_CREATE_STREAM.to_string(),
            transaction_id: TID_CREATE_STREAM,
            command_object: AmfValue::Null,
            arguments: vec![],
        }
    }

    /// The `publish` command for a live stream.
    pub fn publish(playpath: &str) -> Self {
        Command {
            name: CMD_PUBLISH.to_string(),
            transaction_id: TID_STREAM_COMMAND,
            command_object: AmfValue::Null,
            arguments: vec![
                AmfValue::String(playpath.to_string()),
                AmfValue::String(PUBLISH_TYPE_LIVE.to_string()),
            ],
        }
    }

    /// The `deleteStream` command for the given message stream.
    pub fn delete_stream(stream_id: u32) -> Self {
        Command {
            name: CMD_DELETE_STREAM.to_string(),
            transaction_id: TID_STREAM_COMMAND,
            command_object: AmfValue::Null,
            arguments: vec![AmfValue::Number(stream_id as f64)],
        }
    }

    /// Parse a command payload: name, transaction ID, then the command object
    /// and any further values.
    pub fn parse(payload: &mut Bytes) -> Result<Command> {
        let name = amf0::read_string(payload)?;
        let transaction_id = amf0::read_number(payload)?;

        let command_object = if payload.has_remaining() {
            amf0::decode(payload)?
        } else {
            AmfValue::Null
        };

        let mut arguments = Vec::new();
        while payload.has_remaining() {
            match amf0::decode(payload) {
                Ok(v) => arguments.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
        })
    }

    /// Encode to an AMF0 command payload (message type 20).
    pub fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }
}

/// AMF0 data message (@setDataFrame, onTextData)
#[derive(Debug, Clone)]
pub struct DataMessage {
    /// Handler name
    pub name: String,
    /// Data values
    pub values: Vec<AmfValue>,
}

impl DataMessage {
    /// Free-text metadata: `onTextData` with an ECMA array `{text: value}`.
    pub fn on_text_data(text: &str) -> Self {
        let mut map = std::collections::HashMap::new();
        map.insert("text".to_string(), AmfValue::String(text.to_string()));

        DataMessage {
            name: CMD_ON_TEXT_DATA.to_string(),
            values: vec![AmfValue::EcmaArray(map)],
        }
    }

    /// Stream configuration: `@setDataFrame` / `onMetaData` with the given
    /// values as an ECMA array.
    pub fn set_data_frame(values: std::collections::HashMap<String, AmfValue>) -> Self {
        DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![
                AmfValue::String(CMD_ON_METADATA.to_string()),
                AmfValue::EcmaArray(values),
            ],
        }
    }

    /// Encode to an AMF0 data payload (message type 18).
    pub fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode_all(&self.values);
        encoder.finish()
    }
}

/// Parsed inbound message
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Set Chunk Size (type 1): new inbound chunk size, bottom 31 bits
    SetChunkSize(u32),
    /// Acknowledgement (type 3): bytes the server received so far
    Acknowledgement(u32),
    /// User Control (type 4)
    UserControl(UserControlEvent),
    /// Window Acknowledgement Size (type 5): bytes we may read before ACKing
    WindowAckSize(u32),
    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth {
        size: u32,
        limit_type: PeerBandwidthLimit,
    },
    /// AMF0 command (type 20)
    Command(Command),
}

impl ServerMessage {
    pub fn parse(message: &InboundMessage) -> Result<Self> {
        let mut payload = message.payload.clone();

        match message.kind {
            ServerMessageKind::SetChunkSize => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("set chunk size").into());
                }
                Ok(ServerMessage::SetChunkSize(payload.get_u32() & 0x7FFF_FFFF))
            }

            ServerMessageKind::Acknowledgement => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("acknowledgement").into());
                }
                Ok(ServerMessage::Acknowledgement(payload.get_u32()))
            }

            ServerMessageKind::WindowAckSize => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedMessage("window ack size").into());
                }
                Ok(ServerMessage::WindowAckSize(payload.get_u32()))
            }

            ServerMessageKind::SetPeerBandwidth => {
                if payload.len() < 5 {
                    return Err(ProtocolError::TruncatedMessage("set peer bandwidth").into());
                }
                let size = payload.get_u32();
                let limit = payload.get_u8();
                let limit_type = PeerBandwidthLimit::from_u8(limit)
                    .ok_or(ProtocolError::InvalidLimitType(limit))?;
                Ok(ServerMessage::SetPeerBandwidth { size, limit_type })
            }

            ServerMessageKind::UserControl => {
                Ok(ServerMessage::UserControl(parse_user_control(&mut payload)?))
            }

            ServerMessageKind::Command => Ok(ServerMessage::Command(Command::parse(&mut payload)?)),
        }
    }
}

fn parse_user_control(payload: &mut Bytes) -> Result<UserControlEvent> {
    if payload.len() < 6 {
        return Err(ProtocolError::TruncatedMessage("user control").into());
    }

    let event_type = payload.get_u16();
    let event = match event_type {
        UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
        UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
        UC_STREAM_DRY => UserControlEvent::StreamDry(payload.get_u32()),
        UC_SET_BUFFER_LENGTH => {
            if payload.len() < 8 {
                return Err(ProtocolError::TruncatedMessage("set buffer length").into());
            }
            let stream_id = payload.get_u32();
            let buffer_ms = payload.get_u32();
            UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms,
            }
        }
        UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(payload.get_u32()),
        UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
        UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
        other => return Err(ProtocolError::InvalidUserControlEvent(other).into()),
    };

    Ok(event)
}

/// SET_CHUNK_SIZE payload: 31-bit size, leading bit zero.
pub fn set_chunk_size_payload(size: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(size & 0x7FFF_FFFF);
    buf.freeze()
}

/// WINDOW_ACK_SIZE payload.
pub fn window_ack_size_payload(window: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(window);
    buf.freeze()
}

/// ACK payload: bytes received so far.
pub fn acknowledgement_payload(bytes_received: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(bytes_received);
    buf.freeze()
}

/// USER_CONTROL PING_RESPONSE payload echoing the server's timestamp.
pub fn ping_response_payload(timestamp: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(UC_PING_RESPONSE);
    buf.put_u32(timestamp);
    buf.freeze()
}
