//! Reader task
//!
//! Single loop that pulls bytes off the socket, deframes whole messages and
//! dispatches them: protocol control updates session state, server commands
//! drive the connect / createStream / publish sequence, and anything fatal
//! tears the session down and surfaces through the listener.
//!
//! Control responses are mostly deferred: an ACK or a ping response needed
//! while streaming is flagged in shared state and emitted by the application
//! task ahead of its next media payload. Only while idle does the reader
//! answer pings inline.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::client::listener::ConnectionListener;
use crate::client::session::{SessionState, SharedState};
use crate::client::transport::Transport;
use crate::client::writer::MessageWriter;
use crate::clock::Clock;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::{frame_type0_message, InboundMessage, MessageDeframer};
use crate::protocol::constants::*;
use crate::protocol::message::{
    ping_response_payload, window_ack_size_payload, Command, PeerBandwidthLimit, ServerMessage,
    UserControlEvent,
};

pub(crate) struct Reader {
    read: OwnedReadHalf,
    buf: BytesMut,
    deframer: MessageDeframer,
    shared: Arc<SharedState>,
    writer: Arc<MessageWriter>,
    transport: Arc<Transport>,
    listener: Arc<dyn ConnectionListener>,
    clock: Arc<dyn Clock>,
}

impl Reader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        read: OwnedReadHalf,
        deframer: MessageDeframer,
        shared: Arc<SharedState>,
        writer: Arc<MessageWriter>,
        transport: Arc<Transport>,
        listener: Arc<dyn ConnectionListener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            read,
            buf: BytesMut::with_capacity(16 * 1024),
            deframer,
            shared,
            writer,
            transport,
            listener,
            clock,
        }
    }

    pub(crate) async fn run(mut self) {
        let error = loop {
            match self.step().await {
                Ok(()) => {}
                Err(e) => break e,
            }
        };

        // A close initiated by stop() surfaces here as a read error; stay
        // quiet in that case.
        if self.transport.is_closed() {
            tracing::debug!("reader exiting after transport close");
            return;
        }

        tracing::debug!(error = %error, "reader error, tearing down session");
        self.shared.set_state(SessionState::Stopped);
        self.transport.close();
        self.listener.on_connection_error(error).await;
    }

    async fn step(&mut self) -> Result<()> {
        while let Some(message) = self.deframer.decode(&mut self.buf)? {
            self.dispatch(message).await?;
            if let Some(bytes) = self.deframer.take_ack_due() {
                tracing::debug!(bytes = bytes, "inbound window reached, ack scheduled");
                self.shared.request_ack(bytes);
            }
        }

        let n = self.read.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.shared
            .bytes_read_total
            .fetch_add(n as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn dispatch(&mut self, message: InboundMessage) -> Result<()> {
        match ServerMessage::parse(&message)? {
            ServerMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "server chunk size");
                self.shared.set_chunk_size_in(size);
            }

            ServerMessage::Acknowledgement(bytes) => {
                self.writer.on_ack(bytes);
            }

            ServerMessage::WindowAckSize(window) => {
                tracing::debug!(window = window, "server ack window");
                self.deframer.set_ack_window(window);
            }

            ServerMessage::SetPeerBandwidth { size, limit_type } => {
                self.handle_peer_bandwidth(size, limit_type).await;
            }

            ServerMessage::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                self.handle_ping_request(timestamp).await;
            }

            ServerMessage::UserControl(event) => {
                tracing::debug!(event = ?event, "user control event ignored");
            }

            ServerMessage::Command(command) => {
                self.handle_command(command).await?;
            }
        }
        Ok(())
    }

    /// Peer-bandwidth policy: DYNAMIC counts as HARD only if the previous
    /// limit was HARD; HARD applies when different; SOFT only shrinks. Any
    /// applied change is answered with a WINDOW_ACK_SIZE.
    async fn handle_peer_bandwidth(&self, size: u32, limit_type: PeerBandwidthLimit) {
        tracing::debug!(size = size, limit_type = ?limit_type, "peer bandwidth");

        let limit = match limit_type {
            PeerBandwidthLimit::Dynamic => {
                if self.shared.limit_type() != Some(BANDWIDTH_LIMIT_HARD) {
                    return;
                }
                PeerBandwidthLimit::Hard
            }
            other => other,
        };

        self.shared.set_limit_type(limit.as_u8());

        let window = self.shared.ack_window_out();
        let changed = match limit {
            PeerBandwidthLimit::Hard => size as u64 != window,
            PeerBandwidthLimit::Soft => (size as u64) < window,
            PeerBandwidthLimit::Dynamic => false,
        };
        if !changed {
            return;
        }

        self.shared.set_ack_window_out(size as u64);

        let result = async {
            let message = frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_WINDOW_ACK_SIZE,
                CONTROL_STREAM_ID,
                &window_ack_size_payload(size),
            )?;
            self.writer.send(message).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to send window ack size after peer bandwidth change");
        }
    }

    /// While idle the ping is answered right here; while streaming (or before
    /// the connection is up) the response piggybacks on the next media send.
    async fn handle_ping_request(&self, timestamp: u32) {
        tracing::debug!(timestamp = timestamp, "ping request");

        match self.shared.state() {
            SessionState::Connected | SessionState::AwaitingStream | SessionState::PublishSent => {
                let result = async {
                    let message = frame_type0_message(
                        CSID_CONTROL,
                        self.now(),
                        MSG_USER_CONTROL,
                        CONTROL_STREAM_ID,
                        &ping_response_payload(timestamp),
                    )?;
                    self.writer.send(message).await
                }
                .await;

                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to send idle ping response");
                }
            }
            _ => {
                self.shared.request_ping_response(timestamp);
            }
        }
    }

    async fn handle_command(&self, command: Command) -> Result<()> {
        match command.name.as_str() {
            CMD_RESULT => self.handle_result(command).await,
            CMD_ON_STATUS => self.handle_status(command).await,
            CMD_ERROR => Err(Error::Server(describe_server_error(&command))),
            other => Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        }
    }

    async fn handle_result(&self, command: Command) -> Result<()> {
        if command.transaction_id == TID_CONNECT {
            let info = command
                .arguments
                .first()
                .ok_or(ProtocolError::MissingField("information"))?;

            match info.get_string("code") {
                Some(NC_CONNECT_SUCCESS) => {
                    tracing::debug!("connect accepted");
                    self.shared.set_state(SessionState::Connected);
                    self.listener.on_connected().await;
                    Ok(())
                }
                Some(code) if code.starts_with(NC_CONNECT_PREFIX) => {
                    Err(Error::Server(format!("bad connect response: {}", code)))
                }
                _ => Err(Error::Server(
                    "connect result without success code".to_string(),
                )),
            }
        } else if command.transaction_id == TID_CREATE_STREAM {
            let stream_id = command
                .arguments
                .first()
                .and_then(|v| v.as_number())
                .ok_or(ProtocolError::MissingField("stream id"))?
                as u32;

            tracing::debug!(stream_id = stream_id, "stream created");
            self.shared.set_stream_id(stream_id);
            self.send_publish().await?;
            self.shared.set_state(SessionState::PublishSent);
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedTransactionId(command.transaction_id).into())
        }
    }

    async fn handle_status(&self, command: Command) -> Result<()> {
        if command.transaction_id != TID_STREAM_COMMAND {
            return Err(ProtocolError::UnexpectedTransactionId(command.transaction_id).into());
        }

        let code = command.arguments.first().and_then(|v| v.get_string("code"));
        match code {
            Some(NS_PUBLISH_START) => {
                tracing::debug!("publish accepted");
                self.shared.set_state(SessionState::Streaming);
                self.listener.on_ready_to_publish().await;
                Ok(())
            }
            Some(code) if code.starts_with(NS_PUBLISH_PREFIX) => {
                Err(Error::Server(format!("bad publish response: {}", code)))
            }
            _ => {
                tracing::debug!("onStatus without actionable code, ignored");
                Ok(())
            }
        }
    }

    /// The server created the stream; answer with `publish` right away.
    async fn send_publish(&self) -> Result<()> {
        let playpath = self
            .shared
            .playpath()
            .ok_or(Error::InvalidState("stream created with no playpath recorded"))?;

        let payload = Command::publish(&playpath).encode();
        let message = frame_type0_message(
            CSID_CONTROL,
            self.now(),
            MSG_COMMAND_AMF0,
            self.shared.stream_id(),
            &payload,
        )?;
        self.writer.send(message).await
    }

    fn now(&self) -> u32 {
        self.clock.now_ms() as u32
    }
}

fn describe_server_error(command: &Command) -> String {
    let info = command.arguments.first();
    match (
        info.and_then(|v| v.get_string("code")),
        info.and_then(|v| v.get_string("description")),
    ) {
        (Some(code), Some(description)) => format!("{}: {}", code, description),
        (Some(code), None) => code.to_string(),
        _ => "error received from the server".to_string(),
    }
}
