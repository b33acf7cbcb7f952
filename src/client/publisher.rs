//! The publishing controller
//!
//! `RtmpPublisher` owns one publish session and walks it through the command
//! sequence:
//!
//! ```text
//! start()           -> handshake, SET_CHUNK_SIZE, WINDOW_ACK_SIZE, connect
//! on_connected      -> create_stream(playpath)
//! (reader)          -> publish, sent as soon as the stream ID arrives
//! on_ready_to_publish -> post_video / post_audio / send_metadata / ...
//! delete_stream()   -> back to connected
//! stop()            -> everything torn down
//! ```
//!
//! Media is posted from a single application task; the reader task handles
//! inbound control. Any pending ACK and ping response are emitted as complete
//! control messages ahead of the next media payload, in that order.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::config::PublisherConfig;
use crate::client::listener::ConnectionListener;
use crate::client::reader::Reader;
use crate::client::session::{SessionState, SharedState};
use crate::client::transport::Transport;
use crate::client::writer::MessageWriter;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::media::{flv, h264, AacFrame, AacHeader, H264Frame, StreamDataFrame};
use crate::protocol::chunk::{frame_media_message, frame_type0_message, MessageDeframer};
use crate::protocol::constants::*;
use crate::protocol::handshake;
use crate::protocol::message::{
    acknowledgement_payload, ping_response_payload, set_chunk_size_payload,
    window_ack_size_payload, Command, DataMessage,
};
use crate::stats::PublisherStats;

struct Connection {
    transport: Arc<Transport>,
    writer: Arc<MessageWriter>,
    shared: Arc<SharedState>,
    reader_task: JoinHandle<()>,
}

/// RTMP publishing client for one H.264/AAC stream.
pub struct RtmpPublisher {
    config: PublisherConfig,
    clock: Arc<dyn Clock>,
    conn: Option<Connection>,

    audio_header: Option<AacHeader>,
    audio_header_sent: bool,
    aac_tag_byte: u8,
    last_video_ts: i64,
    last_audio_ts: i64,
}

impl RtmpPublisher {
    /// Create a publisher for the given server, using `clock` for RTMP
    /// timestamps.
    pub fn new(host: impl Into<String>, port: u16, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(PublisherConfig::new(host, port), clock)
    }

    pub fn with_config(config: PublisherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            conn: None,
            audio_header: None,
            audio_header_sent: false,
            aac_tag_byte: 0,
            last_video_ts: -1,
            last_audio_ts: -1,
        }
    }

    /// TCP connect timeout; effective on the next `start`.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.config.connect_timeout = timeout;
    }

    /// Per-read deadline while waiting for S1/S2; effective on the next
    /// `start`.
    pub fn set_handshake_timeout(&mut self, timeout: Duration) {
        self.config.handshake_timeout = timeout;
    }

    /// Deadline for each write; takes effect immediately.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.config.write_timeout = timeout;
        if let Some(conn) = &self.conn {
            conn.shared.set_write_timeout(timeout);
        }
    }

    /// How long a send may wait on the ACK window; takes effect immediately.
    pub fn set_ack_wait_timeout(&mut self, timeout: Duration) {
        self.config.ack_wait_timeout = timeout;
        if let Some(conn) = &self.conn {
            conn.shared.set_ack_wait_timeout(timeout);
        }
    }

    /// Open the connection: TCP connect, handshake, chunk-size and ACK-window
    /// announcements, then the `connect` command.
    ///
    /// On success the reader task is running and `listener.on_connected`
    /// fires once the server accepts; on failure the session is torn down and
    /// the error returned. Reader-side failures after `start` returns are
    /// delivered through `listener.on_connection_error`.
    pub async fn start(
        &mut self,
        listener: Arc<dyn ConnectionListener>,
        app: &str,
        server_url: Option<&str>,
        page_url: Option<&str>,
    ) -> Result<()> {
        if self.conn.is_some() {
            return Err(Error::InvalidState("publisher is already started"));
        }

        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            app = app,
            "starting publisher"
        );

        let shared = Arc::new(SharedState::new(&self.config));
        shared.set_state(SessionState::Connecting);

        let (transport, read) = Transport::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
            self.config.tcp_nodelay,
        )
        .await?;
        let transport = Arc::new(transport);
        let writer = Arc::new(MessageWriter::new(transport.clone(), shared.clone()));

        let read = match self
            .session_preamble(read, &writer, &shared, app, server_url, page_url)
            .await
        {
            Ok(read) => read,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        shared.set_state(SessionState::AwaitingConnect);

        let handshake_bytes = (1 + 2 * HANDSHAKE_SIZE) as u64;
        let mut deframer = MessageDeframer::new();
        deframer.record_raw_bytes(handshake_bytes);
        shared
            .bytes_read_total
            .fetch_add(handshake_bytes, Ordering::SeqCst);

        let reader = Reader::new(
            read,
            deframer,
            shared.clone(),
            writer.clone(),
            transport.clone(),
            listener,
            self.clock.clone(),
        );
        let reader_task = tokio::spawn(reader.run());

        self.conn = Some(Connection {
            transport,
            writer,
            shared,
            reader_task,
        });
        Ok(())
    }

    /// Ask the server for a message stream. The playpath is recorded and the
    /// `publish` command goes out automatically when the stream ID arrives;
    /// `listener.on_ready_to_publish` fires once the server accepts it.
    pub async fn create_stream(&mut self, playpath: &str) -> Result<()> {
        let conn = self.connection()?;
        if conn.shared.state() != SessionState::Connected {
            return Err(Error::InvalidState(
                "wait for on_connected before calling create_stream",
            ));
        }

        conn.shared.set_playpath(playpath);

        let payload = Command::create_stream().encode();
        let message = frame_type0_message(
            CSID_CONTROL,
            self.now(),
            MSG_COMMAND_AMF0,
            CONTROL_STREAM_ID,
            &payload,
        )?;
        conn.writer.send(message).await?;
        conn.shared.set_state(SessionState::AwaitingStream);
        Ok(())
    }

    /// Register the AAC configuration. Can be called at any time; the
    /// sequence header is emitted ahead of the first audio frame.
    pub fn set_audio_header(&mut self, header: AacHeader) {
        self.audio_header = Some(header);
    }

    /// Send one video frame. Config frames become the AVC sequence header;
    /// everything else goes out as VIDEODATA, chunked as needed.
    ///
    /// A failed send tears the session down before the error is returned.
    pub async fn post_video(&mut self, frame: &H264Frame) -> Result<()> {
        self.ensure_streaming()?;
        match self.send_video(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.do_stop();
                Err(e)
            }
        }
    }

    /// Send one audio frame. Frames posted before an audio header is
    /// registered are dropped.
    ///
    /// A failed send tears the session down before the error is returned.
    pub async fn post_audio(&mut self, frame: &AacFrame) -> Result<()> {
        self.ensure_streaming()?;
        match self.send_audio(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.do_stop();
                Err(e)
            }
        }
    }

    /// Send free-text metadata (`onTextData`).
    pub async fn send_metadata(&mut self, text: &str) -> Result<()> {
        self.ensure_streaming()?;
        let conn = self.connection()?;

        let payload = DataMessage::on_text_data(text).encode();
        let message = frame_type0_message(
            CSID_DATA,
            self.now(),
            MSG_DATA_AMF0,
            conn.shared.stream_id(),
            &payload,
        )?;
        conn.writer.send(message).await
    }

    /// Advertise the stream configuration (`@setDataFrame` / `onMetaData`).
    pub async fn send_data_frame(&mut self, frame: &StreamDataFrame) -> Result<()> {
        self.ensure_streaming()?;
        let conn = self.connection()?;

        let payload = DataMessage::set_data_frame(frame.to_values()).encode();
        let message = frame_type0_message(
            CSID_DATA,
            self.now(),
            MSG_DATA_AMF0,
            conn.shared.stream_id(),
            &payload,
        )?;
        conn.writer.send(message).await
    }

    /// Tear down the message stream but keep the connection; a new
    /// `create_stream` may follow.
    pub async fn delete_stream(&mut self) -> Result<()> {
        self.ensure_streaming()?;
        {
            let conn = self.connection()?;
            let payload = Command::delete_stream(conn.shared.stream_id()).encode();
            let message = frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_COMMAND_AMF0,
                CONTROL_STREAM_ID,
                &payload,
            )?;
            conn.writer.send(message).await?;

            conn.shared.set_state(SessionState::Connected);
            conn.shared.set_stream_id(0);
            conn.shared.clear_playpath();
        }
        self.reset_media_state();
        Ok(())
    }

    /// Close the connection and clear all session state. Idempotent.
    pub fn stop(&mut self) {
        tracing::debug!("stop");
        if self.conn.is_none() {
            tracing::warn!("stop called while already stopped");
        }
        self.do_stop();
    }

    /// True from a successful `start` until `stop` or a fatal error.
    pub fn is_started(&self) -> bool {
        self.conn
            .as_ref()
            .map(|c| c.shared.state() != SessionState::Stopped)
            .unwrap_or(false)
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> PublisherStats {
        match &self.conn {
            Some(conn) => {
                let shared = &conn.shared;
                let bytes_sent = shared.bytes_sent_total.load(Ordering::SeqCst);
                let duration = shared.uptime();
                PublisherStats {
                    bytes_sent,
                    bytes_sent_since_ack: shared.bytes_sent_since_ack.load(Ordering::SeqCst),
                    bytes_received: shared.bytes_read_total.load(Ordering::SeqCst),
                    video_frames: shared.video_frames.load(Ordering::SeqCst),
                    audio_frames: shared.audio_frames.load(Ordering::SeqCst),
                    keyframes: shared.keyframes.load(Ordering::SeqCst),
                    duration,
                    bitrate: PublisherStats::send_bitrate(bytes_sent, duration),
                }
            }
            None => PublisherStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // connection setup

    async fn session_preamble(
        &self,
        mut read: OwnedReadHalf,
        writer: &Arc<MessageWriter>,
        shared: &Arc<SharedState>,
        app: &str,
        server_url: Option<&str>,
        page_url: Option<&str>,
    ) -> Result<OwnedReadHalf> {
        self.handshake(&mut read, writer).await?;

        writer
            .send(frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_SET_CHUNK_SIZE,
                CONTROL_STREAM_ID,
                &set_chunk_size_payload(OUTBOUND_CHUNK_SIZE),
            )?)
            .await?;

        writer
            .send(frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_WINDOW_ACK_SIZE,
                CONTROL_STREAM_ID,
                &window_ack_size_payload(shared.ack_window_out() as u32),
            )?)
            .await?;

        let payload = Command::connect(app, server_url, page_url).encode();
        writer
            .send(frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_COMMAND_AMF0,
                CONTROL_STREAM_ID,
                &payload,
            )?)
            .await?;

        Ok(read)
    }

    async fn handshake(&self, read: &mut OwnedReadHalf, writer: &MessageWriter) -> Result<()> {
        let started = Instant::now();

        writer.send(handshake::client_hello(self.now())).await?;

        let mut s0 = [0u8; 1];
        self.read_handshake_frame(read, &mut s0).await?;
        handshake::validate_server_version(s0[0])?;

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        self.read_handshake_frame(read, &mut s1).await?;

        let elapsed = started.elapsed().as_millis() as u32;
        writer.send(handshake::client_echo(&s1, elapsed)).await?;

        // S2 is read and discarded; the echo is not validated.
        let mut s2 = [0u8; HANDSHAKE_SIZE];
        self.read_handshake_frame(read, &mut s2).await?;

        tracing::debug!("handshake complete");
        Ok(())
    }

    async fn read_handshake_frame(&self, read: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<()> {
        let deadline = self.config.handshake_timeout;
        if deadline.is_zero() {
            read.read_exact(buf).await?;
        } else {
            timeout(deadline, read.read_exact(buf))
                .await
                .map_err(|_| Error::HandshakeTimeout)??;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // media

    async fn send_video(&mut self, frame: &H264Frame) -> Result<()> {
        if frame.is_header {
            let (sps, pps) = h264::split_parameter_sets(&frame.data)?;
            let record = h264::avc_decoder_configuration_record(&sps, &pps);
            let tag = flv::video_sequence_header(&record);

            let now = self.now();
            let conn = self.connection()?;
            let message =
                frame_type0_message(CSID_VIDEO, now, MSG_VIDEO, conn.shared.stream_id(), &tag)?;
            conn.writer.send(message).await?;
            tracing::debug!("video sequence header sent");
            return Ok(());
        }

        let delta = media_delta(&mut self.last_video_ts, frame.timestamp);
        self.flush_pending_control().await?;

        let tag = flv::video_frame_tag(frame.is_keyframe, &frame.data);
        let chunks = frame_media_message(
            CSID_VIDEO,
            delta,
            MSG_VIDEO,
            &tag,
            OUTBOUND_CHUNK_SIZE as usize,
        )?;

        let conn = self.connection()?;
        conn.writer.send_chunked(&chunks).await?;
        conn.shared.video_frames.fetch_add(1, Ordering::SeqCst);
        if frame.is_keyframe {
            conn.shared.keyframes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send_audio(&mut self, frame: &AacFrame) -> Result<()> {
        if !self.audio_header_sent {
            let header = match &self.audio_header {
                Some(header) => header.clone(),
                None => {
                    tracing::warn!("dropping audio frame posted before set_audio_header");
                    return Ok(());
                }
            };
            self.send_audio_header(&header).await?;
        }

        let delta = media_delta(&mut self.last_audio_ts, frame.timestamp);
        self.flush_pending_control().await?;

        let tag = flv::audio_frame_tag(self.aac_tag_byte, &frame.data);
        let chunks = frame_media_message(
            CSID_AUDIO,
            delta,
            MSG_AUDIO,
            &tag,
            OUTBOUND_CHUNK_SIZE as usize,
        )?;

        let conn = self.connection()?;
        conn.writer.send_chunked(&chunks).await?;
        conn.shared.audio_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_audio_header(&mut self, header: &AacHeader) -> Result<()> {
        let tag_byte = header.flv_tag_byte();
        let tag = flv::audio_sequence_header(tag_byte, &header.config);

        let now = self.now();
        let conn = self.connection()?;
        let message = frame_type0_message(CSID_AUDIO, now, MSG_AUDIO, conn.shared.stream_id(), &tag)?;
        conn.writer.send(message).await?;

        self.aac_tag_byte = tag_byte;
        self.audio_header_sent = true;
        tracing::debug!("audio sequence header sent");
        Ok(())
    }

    /// Emit any pending ACK, then any pending ping response, before a media
    /// payload.
    async fn flush_pending_control(&self) -> Result<()> {
        let conn = self.connection()?;

        if let Some(bytes) = conn.shared.take_ack_request() {
            tracing::debug!(bytes = bytes, "sending deferred ack");
            let message = frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_ACKNOWLEDGEMENT,
                CONTROL_STREAM_ID,
                &acknowledgement_payload(bytes as u32),
            )?;
            conn.writer.send(message).await?;
        }

        if let Some(timestamp) = conn.shared.take_ping_request() {
            tracing::debug!(timestamp = timestamp, "sending deferred ping response");
            let message = frame_type0_message(
                CSID_CONTROL,
                self.now(),
                MSG_USER_CONTROL,
                CONTROL_STREAM_ID,
                &ping_response_payload(timestamp),
            )?;
            conn.writer.send(message).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // plumbing

    fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or(Error::InvalidState("publisher is not started"))
    }

    fn ensure_streaming(&self) -> Result<()> {
        if self.connection()?.shared.state() != SessionState::Streaming {
            return Err(Error::InvalidState(
                "wait for on_ready_to_publish before posting data",
            ));
        }
        Ok(())
    }

    fn do_stop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.shared.set_state(SessionState::Stopped);
            conn.transport.close();
            conn.reader_task.abort();
        }
        self.reset_media_state();
    }

    fn reset_media_state(&mut self) {
        self.audio_header = None;
        self.audio_header_sent = false;
        self.aac_tag_byte = 0;
        self.last_video_ts = -1;
        self.last_audio_ts = -1;
    }

    fn now(&self) -> u32 {
        self.clock.now_ms() as u32
    }
}

impl Drop for RtmpPublisher {
    fn drop(&mut self) {
        self.do_stop();
    }
}

/// Delta against the previous frame on the same chunk stream. The first frame
/// pins the reference and reports delta zero; deltas never go negative.
fn media_delta(last_ts: &mut i64, timestamp: u64) -> u32 {
    let ts = timestamp as i64;
    if *last_ts < 0 {
        *last_ts = ts;
        return 0;
    }
    let delta = (ts - *last_ts).max(0);
    *last_ts = ts;
    delta as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{Amf0Encoder, AmfValue};
    use bytes::Bytes;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Fixed clock so every header the publisher emits is byte-predictable.
    struct TestClock;

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            0
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Connected,
        Ready,
        Error(String),
    }

    struct ChannelListener(mpsc::UnboundedSender<Event>);

    #[async_trait::async_trait]
    impl ConnectionListener for ChannelListener {
        async fn on_connected(&self) {
            let _ = self.0.send(Event::Connected);
        }

        async fn on_ready_to_publish(&self) {
            let _ = self.0.send(Event::Ready);
        }

        async fn on_connection_error(&self, error: Error) {
            let _ = self.0.send(Event::Error(error.to_string()));
        }
    }

    fn publisher_for(port: u16) -> (RtmpPublisher, mpsc::UnboundedReceiver<Event>, Arc<ChannelListener>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = RtmpPublisher::new("127.0.0.1", port, Arc::new(TestClock));
        (publisher, rx, Arc::new(ChannelListener(tx)))
    }

    async fn expect_event(rx: &mut mpsc::UnboundedReceiver<Event>, expected: Event) {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for listener event")
            .expect("listener channel closed");
        assert_eq!(event, expected);
    }

    async fn expect_exact(socket: &mut TcpStream, expected: &[u8], what: &str) {
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(5), socket.read_exact(&mut buf))
            .await
            .unwrap_or_else(|_| panic!("timed out reading {}", what))
            .unwrap();
        assert_eq!(buf, expected, "unexpected bytes for {}", what);
    }

    /// Server side of the simple handshake; returns nothing but asserts the
    /// client's C0/C1/C2 shapes.
    async fn server_handshake(socket: &mut TcpStream) {
        let mut hello = vec![0u8; 1537];
        socket.read_exact(&mut hello).await.unwrap();
        assert_eq!(hello[0], 3, "C0 must announce RTMP 3");
        assert_eq!(&hello[5..9], &[0, 0, 0, 0], "C1 zero field");

        let mut s1 = vec![0u8; HANDSHAKE_SIZE];
        for (i, b) in s1.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        socket.write_all(&[3]).await.unwrap();
        socket.write_all(&s1).await.unwrap();
        socket.write_all(&hello[1..]).await.unwrap(); // S2: echo of C1

        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        socket.read_exact(&mut c2).await.unwrap();
        assert_eq!(&c2[4..], &s1[4..], "C2 must echo S1 after the timestamp");
    }

    fn framed_from_server(msg_type: u8, payload: &[u8]) -> Bytes {
        // Servers put commands on chunk stream 3.
        frame_type0_message(3, 0, msg_type, 0, payload).unwrap()
    }

    fn connect_success_payload() -> Bytes {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::String("status".into()));
        info.insert(
            "code".to_string(),
            AmfValue::String(NC_CONNECT_SUCCESS.into()),
        );

        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(CMD_RESULT.into()));
        encoder.encode(&AmfValue::Number(TID_CONNECT));
        encoder.encode(&AmfValue::Object(HashMap::new())); // properties
        encoder.encode(&AmfValue::Object(info));
        encoder.finish()
    }

    fn create_stream_result_payload(stream_id: f64) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(CMD_RESULT.into()));
        encoder.encode(&AmfValue::Number(TID_CREATE_STREAM));
        encoder.encode(&AmfValue::Null);
        encoder.encode(&AmfValue::Number(stream_id));
        encoder.finish()
    }

    fn on_status_payload(code: &str) -> Bytes {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::String("status".into()));
        info.insert("code".to_string(), AmfValue::String(code.into()));

        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(CMD_ON_STATUS.into()));
        encoder.encode(&AmfValue::Number(0.0));
        encoder.encode(&AmfValue::Null);
        encoder.encode(&AmfValue::Object(info));
        encoder.finish()
    }

    /// Drive the server through the connect preamble: handshake, then the
    /// client's SET_CHUNK_SIZE, WINDOW_ACK_SIZE and connect command.
    async fn server_accept_connect(socket: &mut TcpStream, app: &str) {
        server_handshake(socket).await;

        let expected_chunk_size = frame_type0_message(
            CSID_CONTROL,
            0,
            MSG_SET_CHUNK_SIZE,
            CONTROL_STREAM_ID,
            &set_chunk_size_payload(OUTBOUND_CHUNK_SIZE),
        )
        .unwrap();
        expect_exact(socket, &expected_chunk_size, "SET_CHUNK_SIZE").await;

        let expected_window = frame_type0_message(
            CSID_CONTROL,
            0,
            MSG_WINDOW_ACK_SIZE,
            CONTROL_STREAM_ID,
            &window_ack_size_payload(DEFAULT_ACK_WINDOW_SIZE),
        )
        .unwrap();
        expect_exact(socket, &expected_window, "WINDOW_ACK_SIZE").await;

        let expected_connect = frame_type0_message(
            CSID_CONTROL,
            0,
            MSG_COMMAND_AMF0,
            CONTROL_STREAM_ID,
            &Command::connect(app, None, None).encode(),
        )
        .unwrap();
        expect_exact(socket, &expected_connect, "connect command").await;

        socket
            .write_all(&framed_from_server(
                MSG_COMMAND_AMF0,
                &connect_success_payload(),
            ))
            .await
            .unwrap();
    }

    /// Continue through createStream and publish until streaming.
    async fn server_accept_publish(socket: &mut TcpStream, playpath: &str, stream_id: u32) {
        let expected_create = frame_type0_message(
            CSID_CONTROL,
            0,
            MSG_COMMAND_AMF0,
            CONTROL_STREAM_ID,
            &Command::create_stream().encode(),
        )
        .unwrap();
        expect_exact(socket, &expected_create, "createStream command").await;

        socket
            .write_all(&framed_from_server(
                MSG_COMMAND_AMF0,
                &create_stream_result_payload(stream_id as f64),
            ))
            .await
            .unwrap();

        let expected_publish = frame_type0_message(
            CSID_CONTROL,
            0,
            MSG_COMMAND_AMF0,
            stream_id,
            &Command::publish(playpath).encode(),
        )
        .unwrap();
        expect_exact(socket, &expected_publish, "publish command").await;

        socket
            .write_all(&framed_from_server(
                MSG_COMMAND_AMF0,
                &on_status_payload(NS_PUBLISH_START),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_publish_flow() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            server_accept_connect(&mut socket, "live").await;
            server_accept_publish(&mut socket, "cam", 1).await;

            // Ping while streaming: the response must precede the next video.
            let mut ping = bytes::BytesMut::new();
            ping.extend_from_slice(&framed_from_server(
                MSG_USER_CONTROL,
                &[0x00, 0x06, 0x00, 0x00, 0x00, 0x4D],
            ));
            socket.write_all(&ping).await.unwrap();

            let expected_pong = frame_type0_message(
                CSID_CONTROL,
                0,
                MSG_USER_CONTROL,
                CONTROL_STREAM_ID,
                &ping_response_payload(0x4D),
            )
            .unwrap();
            expect_exact(&mut socket, &expected_pong, "deferred ping response").await;

            let video = flv::video_frame_tag(true, &[0x65, 0x88, 0x80, 0x00]);
            let expected_video = frame_media_message(
                CSID_VIDEO,
                0,
                MSG_VIDEO,
                &video,
                OUTBOUND_CHUNK_SIZE as usize,
            )
            .unwrap();
            assert_eq!(expected_video.len(), 1);
            expect_exact(&mut socket, &expected_video[0], "video frame").await;

            // Audio: sequence header first, then the frame.
            let header = AacHeader::new(Bytes::from_static(&[0x12, 0x10]), 2, 3);
            let expected_seq = frame_type0_message(
                CSID_AUDIO,
                0,
                MSG_AUDIO,
                1,
                &flv::audio_sequence_header(header.flv_tag_byte(), &header.config),
            )
            .unwrap();
            expect_exact(&mut socket, &expected_seq, "audio sequence header").await;

            let audio = flv::audio_frame_tag(header.flv_tag_byte(), &[0x21, 0x42]);
            let expected_audio = frame_media_message(
                CSID_AUDIO,
                0,
                MSG_AUDIO,
                &audio,
                OUTBOUND_CHUNK_SIZE as usize,
            )
            .unwrap();
            expect_exact(&mut socket, &expected_audio[0], "audio frame").await;

            // Metadata on chunk stream 18.
            let expected_meta = frame_type0_message(
                CSID_DATA,
                0,
                MSG_DATA_AMF0,
                1,
                &DataMessage::on_text_data("hello").encode(),
            )
            .unwrap();
            expect_exact(&mut socket, &expected_meta, "metadata").await;

            // deleteStream closes out the message stream.
            let expected_delete = frame_type0_message(
                CSID_CONTROL,
                0,
                MSG_COMMAND_AMF0,
                CONTROL_STREAM_ID,
                &Command::delete_stream(1).encode(),
            )
            .unwrap();
            expect_exact(&mut socket, &expected_delete, "deleteStream command").await;
        });

        let (mut publisher, mut events, listener) = publisher_for(port);
        publisher
            .start(listener, "live", None, None)
            .await
            .unwrap();
        assert!(publisher.is_started());

        expect_event(&mut events, Event::Connected).await;
        publisher.create_stream("cam").await.unwrap();
        expect_event(&mut events, Event::Ready).await;

        // Give the reader time to process the ping request.
        tokio::time::sleep(Duration::from_millis(300)).await;

        publisher
            .post_video(&H264Frame {
                timestamp: 100,
                is_header: false,
                is_keyframe: true,
                data: Bytes::from_static(&[0x65, 0x88, 0x80, 0x00]),
            })
            .await
            .unwrap();

        publisher.set_audio_header(AacHeader::new(
            Bytes::from_static(&[0x12, 0x10]),
            2,
            3,
        ));
        publisher
            .post_audio(&AacFrame {
                timestamp: 100,
                data: Bytes::from_static(&[0x21, 0x42]),
            })
            .await
            .unwrap();

        publisher.send_metadata("hello").await.unwrap();

        let stats = publisher.stats();
        assert_eq!(stats.video_frames, 1);
        assert_eq!(stats.audio_frames, 1);
        assert_eq!(stats.keyframes, 1);
        assert!(stats.bytes_sent > 0);

        publisher.delete_stream().await.unwrap();
        // Back to connected: posting now is an invalid state.
        let err = publisher
            .post_video(&H264Frame {
                timestamp: 133,
                is_header: false,
                is_keyframe: false,
                data: Bytes::from_static(&[0x41]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        server.await.unwrap();
        publisher.stop();
        assert!(!publisher.is_started());
    }

    #[tokio::test]
    async fn test_video_sequence_header_goes_out_as_type0() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            server_accept_connect(&mut socket, "live").await;
            server_accept_publish(&mut socket, "cam", 1).await;

            let sps = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9];
            let pps = [0x68, 0xEF, 0x38];
            let record = h264::avc_decoder_configuration_record(&sps, &pps);
            let expected = frame_type0_message(
                CSID_VIDEO,
                0,
                MSG_VIDEO,
                1,
                &flv::video_sequence_header(&record),
            )
            .unwrap();
            expect_exact(&mut socket, &expected, "AVC sequence header").await;
        });

        let (mut publisher, mut events, listener) = publisher_for(port);
        publisher.start(listener, "live", None, None).await.unwrap();
        expect_event(&mut events, Event::Connected).await;
        publisher.create_stream("cam").await.unwrap();
        expect_event(&mut events, Event::Ready).await;

        let mut config = Vec::new();
        config.extend_from_slice(&[0, 0, 0, 1]);
        config.extend_from_slice(&[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9]);
        config.extend_from_slice(&[0, 0, 0, 1]);
        config.extend_from_slice(&[0x68, 0xEF, 0x38]);

        publisher
            .post_video(&H264Frame {
                timestamp: 0,
                is_header: true,
                is_keyframe: false,
                data: Bytes::from(config),
            })
            .await
            .unwrap();

        server.await.unwrap();
        publisher.stop();
    }

    #[tokio::test]
    async fn test_connect_rejected_surfaces_listener_error() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            server_handshake(&mut socket).await;

            // Drain the client's preamble without inspecting it.
            let mut drain = vec![0u8; 16 + 16];
            socket.read_exact(&mut drain).await.unwrap();

            let mut info = HashMap::new();
            info.insert(
                "code".to_string(),
                AmfValue::String("NetConnection.Connect.Rejected".into()),
            );
            let mut encoder = Amf0Encoder::new();
            encoder.encode(&AmfValue::String(CMD_RESULT.into()));
            encoder.encode(&AmfValue::Number(TID_CONNECT));
            encoder.encode(&AmfValue::Object(HashMap::new()));
            encoder.encode(&AmfValue::Object(info));
            let payload = encoder.finish();

            socket
                .write_all(&framed_from_server(MSG_COMMAND_AMF0, &payload))
                .await
                .unwrap();
            // Hold the socket open long enough for the client to react.
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let (mut publisher, mut events, listener) = publisher_for(port);
        publisher.start(listener, "live", None, None).await.unwrap();

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::Error(message) => assert!(message.contains("Rejected")),
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(!publisher.is_started());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_on_status_with_nonzero_transaction_id_is_fatal() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            server_accept_connect(&mut socket, "live").await;

            let expected_create = frame_type0_message(
                CSID_CONTROL,
                0,
                MSG_COMMAND_AMF0,
                CONTROL_STREAM_ID,
                &Command::create_stream().encode(),
            )
            .unwrap();
            expect_exact(&mut socket, &expected_create, "createStream command").await;

            socket
                .write_all(&framed_from_server(
                    MSG_COMMAND_AMF0,
                    &create_stream_result_payload(1.0),
                ))
                .await
                .unwrap();

            let expected_publish = frame_type0_message(
                CSID_CONTROL,
                0,
                MSG_COMMAND_AMF0,
                1,
                &Command::publish("cam").encode(),
            )
            .unwrap();
            expect_exact(&mut socket, &expected_publish, "publish command").await;

            // onStatus must carry transaction ID 0; anything else is fatal.
            let mut info = HashMap::new();
            info.insert(
                "code".to_string(),
                AmfValue::String(NS_PUBLISH_START.into()),
            );
            let mut encoder = Amf0Encoder::new();
            encoder.encode(&AmfValue::String(CMD_ON_STATUS.into()));
            encoder.encode(&AmfValue::Number(1.0));
            encoder.encode(&AmfValue::Null);
            encoder.encode(&AmfValue::Object(info));
            socket
                .write_all(&framed_from_server(MSG_COMMAND_AMF0, &encoder.finish()))
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let (mut publisher, mut events, listener) = publisher_for(port);
        publisher.start(listener, "live", None, None).await.unwrap();
        expect_event(&mut events, Event::Connected).await;
        publisher.create_stream("cam").await.unwrap();

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::Error(message) => assert!(message.contains("transaction")),
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(!publisher.is_started());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            // Swallow C0/C1 and go silent.
            let mut hello = vec![0u8; 1537];
            socket.read_exact(&mut hello).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let (mut publisher, _events, listener) = publisher_for(port);
        publisher.set_handshake_timeout(Duration::from_millis(200));

        let err = publisher
            .start(listener, "live", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout));
        assert!(!publisher.is_started());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_server_version() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            let mut hello = vec![0u8; 1537];
            socket.read_exact(&mut hello).await.unwrap();
            socket.write_all(&[6]).await.unwrap(); // not RTMP 3
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let (mut publisher, _events, listener) = publisher_for(port);
        let err = publisher
            .start(listener, "live", None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Handshake(crate::error::HandshakeError::UnsupportedVersion(6))
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_preconditions_without_start() {
        let (mut publisher, _events, _listener) = publisher_for(1935);

        let err = publisher.create_stream("cam").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let err = publisher
            .post_video(&H264Frame {
                timestamp: 0,
                is_header: false,
                is_keyframe: false,
                data: Bytes::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let err = publisher.send_metadata("x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        assert!(!publisher.is_started());
        publisher.stop(); // idempotent
    }

    #[tokio::test]
    async fn test_audio_frame_dropped_without_header() {
        let listener_sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener_sock.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener_sock.accept().await.unwrap();
            server_accept_connect(&mut socket, "live").await;
            server_accept_publish(&mut socket, "cam", 1).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let (mut publisher, mut events, listener) = publisher_for(port);
        publisher.start(listener, "live", None, None).await.unwrap();
        expect_event(&mut events, Event::Connected).await;
        publisher.create_stream("cam").await.unwrap();
        expect_event(&mut events, Event::Ready).await;

        // No header registered: the frame is silently dropped.
        publisher
            .post_audio(&AacFrame {
                timestamp: 0,
                data: Bytes::from_static(&[0x21]),
            })
            .await
            .unwrap();
        assert_eq!(publisher.stats().audio_frames, 0);

        server.await.unwrap();
        publisher.stop();
    }

    #[test]
    fn test_media_delta() {
        let mut last = -1i64;
        assert_eq!(media_delta(&mut last, 100), 0); // first frame pins
        assert_eq!(last, 100);
        assert_eq!(media_delta(&mut last, 133), 33);
        assert_eq!(media_delta(&mut last, 133), 0);
        assert_eq!(media_delta(&mut last, 100), 0); // clamped, never negative
        assert_eq!(last, 100);
    }
}
