//! RTMP publish demo
//!
//! Run with: cargo run --example publish -- <host> <app> <playpath>
//!
//! This connects to an RTMP server, opens a publishing stream and sends a
//! short burst of synthetic H.264-shaped frames. Point it at a local
//! nginx-rtmp or similar to watch the command exchange in the logs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use rtmp_mux::{
    AacFrame, AacHeader, ConnectionListener, Error, H264Frame, MonotonicClock, RtmpPublisher,
    StreamDataFrame,
};

enum Event {
    Connected,
    Ready,
    Failed(String),
}

struct Listener(mpsc::UnboundedSender<Event>);

#[async_trait::async_trait]
impl ConnectionListener for Listener {
    async fn on_connected(&self) {
        let _ = self.0.send(Event::Connected);
    }

    async fn on_ready_to_publish(&self) {
        let _ = self.0.send(Event::Ready);
    }

    async fn on_connection_error(&self, error: Error) {
        let _ = self.0.send(Event::Failed(error.to_string()));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_mux=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let app = args.next().unwrap_or_else(|| "live".to_string());
    let playpath = args.next().unwrap_or_else(|| "demo".to_string());

    println!("Publishing to rtmp://{}/{}/{}", host, app, playpath);

    let clock = Arc::new(MonotonicClock::new());
    let mut publisher = RtmpPublisher::new(host, 1935, clock);

    let (tx, mut events) = mpsc::unbounded_channel();
    publisher
        .start(Arc::new(Listener(tx)), &app, None, None)
        .await?;

    loop {
        match events.recv().await {
            Some(Event::Connected) => {
                println!("Connected, creating stream");
                publisher.create_stream(&playpath).await?;
            }
            Some(Event::Ready) => {
                println!("Ready to publish");
                break;
            }
            Some(Event::Failed(message)) => {
                eprintln!("Connection failed: {}", message);
                return Ok(());
            }
            None => return Ok(()),
        }
    }

    publisher
        .send_data_frame(&StreamDataFrame {
            width: 1280,
            height: 720,
            framerate: 30,
            audio_sample_rate: 44100,
            video_codec_id: 7,
            audio_codec_id: 10,
        })
        .await?;

    // AAC-LC, 44.1 kHz, stereo
    publisher.set_audio_header(AacHeader::new(Bytes::from_static(&[0x12, 0x10]), 2, 3));

    // Synthetic frames; a real caller feeds encoder output here.
    for i in 0u64..30 {
        publisher
            .post_video(&H264Frame {
                timestamp: i * 33,
                is_header: false,
                is_keyframe: i % 10 == 0,
                data: Bytes::from(vec![0x65, 0x88, (i & 0xFF) as u8, 0x00]),
            })
            .await?;
        publisher
            .post_audio(&AacFrame {
                timestamp: i * 33,
                data: Bytes::from(vec![0x21, (i & 0xFF) as u8]),
            })
            .await?;
        tokio::time::sleep(Duration::from_millis(33)).await;
    }

    let stats = publisher.stats();
    println!(
        "Sent {} video / {} audio frames, {} bytes",
        stats.video_frames, stats.audio_frames, stats.bytes_sent
    );

    publisher.delete_stream().await?;
    publisher.stop();
    Ok(())
}
