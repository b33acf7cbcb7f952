//! AAC audio handling for the publish path
//!
//! RTMP carries AAC without ADTS headers. Every AUDIODATA payload starts with
//! a single descriptor byte:
//!
//! ```text
//! +-------------+-----------+-----------+-----------+
//! | SoundFormat | SoundRate | SoundSize | SoundType |
//! | (4 bits)    | (2 bits)  | (1 bit)   | (1 bit)   |
//! +-------------+-----------+-----------+-----------+
//! ```
//!
//! For AAC the descriptor is fixed per session (format 10, 16-bit samples),
//! so it is derived once from the audio header and reused for every frame.

use bytes::Bytes;

/// AAC stream configuration, registered once before audio frames flow.
#[derive(Debug, Clone)]
pub struct AacHeader {
    /// Raw AudioSpecificConfig bytes (ISO/IEC 14496-3)
    pub config: Bytes,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u8,
    /// FLV sound-rate index supplied by the encoder
    pub sample_rate_index: u8,
}

impl AacHeader {
    pub fn new(config: Bytes, channels: u8, sample_rate_index: u8) -> Self {
        Self {
            config,
            channels,
            sample_rate_index,
        }
    }

    /// The FLV AUDIODATA descriptor byte for this stream.
    pub fn flv_tag_byte(&self) -> u8 {
        let sound_format: u8 = 10; // AAC
        let sound_rate = self.sample_rate_index;
        let sound_size: u8 = 1; // 16-bit samples
        let sound_type: u8 = u8::from(self.channels == 2); // 1 = stereo

        (sound_type & 0x01)
            | ((sound_size << 1) & 0x02)
            | ((sound_rate << 2) & 0x0C)
            | ((sound_format << 4) & 0xF0)
    }
}

/// One AAC frame handed to [`crate::RtmpPublisher::post_audio`].
#[derive(Debug, Clone)]
pub struct AacFrame {
    /// Timestamp in milliseconds, relative to the start of the stream
    pub timestamp: u64,
    /// Raw AAC payload (no ADTS header)
    pub data: Bytes,
}
