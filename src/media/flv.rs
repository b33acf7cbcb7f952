//! FLV payload envelopes
//!
//! RTMP reuses the FLV tag body layout for its AUDIO/VIDEO message payloads.
//! The builders here produce complete message payloads ready for chunking.
//!
//! ```text
//! Video sequence header: 17 00 00 00 00 || AVCDecoderConfigurationRecord
//! Video NALU:            [17|27] 01 00 00 00 || nalu_len(4, BE) || NALU
//! Audio sequence header: <desc> 00 || AudioSpecificConfig
//! Audio raw:             <desc> 01 || AAC payload
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::amf::AmfValue;

/// Frame type / codec byte for an AVC keyframe
pub const VIDEO_KEYFRAME_AVC: u8 = 0x17;

/// Frame type / codec byte for an AVC inter frame
pub const VIDEO_INTERFRAME_AVC: u8 = 0x27;

/// AVC packet type: sequence header
pub const AVC_PACKET_SEQUENCE_HEADER: u8 = 0;

/// AVC packet type: NALU
pub const AVC_PACKET_NALU: u8 = 1;

/// AAC packet type: sequence header
pub const AAC_PACKET_SEQUENCE_HEADER: u8 = 0;

/// AAC packet type: raw frame
pub const AAC_PACKET_RAW: u8 = 1;

/// Byte overhead of the video NALU envelope ahead of the payload
pub const VIDEO_TAG_OVERHEAD: usize = 9;

/// Byte overhead of the audio envelope ahead of the payload
pub const AUDIO_TAG_OVERHEAD: usize = 2;

/// Build the AVC sequence header payload from an
/// AVCDecoderConfigurationRecord.
pub fn video_sequence_header(config_record: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + config_record.len());
    buf.put_u8(VIDEO_KEYFRAME_AVC);
    buf.put_u8(AVC_PACKET_SEQUENCE_HEADER);
    buf.put_slice(&[0, 0, 0]); // composition time
    buf.put_slice(config_record);
    buf.freeze()
}

/// Build a VIDEODATA payload for one NALU: envelope, zero composition-time
/// offset, 4-byte NALU length, then the payload.
pub fn video_frame_tag(keyframe: bool, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(VIDEO_TAG_OVERHEAD + data.len());
    buf.put_u8(if keyframe {
        VIDEO_KEYFRAME_AVC
    } else {
        VIDEO_INTERFRAME_AVC
    });
    buf.put_u8(AVC_PACKET_NALU);
    buf.put_slice(&[0, 0, 0]); // composition time
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Build the AAC sequence header payload carrying the AudioSpecificConfig.
pub fn audio_sequence_header(tag_byte: u8, config: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(AUDIO_TAG_OVERHEAD + config.len());
    buf.put_u8(tag_byte);
    buf.put_u8(AAC_PACKET_SEQUENCE_HEADER);
    buf.put_slice(config);
    buf.freeze()
}

/// Build an AUDIODATA payload for one raw AAC frame.
pub fn audio_frame_tag(tag_byte: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(AUDIO_TAG_OVERHEAD + data.len());
    buf.put_u8(tag_byte);
    buf.put_u8(AAC_PACKET_RAW);
    buf.put_slice(data);
    buf.freeze()
}

/// Stream configuration advertised to the server via `@setDataFrame`.
#[derive(Debug, Clone, Copy)]
pub struct StreamDataFrame {
    /// Video width in pixels
    pub width: i32,
    /// Video height in pixels
    pub height: i32,
    /// Video framerate in fps
    pub framerate: i32,
    /// Audio sample rate in Hz
    pub audio_sample_rate: i32,
    /// FLV video codec ID (7 for AVC)
    pub video_codec_id: i32,
    /// FLV audio codec ID (10 for AAC)
    pub audio_codec_id: i32,
}

impl StreamDataFrame {
    /// The `onMetaData` key/value pairs for this configuration.
    pub fn to_values(&self) -> HashMap<String, AmfValue> {
        let mut map = HashMap::with_capacity(6);
        map.insert("width".to_string(), AmfValue::from(self.width));
        map.insert("height".to_string(), AmfValue::from(self.height));
        map.insert("framerate".to_string(), AmfValue::from(self.framerate));
        map.insert(
            "audiosamplerate".to_string(),
            AmfValue::from(self.audio_sample_rate),
        );
        map.insert(
            "videocodecid".to_string(),
            AmfValue::from(self.video_codec_id),
        );
        map.insert(
            "audiocodecid".to_string(),
            AmfValue::from(self.audio_codec_id),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_sequence_header_prefix() {
        let record = [1u8, 0x64, 0, 0x1F, 3];
        let tag = video_sequence_header(&record);
        assert_eq!(&tag[..5], &[0x17, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&tag[5..], &record);
    }

    #[test]
    fn test_video_frame_tag_layout() {
        let tag = video_frame_tag(true, &[0x65, 0x88, 0x11]);
        assert_eq!(tag.len(), VIDEO_TAG_OVERHEAD + 3);
        assert_eq!(tag[0], 0x17);
        assert_eq!(tag[1], 0x01);
        assert_eq!(&tag[2..5], &[0, 0, 0]);
        assert_eq!(&tag[5..9], &[0, 0, 0, 3]); // NALU length
        assert_eq!(&tag[9..], &[0x65, 0x88, 0x11]);

        let tag = video_frame_tag(false, &[0x41]);
        assert_eq!(tag[0], 0x27);
    }

    #[test]
    fn test_audio_tags() {
        let seq = audio_sequence_header(0xAF, &[0x12, 0x10]);
        assert_eq!(seq.as_ref(), &[0xAF, 0x00, 0x12, 0x10]);

        let frame = audio_frame_tag(0xAF, &[0xDE, 0xAD]);
        assert_eq!(frame.as_ref(), &[0xAF, 0x01, 0xDE, 0xAD]);
    }

    #[test]
    fn test_data_frame_values() {
        let frame = StreamDataFrame {
            width: 1280,
            height: 720,
            framerate: 30,
            audio_sample_rate: 44100,
            video_codec_id: 7,
            audio_codec_id: 10,
        };
        let values = frame.to_values();
        assert_eq!(values.len(), 6);
        assert_eq!(values.get("width"), Some(&AmfValue::Number(1280.0)));
        assert_eq!(
            values.get("audiosamplerate"),
            Some(&AmfValue::Number(44100.0))
        );
        assert_eq!(values.get("videocodecid"), Some(&AmfValue::Number(7.0)));
    }
}
