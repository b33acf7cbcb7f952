//! H.264/AVC handling for the publish path
//!
//! Encoders hand the publisher an Annex-B style config buffer
//! (`00 00 00 01 <SPS> 00 00 00 01 <PPS>`) once, then length-delimited frame
//! payloads. RTMP wants the config repackaged as an
//! AVCDecoderConfigurationRecord inside the AVC sequence header:
//!
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1)
//! | numOfSPS (1) | spsLength (2) | spsNALUnit
//! | numOfPPS (1) | ppsLength (2) | ppsNALUnit
//! ```
//!
//! Reference: ISO/IEC 14496-15 section 5.2.4.1

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// One H.264 frame handed to [`crate::RtmpPublisher::post_video`].
#[derive(Debug, Clone)]
pub struct H264Frame {
    /// Timestamp in milliseconds, relative to the start of the stream
    pub timestamp: u64,
    /// True for the codec-config buffer (SPS/PPS), false for picture data
    pub is_header: bool,
    /// True if the frame is an IDR keyframe
    pub is_keyframe: bool,
    /// Frame bytes: Annex-B config for headers, a single NALU otherwise
    pub data: Bytes,
}

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Split an Annex-B config buffer into its SPS and PPS.
///
/// The buffer is expected to be `00 00 00 01 <SPS> 00 00 00 01 <PPS>`; the
/// split point is the second start code.
pub fn split_parameter_sets(data: &[u8]) -> Result<(Bytes, Bytes)> {
    if data.len() < 8 {
        return Err(Error::InvalidArgument(
            "video header too short for SPS/PPS".into(),
        ));
    }
    if data[..4] != START_CODE {
        tracing::debug!("video header does not start with an Annex-B start code");
    }

    let pps_index = data[4..]
        .windows(4)
        .position(|w| w == START_CODE)
        .map(|pos| 4 + pos + 4)
        .ok_or_else(|| Error::InvalidArgument("no PPS start code in video header".into()))?;

    let sps = Bytes::copy_from_slice(&data[4..pps_index - 4]);
    let pps = Bytes::copy_from_slice(&data[pps_index..]);

    if sps.len() < 4 {
        return Err(Error::InvalidArgument("SPS too short".into()));
    }
    if pps.is_empty() {
        return Err(Error::InvalidArgument("empty PPS".into()));
    }

    Ok((sps, pps))
}

/// Build the AVCDecoderConfigurationRecord for one SPS and one PPS.
///
/// Profile and level are lifted straight out of the SPS
/// (`profile_idc` at byte 1, `level_idc` at byte 3); NALU lengths are always
/// written on 4 bytes, so lengthSizeMinusOne is 3.
pub fn avc_decoder_configuration_record(sps: &[u8], pps: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());

    buf.put_u8(1); // configurationVersion
    buf.put_u8(sps[1]); // AVCProfileIndication
    buf.put_u8(0); // profile_compatibility
    buf.put_u8(sps[3]); // AVCLevelIndication
    buf.put_u8(3); // lengthSizeMinusOne

    buf.put_u8(1); // numOfSequenceParameterSets
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);

    buf.put_u8(1); // numOfPictureParameterSets
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 8] = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40, 0x50];
    const PPS: [u8; 4] = [0x68, 0xEF, 0x38, 0x80];

    fn annex_b() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&START_CODE);
        data.extend_from_slice(&SPS);
        data.extend_from_slice(&START_CODE);
        data.extend_from_slice(&PPS);
        data
    }

    #[test]
    fn test_split_parameter_sets() {
        let (sps, pps) = split_parameter_sets(&annex_b()).unwrap();
        assert_eq!(sps.as_ref(), &SPS);
        assert_eq!(pps.as_ref(), &PPS);
    }

    #[test]
    fn test_split_rejects_missing_pps() {
        let mut data = Vec::new();
        data.extend_from_slice(&START_CODE);
        data.extend_from_slice(&SPS);
        assert!(split_parameter_sets(&data).is_err());
    }

    #[test]
    fn test_split_rejects_short_buffer() {
        assert!(split_parameter_sets(&[0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_configuration_record_layout() {
        let record = avc_decoder_configuration_record(&SPS, &PPS);

        assert_eq!(record.len(), 11 + SPS.len() + PPS.len());
        assert_eq!(record[0], 1); // version
        assert_eq!(record[1], 0x64); // profile_idc from SPS byte 1 (High)
        assert_eq!(record[2], 0);
        assert_eq!(record[3], 0x1F); // level_idc from SPS byte 3 (3.1)
        assert_eq!(record[4], 3); // 4-byte NALU lengths
        assert_eq!(record[5], 1); // one SPS
        assert_eq!(&record[6..8], &[0x00, SPS.len() as u8]);
        assert_eq!(&record[8..8 + SPS.len()], &SPS);
        let pps_at = 8 + SPS.len();
        assert_eq!(record[pps_at], 1); // one PPS
        assert_eq!(
            &record[pps_at + 1..pps_at + 3],
            &[0x00, PPS.len() as u8]
        );
        assert_eq!(&record[pps_at + 3..], &PPS);
    }
}
