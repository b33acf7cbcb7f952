//! AMF0 (Action Message Format) implementation
//!
//! AMF0 is Adobe's binary serialization format used in RTMP for encoding
//! command parameters and metadata. The publisher negotiates AMF0 only, so
//! this module covers the value kinds RTMP commands actually use: number,
//! boolean, string, object, null and ECMA array.

pub mod amf0;
pub mod value;

pub use amf0::Amf0Encoder;
pub use value::AmfValue;
