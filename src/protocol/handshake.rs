//! RTMP handshake, client side
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//! ```
//!
//! This is the "simple" handshake (no HMAC digest). C0 and C1 go out as a
//! single 1537-byte write; S2 is read and discarded without validating the
//! echo.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Build C0 + C1 as one buffer (1537 bytes).
///
/// C1 layout: 4-byte timestamp (big-endian), 4 zero bytes, 1528 bytes of
/// pseudo-random filler.
pub fn client_hello(timestamp: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);

    // C0: version
    buf.put_u8(RTMP_VERSION);

    // C1: time + zero + random
    buf.put_u32(timestamp);
    buf.put_u32(0);
    buf.put_slice(&random_filler(timestamp));

    buf.freeze()
}

/// Build C2 as an echo of S1 with the first four bytes replaced by the
/// milliseconds elapsed since C0/C1 went out.
pub fn client_echo(s1: &[u8], elapsed_ms: u32) -> Bytes {
    debug_assert_eq!(s1.len(), HANDSHAKE_SIZE);

    let mut buf = BytesMut::with_capacity(HANDSHAKE_SIZE);
    buf.put_u32(elapsed_ms);
    buf.put_slice(&s1[4..]);
    buf.freeze()
}

/// Check the server version byte from S0.
pub fn validate_server_version(s0: u8) -> Result<()> {
    if s0 != RTMP_VERSION {
        return Err(HandshakeError::UnsupportedVersion(s0).into());
    }
    Ok(())
}

/// Fill the random field of C1.
///
/// The handshake does not require cryptographic randomness, so a simple LCG
/// seeded with the timestamp is enough.
fn random_filler(seed: u32) -> [u8; HANDSHAKE_SIZE - 8] {
    let mut filler = [0u8; HANDSHAKE_SIZE - 8];
    let mut state = seed as u64 | 1;
    for chunk in filler.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        let len = chunk.len().min(8);
        chunk[..len].copy_from_slice(&bytes[..len]);
    }
    filler
}
