//! Stream framing for the TCP transport.
//!
//! Every message travels in one length-delimited frame:
//!
//! ```text
//! u32 payload length (little-endian) | u8 kind | message
//! ```
//!
//! The length prefix belongs to the transport only. The kind byte and message
//! are produced by [`Packet::to_frame`](crate::Packet::to_frame).

use crate::protocol::{snapshot_len, DELTA_LEN};
use tokio_util::codec::LengthDelimitedCodec;

/// Length of the kind byte in front of every message.
pub const FRAME_KIND_LEN: usize = 1;

/// Largest frame a client sends: a Delta.
pub const MAX_CLIENT_FRAME_LEN: usize = FRAME_KIND_LEN + DELTA_LEN;

/// Largest frame a server sends: a snapshot of a 32767 x 32767 canvas.
pub const MAX_SERVER_FRAME_LEN: usize = FRAME_KIND_LEN + snapshot_len(i16::MAX, i16::MAX);

/// Codec accepting frames of at most `max_frame_len` payload bytes in either
/// direction. Larger frames fail with an `InvalidData` I/O error.
pub fn codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .little_endian()
        .max_frame_length(max_frame_len)
        .new_codec()
}
