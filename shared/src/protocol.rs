//! Message formats shared by client and server.
//!
//! All integers are little-endian (bincode's fixed-int encoding).
//!
//! | Message  | Bytes     | Layout                                              |
//! |----------|-----------|-----------------------------------------------------|
//! | Control  | 1         | `u8` tag, see [`Control`]                           |
//! | Delta    | 7         | `i16 row, i16 col, u8 r, u8 g, u8 b`                |
//! | Snapshot | 4 + 3·w·h | `i16 width, i16 height`, then w·h `r, g, b` triples |
//!
//! Snapshot cells are row-major. A save file on disk uses the Snapshot layout.
//!
//! On the wire each message travels in its own frame (see [`crate::framing`])
//! whose first byte names the message kind, so a 1x1 snapshot and a delta,
//! both 7 bytes, can never be mistaken for one another.

use crate::canvas::{Canvas, PixelEdit, Rgb};
use crate::error::SyncError;
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};

pub const CONTROL_LEN: usize = 1;
pub const DELTA_LEN: usize = 7;
pub const SNAPSHOT_HEADER_LEN: usize = 4;
const BYTES_PER_PIXEL: usize = 3;

const KIND_CONTROL: u8 = 0x00;
const KIND_DELTA: u8 = 0x01;
const KIND_SNAPSHOT: u8 = 0x02;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    width: i16,
    height: i16,
}

/// Connection lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Client asks to be admitted.
    Connect,
    /// Goodbye. The receiver of an unsolicited one answers with its own.
    Disconnect,
    /// Client liveness, carries no data.
    Heartbeat,
    /// Server refused admission because every slot is taken.
    Rejected,
}

impl Control {
    pub fn to_byte(self) -> u8 {
        match self {
            Control::Connect => 0x01,
            Control::Disconnect => 0x02,
            Control::Heartbeat => 0x03,
            Control::Rejected => 0x04,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Control::Connect),
            0x02 => Some(Control::Disconnect),
            0x03 => Some(Control::Heartbeat),
            0x04 => Some(Control::Rejected),
            _ => None,
        }
    }

    /// The complete frame payload for this control message.
    pub fn to_frame(self) -> Vec<u8> {
        vec![KIND_CONTROL, self.to_byte()]
    }
}

/// A decoded message in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Control(Control),
    Delta(PixelEdit),
    Snapshot(Canvas),
}

impl Packet {
    /// Short name for log lines; a snapshot's `Debug` output is the whole canvas.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Control(_) => "control",
            Packet::Delta(_) => "delta",
            Packet::Snapshot(_) => "snapshot",
        }
    }

    /// The bare message, without the frame's kind byte.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        match self {
            Packet::Control(control) => Ok(vec![control.to_byte()]),
            Packet::Delta(edit) => encode_delta(edit),
            Packet::Snapshot(canvas) => encode_snapshot(canvas),
        }
    }

    /// Kind byte followed by the message.
    pub fn to_frame(&self) -> Result<Vec<u8>, SyncError> {
        let kind = match self {
            Packet::Control(control) => return Ok(control.to_frame()),
            Packet::Delta(_) => KIND_DELTA,
            Packet::Snapshot(_) => KIND_SNAPSHOT,
        };
        let message = self.encode()?;

        let mut frame = Vec::with_capacity(1 + message.len());
        frame.push(kind);
        frame.extend(message);
        Ok(frame)
    }

    /// Decodes one frame payload. The message length is validated against
    /// its kind before any field is read.
    pub fn from_frame(frame: &[u8]) -> Result<Self, SyncError> {
        let (kind, message) = frame
            .split_first()
            .ok_or_else(|| SyncError::Protocol("empty frame".to_string()))?;

        match *kind {
            KIND_CONTROL => decode_control(message).map(Packet::Control),
            KIND_DELTA => decode_delta(message).map(Packet::Delta),
            KIND_SNAPSHOT => decode_snapshot(message).map(Packet::Snapshot),
            other => Err(SyncError::Protocol(format!(
                "unknown frame kind {:#04x}",
                other
            ))),
        }
    }
}

fn decode_control(bytes: &[u8]) -> Result<Control, SyncError> {
    match bytes {
        [byte] => Control::from_byte(*byte)
            .ok_or_else(|| SyncError::Protocol(format!("unknown control byte {:#04x}", byte))),
        _ => Err(SyncError::Protocol(format!(
            "control message must be {} byte, got {}",
            CONTROL_LEN,
            bytes.len()
        ))),
    }
}

/// Size in bytes of a snapshot of a `width` x `height` canvas.
pub const fn snapshot_len(width: i16, height: i16) -> usize {
    let width = if width < 0 { 0 } else { width as usize };
    let height = if height < 0 { 0 } else { height as usize };
    SNAPSHOT_HEADER_LEN + BYTES_PER_PIXEL * width * height
}

pub fn encode_delta(edit: &PixelEdit) -> Result<Vec<u8>, SyncError> {
    let bytes = serialize(edit)?;
    debug_assert_eq!(bytes.len(), DELTA_LEN);
    Ok(bytes)
}

/// Decodes a Delta, checking the length before reading any field.
pub fn decode_delta(bytes: &[u8]) -> Result<PixelEdit, SyncError> {
    if bytes.len() != DELTA_LEN {
        return Err(SyncError::Protocol(format!(
            "delta must be {} bytes, got {}",
            DELTA_LEN,
            bytes.len()
        )));
    }
    Ok(deserialize(bytes)?)
}

pub fn encode_snapshot(canvas: &Canvas) -> Result<Vec<u8>, SyncError> {
    let header = SnapshotHeader {
        width: canvas.width(),
        height: canvas.height(),
    };

    let mut bytes = Vec::with_capacity(snapshot_len(header.width, header.height));
    bytes.extend(serialize(&header)?);
    for pixel in canvas.pixels() {
        bytes.extend([pixel.r, pixel.g, pixel.b]);
    }
    Ok(bytes)
}

/// Decodes a Snapshot. The total length must be exactly `4 + 3 * width * height`.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Canvas, SyncError> {
    if bytes.len() < SNAPSHOT_HEADER_LEN {
        return Err(SyncError::MalformedSnapshot {
            expected: SNAPSHOT_HEADER_LEN,
            actual: bytes.len(),
        });
    }

    let header: SnapshotHeader = deserialize(&bytes[..SNAPSHOT_HEADER_LEN])?;
    if header.width < 0 || header.height < 0 {
        return Err(SyncError::InvalidDimensions {
            width: header.width,
            height: header.height,
        });
    }

    let expected = snapshot_len(header.width, header.height);
    if bytes.len() != expected {
        return Err(SyncError::MalformedSnapshot {
            expected,
            actual: bytes.len(),
        });
    }

    let pixels = bytes[SNAPSHOT_HEADER_LEN..]
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|c| Rgb::new(c[0], c[1], c[2]))
        .collect();

    Ok(Canvas::from_parts(header.width, header.height, pixels))
}
