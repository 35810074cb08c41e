//! Types shared by the canvas server and its clients: the pixel grid, the
//! message codec, stream framing and the error taxonomy.

pub mod canvas;
pub mod error;
pub mod framing;
pub mod protocol;

pub use canvas::{Canvas, FillRule, PixelEdit, Rgb};
pub use error::SyncError;
pub use protocol::{Control, Packet};

pub const DEFAULT_PORT: u16 = 9999;
pub const MAX_PEERS: usize = 8;
pub const DEFAULT_WIDTH: i16 = 100;
pub const DEFAULT_HEIGHT: i16 = 100;
