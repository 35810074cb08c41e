//! Client-side copy of the canvas.
//!
//! The mirror is seeded from the server's snapshot and then only ever moves
//! forward by applying edits. Local edits are applied optimistically before the
//! server has seen them; the server echoes every edit it accepts, so a local
//! edit that lost a race is overwritten by the winning one when its broadcast
//! arrives. Applying an edit is idempotent, so the echo of our own edit is
//! harmless.

use log::debug;
use shared::{Canvas, PixelEdit, SyncError};

#[derive(Debug, Clone)]
pub struct CanvasMirror {
    canvas: Canvas,
}

impl CanvasMirror {
    pub fn new(canvas: Canvas) -> Self {
        Self { canvas }
    }

    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, SyncError> {
        Ok(Self::new(Canvas::from_snapshot(bytes)?))
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Applies an edit made on this client before sending it upstream.
    pub fn apply_local(&mut self, edit: &PixelEdit) -> Result<(), SyncError> {
        self.canvas.apply(edit)
    }

    /// Applies an edit broadcast by the server.
    pub fn apply_remote(&mut self, edit: &PixelEdit) -> Result<(), SyncError> {
        debug!(
            "Remote edit ({}, {}) = {:?}",
            edit.row, edit.col, edit.color
        );
        self.canvas.apply(edit)
    }

    /// Replaces the whole mirror with a fresh snapshot from the server.
    pub fn resync(&mut self, canvas: Canvas) {
        self.canvas = canvas;
    }
}
