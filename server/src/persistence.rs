//! Canvas save file.
//!
//! The file holds a bare snapshot: `i16 width, i16 height`, then row-major
//! `r, g, b` triples, little-endian, no header or version. It is read once at
//! startup and overwritten once at shutdown.

use log::{info, warn};
use shared::{Canvas, FillRule, SyncError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct CanvasFile {
    path: PathBuf,
}

impl CanvasFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the saved canvas.
    ///
    /// A missing file is `Ok(None)`. A file whose length does not match its own
    /// header is `CorruptState`.
    pub async fn load(&self) -> Result<Option<Canvas>, SyncError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Canvas::from_snapshot(&bytes)
            .map(Some)
            .map_err(|e| SyncError::CorruptState(format!("{}: {}", self.path.display(), e)))
    }

    /// Overwrites the file with `canvas`.
    pub async fn save(&self, canvas: &Canvas) -> Result<(), SyncError> {
        let bytes = canvas.to_snapshot()?;
        fs::write(&self.path, &bytes).await?;
        info!(
            "Saved {}x{} canvas to {} ({} bytes)",
            canvas.width(),
            canvas.height(),
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Loads the saved canvas, falling back to a diagonal-filled
    /// `width` x `height` canvas when the file is missing or corrupt.
    pub async fn load_or_default(&self, width: i16, height: i16) -> Result<Canvas, SyncError> {
        match self.load().await {
            Ok(Some(canvas)) => {
                info!(
                    "Loaded {}x{} canvas from {}",
                    canvas.width(),
                    canvas.height(),
                    self.path.display()
                );
                Ok(canvas)
            }
            Ok(None) => {
                info!(
                    "No saved canvas at {}, starting with a {}x{} default",
                    self.path.display(),
                    width,
                    height
                );
                Canvas::new(width, height, FillRule::Diagonal)
            }
            Err(SyncError::CorruptState(reason)) => {
                warn!("Ignoring saved canvas: {}", reason);
                Canvas::new(width, height, FillRule::Diagonal)
            }
            Err(e) => Err(e),
        }
    }
}
