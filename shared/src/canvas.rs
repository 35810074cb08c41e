//! The pixel grid every process keeps a copy of.
//!
//! A canvas is a single contiguous buffer of [`Rgb`] cells indexed by
//! `row * width + col`. The server owns the authoritative copy; each client owns
//! a mirror. Nothing here is shared between threads, so there is no locking.

use crate::error::SyncError;
use crate::protocol;
use serde::{Deserialize, Serialize};

/// One cell of the canvas. No alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A single-pixel mutation, the payload of a Delta message.
///
/// Field order matches the wire layout: row, col, then the three channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelEdit {
    pub row: i16,
    pub col: i16,
    pub color: Rgb,
}

impl PixelEdit {
    pub fn new(row: i16, col: i16, color: Rgb) -> Self {
        Self { row, col, color }
    }
}

/// How a freshly allocated canvas is painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    /// White where `row == col`, black everywhere else.
    #[default]
    Diagonal,
    Solid(Rgb),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: i16,
    height: i16,
    pixels: Vec<Rgb>,
}

impl Canvas {
    /// Allocates a `width` x `height` canvas painted according to `fill`.
    ///
    /// Negative dimensions are rejected; zero-sized canvases are allowed and
    /// simply contain no cells.
    pub fn new(width: i16, height: i16, fill: FillRule) -> Result<Self, SyncError> {
        if width < 0 || height < 0 {
            return Err(SyncError::InvalidDimensions { width, height });
        }

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height {
            for col in 0..width {
                let color = match fill {
                    FillRule::Diagonal if row == col => Rgb::WHITE,
                    FillRule::Diagonal => Rgb::BLACK,
                    FillRule::Solid(color) => color,
                };
                pixels.push(color);
            }
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Builds a canvas from already laid out row-major cells.
    pub(crate) fn from_parts(width: i16, height: i16, pixels: Vec<Rgb>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Parses a Snapshot message (or a save file, which has the same layout).
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, SyncError> {
        protocol::decode_snapshot(bytes)
    }

    pub fn to_snapshot(&self) -> Result<Vec<u8>, SyncError> {
        protocol::encode_snapshot(self)
    }

    pub fn width(&self) -> i16 {
        self.width
    }

    pub fn height(&self) -> i16 {
        self.height
    }

    /// Row-major view of every cell.
    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn get_pixel(&self, row: i16, col: i16) -> Result<Rgb, SyncError> {
        let index = self.index(row, col)?;
        Ok(self.pixels[index])
    }

    /// Overwrites one cell. Last write wins; there is no version check.
    ///
    /// An out-of-range position fails with [`SyncError::OutOfBounds`] and leaves
    /// the canvas untouched.
    pub fn set_pixel(&mut self, row: i16, col: i16, color: Rgb) -> Result<(), SyncError> {
        let index = self.index(row, col)?;
        self.pixels[index] = color;
        Ok(())
    }

    pub fn apply(&mut self, edit: &PixelEdit) -> Result<(), SyncError> {
        self.set_pixel(edit.row, edit.col, edit.color)
    }

    pub fn contains(&self, row: i16, col: i16) -> bool {
        (0..self.height).contains(&row) && (0..self.width).contains(&col)
    }

    fn index(&self, row: i16, col: i16) -> Result<usize, SyncError> {
        if !self.contains(row, col) {
            return Err(SyncError::OutOfBounds {
                row,
                col,
                width: self.width,
                height: self.height,
            });
        }
        Ok(row as usize * self.width as usize + col as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const RED: Rgb = Rgb::new(255, 0, 0);

    #[test]
    fn test_diagonal_fill() {
        let canvas = Canvas::new(3, 3, FillRule::Diagonal).unwrap();

        for row in 0..3 {
            for col in 0..3 {
                let expected = if row == col { Rgb::WHITE } else { Rgb::BLACK };
                assert_eq!(canvas.get_pixel(row, col).unwrap(), expected);
            }
        }
        assert_eq!(canvas.get_pixel(1, 1).unwrap(), Rgb::new(255, 255, 255));
        assert_eq!(canvas.get_pixel(0, 1).unwrap(), Rgb::new(0, 0, 0));
    }

    #[test]
    fn test_diagonal_fill_non_square() {
        let canvas = Canvas::new(4, 2, FillRule::Diagonal).unwrap();
        assert_eq!(canvas.pixels().len(), 8);
        assert_eq!(canvas.get_pixel(1, 1).unwrap(), Rgb::WHITE);
        assert_eq!(canvas.get_pixel(1, 3).unwrap(), Rgb::BLACK);
    }

    #[test]
    fn test_negative_dimensions_rejected() {
        let result = Canvas::new(-1, 4, FillRule::Diagonal);
        assert!(matches!(
            result,
            Err(SyncError::InvalidDimensions {
                width: -1,
                height: 4
            })
        ));
    }

    #[test]
    fn test_empty_canvas() {
        let canvas = Canvas::new(0, 0, FillRule::Diagonal).unwrap();
        assert!(canvas.pixels().is_empty());
        assert_err!(canvas.get_pixel(0, 0));
    }

    #[test]
    fn test_set_pixel_row_major_layout() {
        let mut canvas = Canvas::new(3, 2, FillRule::Solid(Rgb::BLACK)).unwrap();
        assert_ok!(canvas.set_pixel(1, 2, RED));

        assert_eq!(canvas.pixels()[5], RED);
        assert_eq!(canvas.get_pixel(1, 2).unwrap(), RED);
    }

    #[test]
    fn test_set_pixel_out_of_bounds_leaves_canvas_unchanged() {
        let mut canvas = Canvas::new(3, 3, FillRule::Diagonal).unwrap();
        let before = canvas.clone();

        for (row, col) in [(3, 0), (0, 3), (-1, 0), (0, -1), (5, 1), (i16::MAX, i16::MAX)] {
            let result = canvas.set_pixel(row, col, RED);
            assert!(
                matches!(result, Err(SyncError::OutOfBounds { .. })),
                "({}, {}) should be rejected",
                row,
                col
            );
        }

        assert_eq!(canvas, before);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let edit = PixelEdit::new(0, 1, RED);

        let mut once = Canvas::new(2, 2, FillRule::Solid(Rgb::BLACK)).unwrap();
        once.apply(&edit).unwrap();

        let mut twice = Canvas::new(2, 2, FillRule::Solid(Rgb::BLACK)).unwrap();
        twice.apply(&edit).unwrap();
        twice.apply(&edit).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_last_write_wins() {
        let mut canvas = Canvas::new(2, 2, FillRule::Solid(Rgb::BLACK)).unwrap();
        canvas.set_pixel(0, 0, RED).unwrap();
        canvas.set_pixel(0, 0, Rgb::WHITE).unwrap();
        assert_eq!(canvas.get_pixel(0, 0).unwrap(), Rgb::WHITE);
    }
}
