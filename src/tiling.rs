// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use imageproc::rect::Rect;

use crate::error::{QuantError, Result};

/// Partitions a `width` x `height` image into tiles, in raster order. Tiles in
/// the last row/column are clipped to the image, so every pixel belongs to
/// exactly one tile.
#[derive(Copy, Clone, Debug)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_width: u32, tile_height: u32)
               -> Result<TileGrid> {
        if tile_width == 0 || tile_height == 0 {
            return Err(QuantError::InvalidTileSize(tile_width, tile_height));
        }
        Ok(TileGrid{width, height, tile_width, tile_height})
    }

    /// A grid with a single tile spanning the whole image, or with square
    /// tiles of `tile_size` if given.
    pub fn for_image(width: u32, height: u32, tile_size: Option<u32>) -> Result<TileGrid> {
        match tile_size {
            Some(size) => TileGrid::new(width, height, size, size),
            None => TileGrid::new(width, height, width.max(1), height.max(1)),
        }
    }

    /// (columns, rows).
    pub fn num_tiles(&self) -> (u32, u32) {
        (self.width.div_ceil(self.tile_width), self.height.div_ceil(self.tile_height))
    }

    pub fn tiles(&self) -> impl Iterator<Item = Rect> + '_ {
        let (cols, rows) = self.num_tiles();
        (0..rows).flat_map(move |row| (0..cols).map(move |col| self.tile(col, row)))
    }

    fn tile(&self, col: u32, row: u32) -> Rect {
        let x = col * self.tile_width;
        let y = row * self.tile_height;
        let w = self.tile_width.min(self.width - x);
        let h = self.tile_height.min(self.height - y);
        Rect::at(x as i32, y as i32).of_size(w, h)
    }

    /// Grows `rect` by `margin` pixels on every side, clipped to the image.
    pub fn expand(&self, rect: &Rect, margin: u32) -> Rect {
        let margin = margin as i32;
        let left = (rect.left() - margin).max(0);
        let top = (rect.top() - margin).max(0);
        let right = (rect.right() + margin).min(self.width as i32 - 1);
        let bottom = (rect.bottom() + margin).min(self.height as i32 - 1);
        Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32)
    }
}

/// Offset of `core` inside `outer`, which must contain it.
pub fn core_offset(outer: &Rect, core: &Rect) -> (u32, u32) {
    assert!(core.left() >= outer.left() && core.top() >= outer.top());
    ((core.left() - outer.left()) as u32, (core.top() - outer.top()) as u32)
}

// mod tests.
