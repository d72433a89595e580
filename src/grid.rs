use crate::error::{PrepError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Tile edge length, stride and resampling factor of an output tile grid.
///
/// `tile_size` and `stride` are expressed in destination pixels. When
/// `resize` is larger than 1 the source raster is cut with windows of
/// `tile_size / resize` pixels which are then upsampled to `tile_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGridSpec {
    pub tile_size: usize,
    pub stride: usize,
    pub resize: u32,
}

impl TileGridSpec {
    pub fn new(tile_size: usize, stride: Option<usize>, resize: u32) -> Result<Self> {
        let stride = stride.unwrap_or(tile_size);
        if tile_size == 0 || stride == 0 {
            return Err(PrepError::InvalidGrid(tile_size, stride));
        }
        // both sizes are cut in source pixels, so both must divide exactly
        src_tile_size(tile_size, resize)?;
        src_tile_size(stride, resize)?;
        Ok(Self {
            tile_size,
            stride,
            resize,
        })
    }

    /// Window size read from the source raster for each tile.
    pub fn src_tile_size(&self) -> usize {
        self.tile_size / self.resize.max(1) as usize
    }

    pub fn src_stride(&self) -> usize {
        self.stride / self.resize.max(1) as usize
    }

    /// Number of tiles the grid yields over a `width` x `height` source raster.
    pub fn expected_tiles(&self, width: usize, height: usize) -> usize {
        expected_tile_count(width, height, self.src_tile_size(), self.src_stride())
    }
}

/// Source tile size for a destination size and resize factor.
pub fn src_tile_size(dest_tile_size: usize, resize: u32) -> Result<usize> {
    if resize == 0 || dest_tile_size % resize as usize != 0 {
        return Err(PrepError::InvalidResize {
            tile_size: dest_tile_size,
            resize,
        });
    }
    Ok(dest_tile_size / resize as usize)
}

/// `1 + ceil((dimension - tile) / stride)`, never negative.
pub fn tiles_per_axis(dimension: usize, tile: usize, stride: usize) -> usize {
    let diff = dimension as i64 - tile as i64;
    let stride = stride as i64;
    let steps = if diff >= 0 {
        (diff + stride - 1) / stride
    } else {
        -((-diff) / stride)
    };
    (1 + steps).max(0) as usize
}

pub fn expected_tile_count(width: usize, height: usize, tile: usize, stride: usize) -> usize {
    tiles_per_axis(width, tile, stride) * tiles_per_axis(height, tile, stride)
}

/// One tile window in source pixel coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileWindow {
    pub row: usize,
    pub col: usize,
    pub x_off: usize,
    pub y_off: usize,
    /// Window edge in source pixels (may extend past the raster edge).
    pub size: usize,
    // Part of the window that lies inside the raster
    pub read_width: usize,
    pub read_height: usize,
}

impl TileWindow {
    pub fn is_padded(&self) -> bool {
        self.read_width < self.size || self.read_height < self.size
    }
}

pub struct TileGrid {
    raster_width: usize,
    raster_height: usize,
    tile_size: usize,
    stride: usize,
    pub tiles_x: usize,
    pub tiles_y: usize,
    pub total_tiles: usize,
}

impl TileGrid {
    pub fn new(raster_width: usize, raster_height: usize, spec: &TileGridSpec) -> Self {
        let tile_size = spec.src_tile_size();
        let stride = spec.src_stride();
        let tiles_x = tiles_per_axis(raster_width, tile_size, stride);
        let tiles_y = tiles_per_axis(raster_height, tile_size, stride);
        let total_tiles = tiles_x * tiles_y;

        debug!(
            "TileGrid: {}x{} raster, tile={}, stride={} → {}x{} tiles ({} total)",
            raster_width, raster_height, tile_size, stride, tiles_x, tiles_y, total_tiles
        );

        Self {
            raster_width,
            raster_height,
            tile_size,
            stride,
            tiles_x,
            tiles_y,
            total_tiles,
        }
    }

    pub fn iter(&self) -> TileWindowIterator<'_> {
        TileWindowIterator {
            grid: self,
            current_idx: 0,
        }
    }

    pub fn window(&self, tile_idx: usize) -> TileWindow {
        let row = tile_idx / self.tiles_x;
        let col = tile_idx % self.tiles_x;

        let x_off = col * self.stride;
        let y_off = row * self.stride;
        let read_width = self.tile_size.min(self.raster_width.saturating_sub(x_off));
        let read_height = self.tile_size.min(self.raster_height.saturating_sub(y_off));

        TileWindow {
            row,
            col,
            x_off,
            y_off,
            size: self.tile_size,
            read_width,
            read_height,
        }
    }
}

pub struct TileWindowIterator<'a> {
    grid: &'a TileGrid,
    current_idx: usize,
}

impl<'a> Iterator for TileWindowIterator<'a> {
    type Item = TileWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.grid.total_tiles {
            let window = self.grid.window(self.current_idx);
            self.current_idx += 1;
            Some(window)
        } else {
            None
        }
    }
}
