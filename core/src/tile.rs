//! Screen tile grid and conservative AABB-based triangle binning (C6).

use crate::shader::MAX_VARYINGS;

/// One post-clip, post-viewport-transform vertex as stored in a triangle
/// record: screen-space x/y, `1/w`, and the post-divide depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenVertex {
    pub x: f32,
    pub y: f32,
    pub inv_w: f32,
    pub z: f32,
}

/// Bump-pool entry: three screen-space vertices and their perspective-
/// divided varyings. Plain old data — the bump allocator never drops it.
#[derive(Debug, Clone, Copy)]
pub struct TriangleRecord {
    pub positions: [ScreenVertex; 3],
    pub varyings: [[f32; MAX_VARYINGS]; 3],
    pub varying_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCommandKind {
    DrawTriangle,
    Clear,
}

#[derive(Debug, Clone, Copy)]
pub struct TileCommand {
    pub kind: TileCommandKind,
    pub pipeline_id: u16,
    pub data_index: u32,
}

#[derive(Debug, Default)]
pub struct Tile {
    pub commands: Vec<TileCommand>,
}

impl Tile {
    fn reset(&mut self) {
        self.commands.clear();
    }
}

/// Divides a `width × height` framebuffer into `tile_size`-pixel square
/// tiles and assigns draw commands to every tile whose bounding rectangle
/// a triangle's screen-space AABB touches. Binning is conservative: a
/// triangle may be listed in a tile it does not actually cover, left for
/// the rasterizer's per-pixel test to resolve.
pub struct TileBinner {
    tile_size: u32,
    grid_width: u32,
    grid_height: u32,
    tiles: Vec<Tile>,
}

impl TileBinner {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let grid_width = (width + tile_size - 1) / tile_size;
        let grid_height = (height + tile_size - 1) / tile_size;
        let tiles = (0..(grid_width * grid_height) as usize)
            .map(|_| Tile::default())
            .collect();
        TileBinner {
            tile_size,
            grid_width,
            grid_height,
            tiles,
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn grid_width(&self) -> u32 {
        self.grid_width
    }

    pub fn grid_height(&self) -> u32 {
        self.grid_height
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, index: usize) -> &Tile {
        &self.tiles[index]
    }

    pub fn tile_commands(&self, tx: u32, ty: u32) -> &[TileCommand] {
        &self.tiles[(ty * self.grid_width + tx) as usize].commands
    }

    /// Clears every tile's command sequence, retaining its `Vec` capacity
    /// across frames.
    pub fn reset(&mut self) {
        for tile in &mut self.tiles {
            tile.reset();
        }
    }

    /// Bins a triangle (given its three screen-space positions) by
    /// computing its AABB, mapping to tile coordinates, clamping to the
    /// grid, and appending a `DrawTriangle` command to every tile in that
    /// rectangle.
    pub fn bin_triangle(&mut self, positions: &[ScreenVertex; 3], pipeline_id: u16, data_index: u32) {
        let min_x = positions.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let max_x = positions
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max);
        let min_y = positions.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let max_y = positions
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max);

        let min_tx = ((min_x / self.tile_size as f32).floor().max(0.0)) as u32;
        let min_ty = ((min_y / self.tile_size as f32).floor().max(0.0)) as u32;
        let max_tx = (((max_x / self.tile_size as f32).floor()) as i64)
            .clamp(0, self.grid_width as i64 - 1) as u32;
        let max_ty = (((max_y / self.tile_size as f32).floor()) as i64)
            .clamp(0, self.grid_height as i64 - 1) as u32;
        let min_tx = min_tx.min(self.grid_width.saturating_sub(1));
        let min_ty = min_ty.min(self.grid_height.saturating_sub(1));

        for ty in min_ty..=max_ty {
            for tx in min_tx..=max_tx {
                let idx = (ty * self.grid_width + tx) as usize;
                self.tiles[idx].commands.push(TileCommand {
                    kind: TileCommandKind::DrawTriangle,
                    pipeline_id,
                    data_index,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vtx(x: f32, y: f32) -> ScreenVertex {
        ScreenVertex {
            x,
            y,
            inv_w: 1.0,
            z: 0.5,
        }
    }

    #[test]
    fn small_triangle_bins_to_a_single_tile() {
        let mut binner = TileBinner::new(128, 128, 64);
        binner.bin_triangle(&[vtx(10.0, 10.0), vtx(20.0, 10.0), vtx(10.0, 20.0)], 1, 0);
        assert_eq!(binner.tile_commands(0, 0).len(), 1);
        for ty in 0..binner.grid_height() {
            for tx in 0..binner.grid_width() {
                if (tx, ty) != (0, 0) {
                    assert!(binner.tile_commands(tx, ty).is_empty());
                }
            }
        }
    }

    #[test]
    fn triangle_spanning_tiles_bins_to_every_touched_tile() {
        let mut binner = TileBinner::new(128, 128, 64);
        binner.bin_triangle(&[vtx(0.0, 0.0), vtx(127.0, 0.0), vtx(0.0, 127.0)], 1, 0);
        // AABB covers all four 64x64 tiles of a 128x128 grid
        for ty in 0..2 {
            for tx in 0..2 {
                assert_eq!(binner.tile_commands(tx, ty).len(), 1);
            }
        }
    }

    #[test]
    fn reset_retains_capacity_but_empties_commands() {
        let mut binner = TileBinner::new(64, 64, 64);
        binner.bin_triangle(&[vtx(1.0, 1.0), vtx(2.0, 1.0), vtx(1.0, 2.0)], 0, 0);
        assert_eq!(binner.tile_commands(0, 0).len(), 1);
        binner.reset();
        assert!(binner.tile_commands(0, 0).is_empty());
    }

    #[test]
    fn grid_dimensions_round_up() {
        let binner = TileBinner::new(130, 65, 64);
        assert_eq!(binner.grid_width(), 3);
        assert_eq!(binner.grid_height(), 2);
    }
}
