//! Tile rasterizer: per-tile, per-triangle pixel coverage, depth test,
//! fragment shading (C8).
//!
//! Each call to `rasterize_tile` only ever touches the pixels inside one
//! tile's rectangle; because the tile grid partitions the framebuffer
//! into disjoint rectangles, running one `rasterize_tile` per tile across
//! the job system's worker pool (`JobSystem::parallel_for`) never races on
//! a pixel. That invariant is what lets this module reach into the
//! framebuffer through raw pointers instead of a `&mut` slice per tile:
//! the borrow checker cannot see the partition, so the race-safety
//! argument is carried here as a comment and upheld by construction in
//! `device.rs`, which never calls `rasterize_tile` for two overlapping
//! tiles concurrently.

use crate::pipeline::Pipeline;
use crate::tile::{TileCommandKind, TriangleRecord};
use crate::texture::{BoundTextures, Texture, MAX_TEXTURE_SLOTS};

/// Everything one tile's rasterization pass needs, expressed as raw
/// pointers/indices so the type has no lifetime and can be captured by a
/// `'static` job closure. All pointers must remain valid for the duration
/// of the enclosing `parallel_for` call; `Device::submit` guarantees this
/// because it blocks until rasterization completes before touching any of
/// the referenced state again.
#[derive(Clone, Copy)]
pub struct RasterJob {
    pub color: *mut u8,
    pub depth: *mut f32,
    pub fb_width: u32,
    pub fb_height: u32,
    pub tile_size: u32,
    pub grid_width: u32,
    pub scissor: (i32, i32, i32, i32),
    pub bump: *const u8,
    pub bump_len: usize,
    pub tile_commands: *const crate::tile::TileCommand,
    pub tile_command_counts: *const u32,
    pub tile_command_offsets: *const u32,
    pub pipelines: *const Pipeline,
    pub pipeline_slots: *const bool,
    pub pipeline_table_len: usize,
    pub textures: [*const Texture; MAX_TEXTURE_SLOTS],
    pub texture_bound: [bool; MAX_TEXTURE_SLOTS],
    pub uniform_staging: *const u8,
    pub uniform_staging_len: usize,
}

// SAFETY: `RasterJob` is only ever constructed and consumed within one
// synchronous `Device::submit` call, where the device guarantees every
// pointed-to object outlives the parallel_for that captures this struct.
unsafe impl Send for RasterJob {}
unsafe impl Sync for RasterJob {}

impl RasterJob {
    unsafe fn bound_textures(&self) -> BoundTextures<'_> {
        let mut slots = [None; MAX_TEXTURE_SLOTS];
        for i in 0..MAX_TEXTURE_SLOTS {
            if self.texture_bound[i] {
                slots[i] = Some(&*self.textures[i]);
            }
        }
        BoundTextures(slots)
    }

    unsafe fn uniforms(&self) -> &[u8] {
        std::slice::from_raw_parts(self.uniform_staging, self.uniform_staging_len)
    }

    unsafe fn triangle_record(&self, data_index: u32) -> TriangleRecord {
        let ptr = self.bump.add(data_index as usize) as *const TriangleRecord;
        ptr.read_unaligned()
    }

    unsafe fn pipeline(&self, pipeline_id: u16) -> Option<&Pipeline> {
        let idx = pipeline_id as usize;
        if idx >= self.pipeline_table_len || !*self.pipeline_slots.add(idx) {
            return None;
        }
        Some(&*self.pipelines.add(idx))
    }

    fn edge(ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32) -> f32 {
        (bx - ax) * (py - ay) - (by - ay) * (px - ax)
    }

    fn is_top_left(ax: f32, ay: f32, bx: f32, by: f32) -> bool {
        let dy = by - ay;
        let dx = bx - ax;
        (dy == 0.0 && dx > 0.0) || dy > 0.0
    }
}

/// Rasterizes one tile: walks its command list in order, and for each
/// `DrawTriangle` command, scans the tile-clipped bounding box of the
/// triangle, edge-testing and depth-testing each candidate pixel before
/// invoking the fragment shader and writing color (+ depth, if enabled).
pub fn rasterize_tile(job: &RasterJob, tile_index: usize) {
    let tx = (tile_index as u32) % job.grid_width;
    let ty = (tile_index as u32) / job.grid_width;
    let tile_x0 = (tx * job.tile_size) as i32;
    let tile_y0 = (ty * job.tile_size) as i32;
    let tile_x1 = (tile_x0 + job.tile_size as i32).min(job.fb_width as i32);
    let tile_y1 = (tile_y0 + job.tile_size as i32).min(job.fb_height as i32);

    let (scx0, scy0, scw, sch) = job.scissor;
    let clip_x0 = tile_x0.max(scx0);
    let clip_y0 = tile_y0.max(scy0);
    let clip_x1 = tile_x1.min(scx0 + scw);
    let clip_y1 = tile_y1.min(scy0 + sch);
    if clip_x0 >= clip_x1 || clip_y0 >= clip_y1 {
        return;
    }

    let offset = unsafe { *job.tile_command_offsets.add(tile_index) } as usize;
    let count = unsafe { *job.tile_command_counts.add(tile_index) } as usize;

    for i in 0..count {
        let cmd = unsafe { *job.tile_commands.add(offset + i) };
        if cmd.kind != TileCommandKind::DrawTriangle {
            continue;
        }
        let pipeline = match unsafe { job.pipeline(cmd.pipeline_id) } {
            Some(p) => p,
            None => {
                log::warn!("tile command referenced unknown pipeline {}", cmd.pipeline_id);
                continue;
            }
        };
        let tri = unsafe { job.triangle_record(cmd.data_index) };
        rasterize_triangle(job, pipeline, &tri, (clip_x0, clip_y0, clip_x1, clip_y1));
    }
}

fn rasterize_triangle(
    job: &RasterJob,
    pipeline: &Pipeline,
    tri: &TriangleRecord,
    bounds: (i32, i32, i32, i32),
) {
    let p = &tri.positions;
    let min_x = p.iter().map(|v| v.x).fold(f32::INFINITY, f32::min).floor() as i32;
    let max_x = p.iter().map(|v| v.x).fold(f32::NEG_INFINITY, f32::max).ceil() as i32;
    let min_y = p.iter().map(|v| v.y).fold(f32::INFINITY, f32::min).floor() as i32;
    let max_y = p.iter().map(|v| v.y).fold(f32::NEG_INFINITY, f32::max).ceil() as i32;

    let (bx0, by0, bx1, by1) = bounds;
    let x0 = min_x.max(bx0);
    let y0 = min_y.max(by0);
    let x1 = max_x.min(bx1);
    let y1 = max_y.min(by1);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let area = RasterJob::edge(p[0].x, p[0].y, p[1].x, p[1].y, p[2].x, p[2].y);
    if area == 0.0 {
        return;
    }

    let top_left = [
        RasterJob::is_top_left(p[1].x, p[1].y, p[2].x, p[2].y),
        RasterJob::is_top_left(p[2].x, p[2].y, p[0].x, p[0].y),
        RasterJob::is_top_left(p[0].x, p[0].y, p[1].x, p[1].y),
    ];

    let textures = unsafe { job.bound_textures() };
    let uniforms = unsafe { job.uniforms() };

    for y in y0..y1 {
        for x in x0..x1 {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;
            let w0 = RasterJob::edge(p[1].x, p[1].y, p[2].x, p[2].y, px, py);
            let w1 = RasterJob::edge(p[2].x, p[2].y, p[0].x, p[0].y, px, py);
            let w2 = RasterJob::edge(p[0].x, p[0].y, p[1].x, p[1].y, px, py);

            let covered = if area > 0.0 {
                (w0 > 0.0 || (w0 == 0.0 && top_left[0]))
                    && (w1 > 0.0 || (w1 == 0.0 && top_left[1]))
                    && (w2 > 0.0 || (w2 == 0.0 && top_left[2]))
            } else {
                (w0 < 0.0 || (w0 == 0.0 && top_left[0]))
                    && (w1 < 0.0 || (w1 == 0.0 && top_left[1]))
                    && (w2 < 0.0 || (w2 == 0.0 && top_left[2]))
            };
            if !covered {
                continue;
            }

            let b0 = w0 / area;
            let b1 = w1 / area;
            let b2 = w2 / area;

            let inv_w = b0 * p[0].inv_w + b1 * p[1].inv_w + b2 * p[2].inv_w;
            let w = 1.0 / inv_w;
            let depth = b0 * p[0].z + b1 * p[1].z + b2 * p[2].z;

            let pixel_index = (y as u32 * job.fb_width + x as u32) as usize;

            if pipeline.desc.depth_test_enabled {
                let current_depth = unsafe { *job.depth.add(pixel_index) };
                if depth >= current_depth {
                    continue;
                }
            }

            let mut varyings = [0f32; crate::shader::MAX_VARYINGS];
            for i in 0..tri.varying_count {
                let interpolated =
                    b0 * tri.varyings[0][i] + b1 * tri.varyings[1][i] + b2 * tri.varyings[2][i];
                varyings[i] = interpolated * w;
            }

            let color = pipeline
                .executor
                .fragment(&varyings[..tri.varying_count], uniforms, &textures);

            unsafe {
                let color_index = pixel_index * 4;
                *job.color.add(color_index) = color[0];
                *job.color.add(color_index + 1) = color[1];
                *job.color.add(color_index + 2) = color[2];
                *job.color.add(color_index + 3) = color[3];
                if pipeline.desc.depth_write_enabled {
                    *job.depth.add(pixel_index) = depth;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_function_sign_matches_winding() {
        // a CCW triangle in a y-down space has a specific edge sign
        let e = RasterJob::edge(0.0, 0.0, 10.0, 0.0, 5.0, 5.0);
        assert!(e != 0.0);
    }

    #[test]
    fn top_left_rule_flags_horizontal_top_and_left_edges() {
        // a horizontal edge going left-to-right (dy == 0, dx > 0) is a top edge
        assert!(RasterJob::is_top_left(0.0, 0.0, 10.0, 0.0));
        // an edge going downward is a left edge
        assert!(RasterJob::is_top_left(0.0, 0.0, 0.0, 10.0));
        // a horizontal edge going right-to-left is a bottom edge, not top-left
        assert!(!RasterJob::is_top_left(10.0, 0.0, 0.0, 0.0));
    }
}
