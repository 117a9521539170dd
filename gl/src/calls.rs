//! The GPU call surface [`GlDevice`](crate::device::GlDevice) drives.
//!
//! This crate models the shape of a GL-like API without linking one: no
//! windowing or loader crate is pulled in. A host that wants a real
//! binding implements `GlCalls` over `gl`, `glow`, or whatever surface its
//! context library exposes; this crate only contains the device-side
//! bookkeeping (handle tables, binding cache, uniform staging) that sits
//! in front of it.

use softrast_core::pipeline::CullMode;

/// One GPU call surface. Every method corresponds to a single GL-ish
/// operation; `GlDevice` is responsible for state caching, so an
/// implementation is free to call straight through without checking for
/// redundant state itself.
pub trait GlCalls: Send {
    fn gen_buffer(&mut self) -> u32;
    fn delete_buffer(&mut self, id: u32);
    fn buffer_data(&mut self, id: u32, data: &[u8]);
    fn buffer_sub_data(&mut self, id: u32, offset: usize, data: &[u8]);

    fn gen_texture(&mut self) -> u32;
    fn delete_texture(&mut self, id: u32);
    fn tex_image_2d(&mut self, id: u32, width: u32, height: u32, rgba_pixels: &[u8]);

    /// Compiles and links a program from vertex/fragment GLSL source,
    /// returning its id.
    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> u32;
    fn delete_program(&mut self, id: u32);
    fn use_program(&mut self, id: u32);

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: u32, offset: u32, stride: u32);
    fn bind_index_buffer(&mut self, buffer: u32);
    fn bind_texture(&mut self, slot: u8, texture: u32);

    /// Uploads the whole uniform staging block in one call, mirroring a
    /// single UBO bound across all 16 slots.
    fn upload_uniform_block(&mut self, data: &[u8]);

    fn set_viewport(&mut self, x: i32, y: i32, w: i32, h: i32);
    fn set_scissor(&mut self, x: i32, y: i32, w: i32, h: i32);
    fn set_depth_state(&mut self, test_enabled: bool, write_enabled: bool);
    fn set_cull_mode(&mut self, mode: CullMode);

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>);
    fn draw_arrays(&mut self, first_vertex: u32, vertex_count: u32, instance_count: u32);
    fn draw_elements(&mut self, first_index: u32, index_count: u32, base_vertex: i32, instance_count: u32);

    fn swap_buffers(&mut self);
}
