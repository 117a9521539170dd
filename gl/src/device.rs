//! GL-style `Device`: the same RHI contract as the soft backend, driven
//! over a real (or mocked) GPU call surface instead of a software
//! rasterizer (C10).

use fxhash::FxHashMap;

use softrast_core::buffer::BufferDesc;
use softrast_core::command::{Command, CommandBuffer, CommandStream, LoadOp, PacketBeginPass};
use softrast_core::device::Device;
use softrast_core::error::{BufferError, DecodeError, SubmitError};
use softrast_core::handle::{
    BufferHandle, BufferKind, HandleTable, PipelineHandle, PipelineKind, TextureHandle, TextureKind,
};
use softrast_core::pipeline::PipelineDesc;
use softrast_core::shader;
use softrast_core::texture::Texture;

use crate::calls::GlCalls;

pub const MAX_VERTEX_STREAMS: usize = 8;
pub const MAX_TEXTURE_SLOTS: usize = 8;
pub const UNIFORM_SLOTS: usize = 16;
pub const UNIFORM_SLOT_SIZE: usize = 256;
pub const UNIFORM_STAGING_SIZE: usize = UNIFORM_SLOTS * UNIFORM_SLOT_SIZE;

#[derive(Clone, Copy, PartialEq, Eq)]
enum PassState {
    OutsidePass,
    InPass,
}

struct GlPipeline {
    desc: PipelineDesc,
    program: u32,
}

/// Translates submitted command buffers into calls on a `GlCalls`
/// implementation, maintaining its own handle tables (RHI handle → GL id)
/// and a binding-state cache so repeated `Set*` packets that re-bind
/// already-bound state cost nothing beyond the comparison.
pub struct GlDevice<C: GlCalls> {
    calls: C,
    buffers: HandleTable<BufferKind, u32>,
    textures: HandleTable<TextureKind, u32>,
    pipelines: HandleTable<PipelineKind, GlPipeline>,
    // shader handle id -> compiled program id, so two pipelines built from
    // the same registered shader don't pay for a second compile.
    program_cache: FxHashMap<u32, u32>,

    state: PassState,
    current_pipeline: PipelineHandle,

    bound_program: Option<u32>,
    bound_vertex_buffers: [Option<u32>; MAX_VERTEX_STREAMS],
    bound_index_buffer: Option<u32>,
    bound_textures: [Option<u32>; MAX_TEXTURE_SLOTS],

    uniform_staging: Box<[u8; UNIFORM_STAGING_SIZE]>,
    uniform_dirty: bool,
}

impl<C: GlCalls> GlDevice<C> {
    pub fn new(calls: C) -> Self {
        GlDevice {
            calls,
            buffers: HandleTable::new(),
            textures: HandleTable::new(),
            pipelines: HandleTable::new(),
            program_cache: FxHashMap::default(),
            state: PassState::OutsidePass,
            current_pipeline: PipelineHandle::invalid(),
            bound_program: None,
            bound_vertex_buffers: [None; MAX_VERTEX_STREAMS],
            bound_index_buffer: None,
            bound_textures: [None; MAX_TEXTURE_SLOTS],
            uniform_staging: Box::new([0u8; UNIFORM_STAGING_SIZE]),
            uniform_dirty: false,
        }
    }

    pub fn calls(&self) -> &C {
        &self.calls
    }

    pub fn calls_mut(&mut self) -> &mut C {
        &mut self.calls
    }

    fn bind_program(&mut self, program: u32) {
        if self.bound_program != Some(program) {
            self.calls.use_program(program);
            self.bound_program = Some(program);
        }
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: u32, offset: u32, stride: u32) {
        let slot = binding as usize;
        if slot >= MAX_VERTEX_STREAMS {
            log::warn!("vertex stream binding {} out of range", binding);
            return;
        }
        if self.bound_vertex_buffers[slot] != Some(buffer) {
            self.calls.bind_vertex_buffer(binding, buffer, offset, stride);
            self.bound_vertex_buffers[slot] = Some(buffer);
        }
    }

    fn bind_index_buffer(&mut self, buffer: u32) {
        if self.bound_index_buffer != Some(buffer) {
            self.calls.bind_index_buffer(buffer);
            self.bound_index_buffer = Some(buffer);
        }
    }

    fn bind_texture(&mut self, slot: u8, texture: u32) {
        let idx = slot as usize;
        if idx >= MAX_TEXTURE_SLOTS {
            log::warn!("texture slot {} out of range", slot);
            return;
        }
        if self.bound_textures[idx] != Some(texture) {
            self.calls.bind_texture(slot, texture);
            self.bound_textures[idx] = Some(texture);
        }
    }

    fn flush_uniforms(&mut self) {
        if self.uniform_dirty {
            self.calls.upload_uniform_block(&self.uniform_staging[..]);
            self.uniform_dirty = false;
        }
    }

    fn begin_pass(&mut self, p: PacketBeginPass) {
        self.calls
            .set_viewport(p.viewport[0], p.viewport[1], p.viewport[2], p.viewport[3]);
        self.calls
            .set_scissor(p.scissor[0], p.scissor[1], p.scissor[2], p.scissor[3]);

        let color = (LoadOp::from_u32(p.color_load_op) == LoadOp::Clear).then(|| p.clear_color);
        let depth = (LoadOp::from_u32(p.depth_load_op) == LoadOp::Clear).then(|| p.clear_depth);
        if color.is_some() || depth.is_some() {
            self.calls.clear(color, depth);
        }
        self.state = PassState::InPass;
    }

    fn apply_pipeline_state(&mut self, handle: PipelineHandle) {
        let Ok(pipeline) = self.pipelines.get(handle) else {
            log::warn!("draw issued with no valid pipeline bound");
            return;
        };
        self.bind_program(pipeline.program);
        self.calls
            .set_depth_state(pipeline.desc.depth_test_enabled, pipeline.desc.depth_write_enabled);
        self.calls.set_cull_mode(pipeline.desc.cull_mode);
    }
}

impl<C: GlCalls> Device for GlDevice<C> {
    fn create_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        let id = self.calls.gen_buffer();
        let size = desc.size;
        let data = desc.initial_data.unwrap_or_else(|| vec![0u8; size]);
        self.calls.buffer_data(id, &data);
        self.buffers.insert(id)
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        match self.buffers.remove(handle) {
            Ok(Some(id)) => self.calls.delete_buffer(id),
            Ok(None) => {}
            Err(e) => log::warn!("destroy_buffer: {}", e),
        }
    }

    fn update_buffer(&mut self, handle: BufferHandle, data: &[u8], offset: usize) -> Result<(), BufferError> {
        let id = *self.buffers.get(handle)?;
        self.calls.buffer_sub_data(id, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, pixels: &[u8], width: u32, height: u32, channels: u32) -> TextureHandle {
        let texture = Texture::from_pixels(pixels, width, height, channels);
        let id = self.calls.gen_texture();
        self.calls.tex_image_2d(id, width, height, texture.rgba());
        self.textures.insert(id)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        match self.textures.remove(handle) {
            Ok(Some(id)) => self.calls.delete_texture(id),
            Ok(None) => {}
            Err(e) => log::warn!("destroy_texture: {}", e),
        }
    }

    fn create_pipeline(&mut self, desc: PipelineDesc) -> PipelineHandle {
        let shader_id = desc.shader.id();
        let program = match self.program_cache.get(&shader_id) {
            Some(&program) => Some(program),
            None => {
                let compiled = shader::with_desc(desc.shader, |d| {
                    d.map(|d| self.calls.create_program(&d.glsl_vertex, &d.glsl_fragment))
                });
                if let Some(program) = compiled {
                    self.program_cache.insert(shader_id, program);
                }
                compiled
            }
        };
        match program {
            Some(program) => self.pipelines.insert(GlPipeline { desc, program }),
            None => {
                log::error!("create_pipeline: shader handle {:?} is not registered", desc.shader);
                PipelineHandle::invalid()
            }
        }
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        if let Err(e) = self.pipelines.remove(handle) {
            log::warn!("destroy_pipeline: {}", e);
        }
        // programs are cached by shader id, not pipeline, and intentionally
        // outlive any one pipeline built from that shader.
    }

    fn submit(&mut self, commands: &CommandBuffer) -> Result<(), SubmitError> {
        for command in CommandStream::new(commands.as_bytes()) {
            match command? {
                Command::BeginPass(p) => {
                    if self.state == PassState::InPass {
                        return Err(DecodeError::NestedBeginPass.into());
                    }
                    self.begin_pass(p);
                }
                Command::EndPass => {
                    if self.state != PassState::InPass {
                        log::warn!("EndPass issued while not inside a pass; ignoring");
                        continue;
                    }
                    self.state = PassState::OutsidePass;
                    self.buffers.end_frame();
                    self.textures.end_frame();
                    self.pipelines.end_frame();
                }
                Command::SetPipeline(p) => {
                    self.current_pipeline = PipelineHandle::from_raw(p.handle);
                    self.apply_pipeline_state(self.current_pipeline);
                }
                Command::SetVertexStream(p) => {
                    let handle = BufferHandle::from_raw(p.handle);
                    if let Ok(&gl_id) = self.buffers.get(handle) {
                        self.bind_vertex_buffer(p.binding_index as u32, gl_id, p.offset, p.stride);
                    }
                }
                Command::SetIndexBuffer(p) => {
                    let handle = BufferHandle::from_raw(p.handle);
                    if let Ok(&gl_id) = self.buffers.get(handle) {
                        self.bind_index_buffer(gl_id);
                    }
                }
                Command::SetTexture(p) => {
                    if (p.slot as usize) >= MAX_TEXTURE_SLOTS {
                        log::warn!("texture slot {} out of range", p.slot);
                        continue;
                    }
                    let handle = TextureHandle::from_raw(p.handle);
                    if let Ok(&gl_id) = self.textures.get(handle) {
                        self.bind_texture(p.slot, gl_id);
                    }
                }
                Command::UpdateUniform { slot, data } => {
                    let slot = slot as usize;
                    if slot >= UNIFORM_SLOTS {
                        log::warn!("uniform slot {} out of range", slot);
                        continue;
                    }
                    let len = data.len().min(UNIFORM_SLOT_SIZE);
                    let start = slot * UNIFORM_SLOT_SIZE;
                    self.uniform_staging[start..start + len].copy_from_slice(&data[..len]);
                    self.uniform_dirty = true;
                }
                Command::Draw(p) => {
                    if self.state != PassState::InPass {
                        return Err(DecodeError::DrawOutsidePass.into());
                    }
                    self.flush_uniforms();
                    self.calls.draw_arrays(p.first_vertex, p.vertex_count, p.instance_count.max(1));
                }
                Command::DrawIndexed(p) => {
                    if self.state != PassState::InPass {
                        return Err(DecodeError::DrawOutsidePass.into());
                    }
                    self.flush_uniforms();
                    self.calls
                        .draw_elements(p.first_index, p.index_count, p.base_vertex, p.instance_count.max(1));
                }
                Command::SetViewport(p) => self.calls.set_viewport(p.x, p.y, p.w, p.h),
                Command::SetScissor(p) => self.calls.set_scissor(p.x, p.y, p.w, p.h),
                Command::Clear(p) => {
                    let color = (p.color_flag != 0).then(|| p.color);
                    let depth = (p.depth_flag != 0).then(|| p.depth);
                    self.calls.clear(color, depth);
                }
                Command::NoOp => {}
            }
        }
        Ok(())
    }

    fn present(&mut self) {
        self.calls.swap_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softrast_core::buffer::{BufferKind as BK, BufferUsage};
    use softrast_core::command::PacketBeginPass;
    use softrast_core::pipeline::{CullMode, PrimitiveType, VertexInputLayout};
    use softrast_core::shader::{ShaderDesc, SoftShader, Varyings};

    struct DummyShader;
    impl SoftShader for DummyShader {
        fn vertex(&self, _: &[f32], _: &[u8]) -> (nalgebra_glm::Vec4, Varyings) {
            unreachable!("gl device never runs the soft shader path")
        }
        fn fragment(&self, _: &[f32], _: &[u8], _: &softrast_core::texture::BoundTextures) -> [u8; 4] {
            unreachable!("gl device never runs the soft shader path")
        }
    }

    #[derive(Default)]
    struct RecordingCalls {
        next_id: u32,
        draw_calls: Vec<(u32, u32, u32)>,
        bound_programs: Vec<u32>,
        programs_created: u32,
        swaps: u32,
    }

    impl GlCalls for RecordingCalls {
        fn gen_buffer(&mut self) -> u32 {
            self.next_id += 1;
            self.next_id
        }
        fn delete_buffer(&mut self, _id: u32) {}
        fn buffer_data(&mut self, _id: u32, _data: &[u8]) {}
        fn buffer_sub_data(&mut self, _id: u32, _offset: usize, _data: &[u8]) {}
        fn gen_texture(&mut self) -> u32 {
            self.next_id += 1;
            self.next_id
        }
        fn delete_texture(&mut self, _id: u32) {}
        fn tex_image_2d(&mut self, _id: u32, _w: u32, _h: u32, _pixels: &[u8]) {}
        fn create_program(&mut self, _vs: &str, _fs: &str) -> u32 {
            self.next_id += 1;
            self.programs_created += 1;
            self.next_id
        }
        fn delete_program(&mut self, _id: u32) {}
        fn use_program(&mut self, id: u32) {
            self.bound_programs.push(id);
        }
        fn bind_vertex_buffer(&mut self, _binding: u32, _buffer: u32, _offset: u32, _stride: u32) {}
        fn bind_index_buffer(&mut self, _buffer: u32) {}
        fn bind_texture(&mut self, _slot: u8, _texture: u32) {}
        fn upload_uniform_block(&mut self, _data: &[u8]) {}
        fn set_viewport(&mut self, _x: i32, _y: i32, _w: i32, _h: i32) {}
        fn set_scissor(&mut self, _x: i32, _y: i32, _w: i32, _h: i32) {}
        fn set_depth_state(&mut self, _test: bool, _write: bool) {}
        fn set_cull_mode(&mut self, _mode: CullMode) {}
        fn clear(&mut self, _color: Option<[f32; 4]>, _depth: Option<f32>) {}
        fn draw_arrays(&mut self, first_vertex: u32, vertex_count: u32, instance_count: u32) {
            self.draw_calls.push((first_vertex, vertex_count, instance_count));
        }
        fn draw_elements(&mut self, _first_index: u32, _index_count: u32, _base_vertex: i32, _instance_count: u32) {}
        fn swap_buffers(&mut self) {
            self.swaps += 1;
        }
    }

    fn pipeline_desc() -> PipelineDesc {
        shader::reset();
        let shader_handle = shader::register(ShaderDesc {
            name: "gl-device-test".to_string(),
            soft_factory: Box::new(|| Box::new(DummyShader)),
            glsl_vertex: "void main() {}".to_string(),
            glsl_fragment: "void main() {}".to_string(),
        });
        PipelineDesc {
            shader: shader_handle,
            input_layout: VertexInputLayout::default(),
            cull_mode: CullMode::None,
            primitive_type: PrimitiveType::Triangles,
            depth_test_enabled: false,
            depth_write_enabled: false,
            blend_enabled: false,
            label: None,
        }
    }

    #[test]
    fn redundant_program_bind_is_elided() {
        let mut device = GlDevice::new(RecordingCalls::default());
        let pipeline = device.create_pipeline(pipeline_desc());

        let mut cb = CommandBuffer::new();
        cb.write_begin_pass(PacketBeginPass {
            color_load_op: 2,
            clear_color: [0.0; 4],
            depth_load_op: 2,
            clear_depth: 1.0,
            viewport: [0, 0, 64, 64],
            scissor: [0, 0, 64, 64],
        });
        cb.write_set_pipeline(pipeline.id());
        cb.write_set_pipeline(pipeline.id());
        cb.write_end_pass();
        device.submit(&cb).unwrap();

        assert_eq!(device.calls().bound_programs.len(), 1);
    }

    #[test]
    fn two_pipelines_sharing_a_shader_compile_once() {
        let mut device = GlDevice::new(RecordingCalls::default());
        let desc = pipeline_desc();
        let p1 = device.create_pipeline(desc.clone());
        let p2 = device.create_pipeline(desc);
        assert_ne!(p1.id(), p2.id());
        assert_eq!(device.calls().programs_created, 1);
    }

    #[test]
    fn draw_outside_pass_is_fatal() {
        let mut device = GlDevice::new(RecordingCalls::default());
        let mut cb = CommandBuffer::new();
        cb.write_draw(3, 0, 1);
        let err = device.submit(&cb).unwrap_err();
        assert!(matches!(err, SubmitError::Decode(DecodeError::DrawOutsidePass)));
    }

    #[test]
    fn present_forwards_to_swap_buffers() {
        let mut device = GlDevice::new(RecordingCalls::default());
        device.present();
        assert_eq!(device.calls().swaps, 1);
    }

    #[test]
    fn buffer_roundtrip_allocates_and_frees_a_gl_id() {
        let mut device = GlDevice::new(RecordingCalls::default());
        let handle = device.create_buffer(BufferDesc {
            kind: BK::Vertex,
            usage: BufferUsage::Dynamic,
            size: 16,
            initial_data: None,
            label: None,
        });
        assert!(device.update_buffer(handle, &[1, 2, 3, 4], 0).is_ok());
        device.destroy_buffer(handle);
        assert!(device.update_buffer(handle, &[1, 2, 3, 4], 0).is_err());
    }
}
