//! Soft-backend device: owns every resource table, decodes one submitted
//! command buffer per frame, runs the vertex stage and binning inline, then
//! dispatches tile rasterization across the job system (C9).

use crate::bump::BumpAllocator;
use crate::buffer::{Buffer, BufferDesc};
use crate::command::{Command, CommandBuffer, CommandStream, LoadOp, PacketBeginPass};
use crate::error::SubmitError;
use crate::handle::{
    BufferHandle, HandleTable, PipelineHandle, ShaderHandle, TextureHandle,
};
use crate::job::JobSystem;
use crate::pipeline::{Pipeline, PipelineDesc};
use crate::raster::{rasterize_tile, RasterJob};
use crate::shader;
use crate::texture::{Texture, MAX_TEXTURE_SLOTS};
use crate::tile::TileBinner;
use crate::vertex;

pub const MAX_VERTEX_STREAMS: usize = 8;
pub const UNIFORM_SLOTS: usize = 16;
pub const UNIFORM_SLOT_SIZE: usize = 256;
pub const UNIFORM_STAGING_SIZE: usize = UNIFORM_SLOTS * UNIFORM_SLOT_SIZE;

/// Tunables a host picks once at device creation time.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub bump_pool_bytes: usize,
    pub worker_threads: usize,
}

impl DeviceConfig {
    pub fn new(width: u32, height: u32) -> Self {
        DeviceConfig {
            width,
            height,
            tile_size: 64,
            bump_pool_bytes: 16 * 1024 * 1024,
            worker_threads: JobSystem::default_thread_count(),
        }
    }
}

/// The backend-agnostic device surface both the soft and GL-style backends
/// implement. Object-safe so a host can hold `Box<dyn Device>`.
pub trait Device {
    fn create_buffer(&mut self, desc: BufferDesc) -> BufferHandle;
    fn destroy_buffer(&mut self, handle: BufferHandle);
    fn update_buffer(&mut self, handle: BufferHandle, data: &[u8], offset: usize) -> Result<(), crate::error::BufferError>;
    fn create_texture(&mut self, pixels: &[u8], width: u32, height: u32, channels: u32) -> TextureHandle;
    fn destroy_texture(&mut self, handle: TextureHandle);
    fn create_pipeline(&mut self, desc: PipelineDesc) -> PipelineHandle;
    fn destroy_pipeline(&mut self, handle: PipelineHandle);
    fn submit(&mut self, commands: &CommandBuffer) -> Result<(), SubmitError>;
    fn present(&mut self);
}

#[derive(Clone, Copy, Default)]
struct StreamBinding {
    handle: BufferHandle,
    offset: u32,
    stride: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PassState {
    OutsidePass,
    InPass,
}

/// The software-rasterized `Device` implementation: resource tables, a
/// bump pool for transient triangle records, a tile binner, and a job
/// system to parallelize rasterization across tiles.
pub struct SoftDevice {
    config: DeviceConfig,
    buffers: HandleTable<crate::handle::BufferKind, Buffer>,
    textures: HandleTable<crate::handle::TextureKind, Texture>,
    pipelines: HandleTable<crate::handle::PipelineKind, Pipeline>,
    bump: BumpAllocator,
    binner: TileBinner,
    jobs: JobSystem,

    color: Vec<u8>,
    depth: Vec<f32>,

    state: PassState,
    current_pipeline: PipelineHandle,
    vertex_streams: [StreamBinding; MAX_VERTEX_STREAMS],
    index_buffer: Option<(BufferHandle, u32)>,
    texture_bindings: [Option<TextureHandle>; MAX_TEXTURE_SLOTS],
    uniform_staging: Box<[u8; UNIFORM_STAGING_SIZE]>,

    viewport: (f32, f32, f32, f32),
    scissor: (i32, i32, i32, i32),
    flip_y: bool,
}

impl SoftDevice {
    pub fn new(config: DeviceConfig) -> Self {
        let pixel_count = (config.width as usize) * (config.height as usize);
        let binner = TileBinner::new(config.width, config.height, config.tile_size);
        let bump = BumpAllocator::new(config.bump_pool_bytes);
        let jobs = JobSystem::new(config.worker_threads);
        log::info!(
            "soft device created: {}x{} tile_size={}",
            config.width,
            config.height,
            config.tile_size
        );
        SoftDevice {
            color: vec![0u8; pixel_count * 4],
            depth: vec![f32::INFINITY; pixel_count],
            viewport: (0.0, 0.0, config.width as f32, config.height as f32),
            scissor: (0, 0, config.width as i32, config.height as i32),
            config,
            buffers: HandleTable::new(),
            textures: HandleTable::new(),
            pipelines: HandleTable::new(),
            bump,
            binner,
            jobs,
            state: PassState::OutsidePass,
            current_pipeline: PipelineHandle::invalid(),
            vertex_streams: [StreamBinding::default(); MAX_VERTEX_STREAMS],
            index_buffer: None,
            texture_bindings: [None; MAX_TEXTURE_SLOTS],
            uniform_staging: Box::new([0u8; UNIFORM_STAGING_SIZE]),
            flip_y: true,
        }
    }

    /// Framebuffer color contents, top-to-bottom scanlines of RGBA8.
    pub fn color_buffer(&self) -> &[u8] {
        &self.color
    }

    pub fn depth_buffer(&self) -> &[f32] {
        &self.depth
    }

    fn begin_pass(&mut self, p: PacketBeginPass) {
        self.viewport = (
            p.viewport[0] as f32,
            p.viewport[1] as f32,
            p.viewport[2] as f32,
            p.viewport[3] as f32,
        );
        self.scissor = (p.scissor[0], p.scissor[1], p.scissor[2], p.scissor[3]);

        if LoadOp::from_u32(p.color_load_op) == LoadOp::Clear {
            self.clear_color_region(self.scissor, p.clear_color);
        }
        if LoadOp::from_u32(p.depth_load_op) == LoadOp::Clear {
            self.clear_depth_region(self.scissor, p.clear_depth);
        }
        self.state = PassState::InPass;
    }

    fn clear_color_region(&mut self, rect: (i32, i32, i32, i32), color: [f32; 4]) {
        let packed = [
            (color[0].clamp(0.0, 1.0) * 255.0).round() as u8,
            (color[1].clamp(0.0, 1.0) * 255.0).round() as u8,
            (color[2].clamp(0.0, 1.0) * 255.0).round() as u8,
            (color[3].clamp(0.0, 1.0) * 255.0).round() as u8,
        ];
        let (x0, y0, w, h) = rect;
        let width = self.config.width as i32;
        let height = self.config.height as i32;
        for y in y0.max(0)..(y0 + h).min(height) {
            for x in x0.max(0)..(x0 + w).min(width) {
                let idx = ((y * width + x) as usize) * 4;
                self.color[idx..idx + 4].copy_from_slice(&packed);
            }
        }
    }

    fn clear_depth_region(&mut self, rect: (i32, i32, i32, i32), value: f32) {
        let (x0, y0, w, h) = rect;
        let width = self.config.width as i32;
        let height = self.config.height as i32;
        for y in y0.max(0)..(y0 + h).min(height) {
            for x in x0.max(0)..(x0 + w).min(width) {
                self.depth[(y * width + x) as usize] = value;
            }
        }
    }

    fn handle_draw(&mut self, first_vertex: u32, vertex_count: u32, instance_count: u32, indices: Option<(u32, i32)>) {
        let pipeline_handle = self.current_pipeline;
        let pipeline = match self.pipelines.get(pipeline_handle) {
            Ok(p) => p,
            Err(_) => {
                log::warn!("draw issued with no valid pipeline bound");
                return;
            }
        };
        let stream = self.vertex_streams[0];
        let buffer = match self.buffers.get(stream.handle) {
            Ok(b) => b,
            Err(_) => {
                log::warn!("draw issued with no vertex stream bound at binding 0");
                return;
            }
        };

        let index_data: Option<&Buffer> = match indices {
            Some(_) => match self.index_buffer {
                Some((handle, _)) => self.buffers.get(handle).ok(),
                None => None,
            },
            None => None,
        };

        let triangle_count = vertex_count / 3;
        for _instance in 0..instance_count.max(1) {
            for tri in 0..triangle_count {
                let base = first_vertex + tri * 3;
                let idx = match (indices, index_data) {
                    (Some((ib_offset, base_vertex)), Some(ib)) => {
                        let bytes = ib.as_bytes();
                        let read_index = |slot: u32| -> u32 {
                            let off = ib_offset as usize + (base as usize + slot as usize) * 4;
                            u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap())
                        };
                        [
                            (read_index(0) as i64 + base_vertex as i64) as u32,
                            (read_index(1) as i64 + base_vertex as i64) as u32,
                            (read_index(2) as i64 + base_vertex as i64) as u32,
                        ]
                    }
                    _ => [base, base + 1, base + 2],
                };

                let out = vertex::process_triangle(
                    pipeline.executor.as_ref(),
                    &pipeline.desc,
                    buffer,
                    stream.offset,
                    idx,
                    &self.uniform_staging[..],
                    self.viewport,
                    self.flip_y,
                );
                for (positions, varyings, varying_count) in out {
                    let record = crate::tile::TriangleRecord {
                        positions,
                        varyings,
                        varying_count,
                    };
                    match self.bump.alloc_write(record) {
                        Some(offset) => {
                            self.binner
                                .bin_triangle(&positions, pipeline_handle.id() as u16, offset as u32);
                        }
                        None => {
                            // bump pool already logged its own exhaustion warning
                        }
                    }
                }
            }
        }
    }

    fn end_pass(&mut self) {
        let tile_count = self.binner.tile_count();
        if tile_count == 0 {
            self.finish_frame();
            return;
        }

        let grid_width = self.binner.grid_width();
        let mut tile_commands = Vec::new();
        let mut counts = Vec::with_capacity(tile_count);
        let mut offsets = Vec::with_capacity(tile_count);
        for i in 0..tile_count {
            let commands = self.binner.tile(i).commands.as_slice();
            offsets.push(tile_commands.len() as u32);
            counts.push(commands.len() as u32);
            tile_commands.extend_from_slice(commands);
        }

        let pipeline_table_len = self.pipelines.slot_count();
        let mut pipeline_ptrs = Vec::with_capacity(pipeline_table_len);
        let mut pipeline_slots = Vec::with_capacity(pipeline_table_len);
        for id in 0..pipeline_table_len as u32 {
            let handle = PipelineHandle::from_raw(id);
            match self.pipelines.get(handle) {
                Ok(p) => {
                    pipeline_ptrs.push(p as *const Pipeline);
                    pipeline_slots.push(true);
                }
                Err(_) => {
                    pipeline_ptrs.push(std::ptr::null());
                    pipeline_slots.push(false);
                }
            }
        }

        let mut texture_ptrs = [std::ptr::null(); MAX_TEXTURE_SLOTS];
        let mut texture_bound = [false; MAX_TEXTURE_SLOTS];
        for slot in 0..MAX_TEXTURE_SLOTS {
            if let Some(handle) = self.texture_bindings[slot] {
                if let Ok(tex) = self.textures.get(handle) {
                    texture_ptrs[slot] = tex as *const Texture;
                    texture_bound[slot] = true;
                }
            }
        }

        let job = RasterJob {
            color: self.color.as_mut_ptr(),
            depth: self.depth.as_mut_ptr(),
            fb_width: self.config.width,
            fb_height: self.config.height,
            tile_size: self.binner.tile_size(),
            grid_width,
            scissor: self.scissor,
            bump: self.bump.bytes(0, self.bump.used_memory()).as_ptr(),
            bump_len: self.bump.used_memory(),
            tile_commands: tile_commands.as_ptr(),
            tile_command_counts: counts.as_ptr(),
            tile_command_offsets: offsets.as_ptr(),
            pipelines: pipeline_ptrs.as_ptr(),
            pipeline_slots: pipeline_slots.as_ptr(),
            pipeline_table_len,
            textures: texture_ptrs,
            texture_bound,
            uniform_staging: self.uniform_staging.as_ptr(),
            uniform_staging_len: UNIFORM_STAGING_SIZE,
        };

        self.jobs.parallel_for(0, tile_count, move |i| {
            rasterize_tile(&job, i);
        });

        self.finish_frame();
    }

    fn finish_frame(&mut self) {
        self.binner.reset();
        self.bump.reset();
        self.buffers.end_frame();
        self.textures.end_frame();
        self.pipelines.end_frame();
        self.state = PassState::OutsidePass;
    }

    fn update_uniform(&mut self, slot: u8, data: &[u8]) {
        let slot = slot as usize;
        if slot >= UNIFORM_SLOTS {
            log::warn!("uniform slot {} out of range (max {})", slot, UNIFORM_SLOTS);
            return;
        }
        let len = data.len().min(UNIFORM_SLOT_SIZE);
        let start = slot * UNIFORM_SLOT_SIZE;
        self.uniform_staging[start..start + len].copy_from_slice(&data[..len]);
    }
}

impl Device for SoftDevice {
    fn create_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        self.buffers.insert(Buffer::new(&desc))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if let Err(e) = self.buffers.remove(handle) {
            log::warn!("destroy_buffer: {}", e);
        }
    }

    fn update_buffer(&mut self, handle: BufferHandle, data: &[u8], offset: usize) -> Result<(), crate::error::BufferError> {
        let buffer = self.buffers.get_mut(handle)?;
        buffer.update(data, offset)
    }

    fn create_texture(&mut self, pixels: &[u8], width: u32, height: u32, channels: u32) -> TextureHandle {
        self.textures.insert(Texture::from_pixels(pixels, width, height, channels))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Err(e) = self.textures.remove(handle) {
            log::warn!("destroy_texture: {}", e);
        }
    }

    fn create_pipeline(&mut self, desc: PipelineDesc) -> PipelineHandle {
        let shader_handle: ShaderHandle = desc.shader;
        let executor = shader::with_desc(shader_handle, |d| d.map(|d| (d.soft_factory)()));
        match executor {
            Some(executor) => self.pipelines.insert(Pipeline { desc, executor }),
            None => {
                log::error!("create_pipeline: shader handle {:?} is not registered", shader_handle);
                PipelineHandle::invalid()
            }
        }
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        if let Err(e) = self.pipelines.remove(handle) {
            log::warn!("destroy_pipeline: {}", e);
        }
    }

    fn submit(&mut self, commands: &CommandBuffer) -> Result<(), SubmitError> {
        for command in CommandStream::new(commands.as_bytes()) {
            match command? {
                Command::BeginPass(p) => {
                    if self.state == PassState::InPass {
                        return Err(crate::error::DecodeError::NestedBeginPass.into());
                    }
                    self.begin_pass(p);
                }
                Command::EndPass => {
                    if self.state != PassState::InPass {
                        log::warn!("EndPass issued while not inside a pass; ignoring");
                        continue;
                    }
                    self.end_pass();
                }
                Command::SetPipeline(p) => {
                    self.current_pipeline = PipelineHandle::from_raw(p.handle);
                }
                Command::SetVertexStream(p) => {
                    if (p.binding_index as usize) < MAX_VERTEX_STREAMS {
                        self.vertex_streams[p.binding_index as usize] = StreamBinding {
                            handle: BufferHandle::from_raw(p.handle),
                            offset: p.offset,
                            stride: p.stride,
                        };
                    }
                }
                Command::SetIndexBuffer(p) => {
                    self.index_buffer = Some((BufferHandle::from_raw(p.handle), p.offset));
                }
                Command::SetTexture(p) => {
                    if (p.slot as usize) < MAX_TEXTURE_SLOTS {
                        self.texture_bindings[p.slot as usize] = Some(TextureHandle::from_raw(p.handle));
                    }
                }
                Command::UpdateUniform { slot, data } => {
                    self.update_uniform(slot, data);
                }
                Command::Draw(p) => {
                    if self.state != PassState::InPass {
                        return Err(crate::error::DecodeError::DrawOutsidePass.into());
                    }
                    self.handle_draw(p.first_vertex, p.vertex_count, p.instance_count, None);
                }
                Command::DrawIndexed(p) => {
                    if self.state != PassState::InPass {
                        return Err(crate::error::DecodeError::DrawOutsidePass.into());
                    }
                    self.handle_draw(
                        p.first_index,
                        p.index_count,
                        p.instance_count,
                        Some((self.index_buffer.map(|(_, off)| off).unwrap_or(0), p.base_vertex)),
                    );
                }
                Command::SetViewport(p) => {
                    self.viewport = (p.x as f32, p.y as f32, p.w as f32, p.h as f32);
                }
                Command::SetScissor(p) => {
                    self.scissor = (p.x, p.y, p.w, p.h);
                }
                Command::Clear(p) => {
                    let rect = self.scissor;
                    if p.color_flag != 0 {
                        self.clear_color_region(rect, p.color);
                    }
                    if p.depth_flag != 0 {
                        self.clear_depth_region(rect, p.depth);
                    }
                }
                Command::NoOp => {}
            }
        }
        Ok(())
    }

    fn present(&mut self) {
        log::trace!("present: soft device has no swapchain; framebuffer read via color_buffer()");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKind, BufferUsage};
    use crate::pipeline::{CullMode, PrimitiveType, VertexAttribute, VertexFormat, VertexInputLayout};
    use crate::shader::{ShaderDesc, SoftShader, Varyings};
    use nalgebra_glm::{vec4, Vec4};
    use smallvec::smallvec;

    struct PassThroughShader;
    impl SoftShader for PassThroughShader {
        fn vertex(&self, attrs: &[f32], _uniforms: &[u8]) -> (Vec4, Varyings) {
            (vec4(attrs[0], attrs[1], 0.0, 1.0), smallvec![1.0, 1.0, 1.0, 1.0])
        }
        fn fragment(&self, _varyings: &[f32], _uniforms: &[u8], _textures: &crate::texture::BoundTextures) -> [u8; 4] {
            [255, 0, 0, 255]
        }
    }

    fn make_device() -> SoftDevice {
        SoftDevice::new(DeviceConfig::new(64, 64))
    }

    fn register_triangle_pipeline(device: &mut SoftDevice) -> PipelineHandle {
        shader::reset();
        let shader_handle = shader::register(ShaderDesc {
            name: "device-test-passthrough".to_string(),
            soft_factory: Box::new(|| Box::new(PassThroughShader)),
            glsl_vertex: String::new(),
            glsl_fragment: String::new(),
        });
        let layout = VertexInputLayout {
            stride: 8,
            attributes: smallvec![VertexAttribute {
                format: VertexFormat::Float2,
                offset: 0,
                location: 0,
            }],
        };
        device.create_pipeline(PipelineDesc {
            shader: shader_handle,
            input_layout: layout,
            cull_mode: CullMode::None,
            primitive_type: PrimitiveType::Triangles,
            depth_test_enabled: false,
            depth_write_enabled: false,
            blend_enabled: false,
            label: None,
        })
    }

    #[test]
    fn draw_outside_pass_is_a_fatal_decode_error() {
        let mut device = make_device();
        let mut cb = CommandBuffer::new();
        cb.write_draw(3, 0, 1);
        let err = device.submit(&cb).unwrap_err();
        assert!(matches!(err, SubmitError::Decode(crate::error::DecodeError::DrawOutsidePass)));
    }

    #[test]
    fn nested_begin_pass_is_a_fatal_decode_error() {
        let mut device = make_device();
        let mut cb = CommandBuffer::new();
        let begin = PacketBeginPass {
            color_load_op: 0,
            clear_color: [0.0; 4],
            depth_load_op: 0,
            clear_depth: 1.0,
            viewport: [0, 0, 64, 64],
            scissor: [0, 0, 64, 64],
        };
        cb.write_begin_pass(begin);
        cb.write_begin_pass(begin);
        let err = device.submit(&cb).unwrap_err();
        assert!(matches!(err, SubmitError::Decode(crate::error::DecodeError::NestedBeginPass)));
    }

    #[test]
    fn full_triangle_submission_paints_the_target_color() {
        let mut device = make_device();
        let pipeline = register_triangle_pipeline(&mut device);

        let vertices: [f32; 6] = [-0.8, -0.8, 0.8, -0.8, 0.0, 0.8];
        let vbuf_bytes: Vec<u8> = vertices.iter().flat_map(|f| f.to_le_bytes()).collect();
        let vbuf = device.create_buffer(BufferDesc {
            kind: BufferKind::Vertex,
            usage: BufferUsage::Immutable,
            size: vbuf_bytes.len(),
            initial_data: Some(vbuf_bytes),
            label: None,
        });

        let mut cb = CommandBuffer::new();
        cb.write_begin_pass(PacketBeginPass {
            color_load_op: 1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_load_op: 1,
            clear_depth: 1.0,
            viewport: [0, 0, 64, 64],
            scissor: [0, 0, 64, 64],
        });
        cb.write_set_pipeline(pipeline.id());
        cb.write_set_vertex_stream(vbuf.id(), 0, 8, 0);
        cb.write_draw(3, 0, 1);
        cb.write_end_pass();

        device.submit(&cb).unwrap();

        let center = ((32 * 64 + 32) * 4) as usize;
        assert_eq!(&device.color_buffer()[center..center + 4], &[255, 0, 0, 255]);
    }

    #[test]
    fn clear_without_draw_fills_the_whole_target() {
        let mut device = make_device();
        let mut cb = CommandBuffer::new();
        cb.write_begin_pass(PacketBeginPass {
            color_load_op: 1,
            clear_color: [0.0, 1.0, 0.0, 1.0],
            depth_load_op: 2,
            clear_depth: 1.0,
            viewport: [0, 0, 64, 64],
            scissor: [0, 0, 64, 64],
        });
        cb.write_end_pass();
        device.submit(&cb).unwrap();
        assert_eq!(&device.color_buffer()[0..4], &[0, 255, 0, 255]);
        let last = device.color_buffer().len() - 4;
        assert_eq!(&device.color_buffer()[last..], &[0, 255, 0, 255]);
    }
}
