//! Integration tests that exercise the public API the way a host crate
//! would: register a shader, build a device, submit a frame, inspect the
//! resulting framebuffer. Unit tests closer to individual modules live
//! inline in `src/`.

use smallvec::smallvec;
use softrast_core::buffer::{BufferDesc, BufferKind, BufferUsage};
use softrast_core::command::{CommandBuffer, PacketBeginPass};
use softrast_core::device::{Device, DeviceConfig, SoftDevice};
use softrast_core::pipeline::{CullMode, PipelineDesc, PrimitiveType, VertexAttribute, VertexFormat, VertexInputLayout};
use softrast_core::shader::{self, ShaderDesc, SoftShader, Varyings};
use softrast_core::texture::BoundTextures;

struct FlatColorShader {
    color: [f32; 3],
}

impl SoftShader for FlatColorShader {
    fn vertex(&self, attrs: &[f32], _uniforms: &[u8]) -> (nalgebra_glm::Vec4, Varyings) {
        (nalgebra_glm::vec4(attrs[0], attrs[1], 0.0, 1.0), Varyings::new())
    }

    fn fragment(&self, _varyings: &[f32], _uniforms: &[u8], _textures: &BoundTextures) -> [u8; 4] {
        [
            (self.color[0] * 255.0) as u8,
            (self.color[1] * 255.0) as u8,
            (self.color[2] * 255.0) as u8,
            255,
        ]
    }
}

fn make_pipeline(device: &mut SoftDevice, name: &str, color: [f32; 3]) -> softrast_core::handle::PipelineHandle {
    let shader = shader::register(ShaderDesc {
        name: name.to_string(),
        soft_factory: Box::new(move || Box::new(FlatColorShader { color })),
        glsl_vertex: String::new(),
        glsl_fragment: String::new(),
    });
    device.create_pipeline(PipelineDesc {
        shader,
        input_layout: VertexInputLayout {
            stride: 8,
            attributes: smallvec![VertexAttribute {
                format: VertexFormat::Float2,
                offset: 0,
                location: 0,
            }],
        },
        cull_mode: CullMode::None,
        primitive_type: PrimitiveType::Triangles,
        depth_test_enabled: true,
        depth_write_enabled: true,
        blend_enabled: false,
        label: None,
    })
}

fn vertex_buffer(device: &mut SoftDevice, verts: &[f32]) -> softrast_core::handle::BufferHandle {
    let bytes: Vec<u8> = verts.iter().flat_map(|f| f.to_le_bytes()).collect();
    device.create_buffer(BufferDesc {
        kind: BufferKind::Vertex,
        usage: BufferUsage::Immutable,
        size: bytes.len(),
        initial_data: Some(bytes),
        label: None,
    })
}

/// A shader whose third vertex attribute is fed straight through as clip-space
/// `z`, so a test can place a triangle at a chosen depth.
struct DepthColorShader {
    color: [f32; 3],
}

impl SoftShader for DepthColorShader {
    fn vertex(&self, attrs: &[f32], _uniforms: &[u8]) -> (nalgebra_glm::Vec4, Varyings) {
        (nalgebra_glm::vec4(attrs[0], attrs[1], attrs[2], 1.0), Varyings::new())
    }

    fn fragment(&self, _varyings: &[f32], _uniforms: &[u8], _textures: &BoundTextures) -> [u8; 4] {
        [
            (self.color[0] * 255.0) as u8,
            (self.color[1] * 255.0) as u8,
            (self.color[2] * 255.0) as u8,
            255,
        ]
    }
}

fn make_depth_pipeline(
    device: &mut SoftDevice,
    name: &str,
    color: [f32; 3],
    depth_test_enabled: bool,
    depth_write_enabled: bool,
) -> softrast_core::handle::PipelineHandle {
    let shader = shader::register(ShaderDesc {
        name: name.to_string(),
        soft_factory: Box::new(move || Box::new(DepthColorShader { color })),
        glsl_vertex: String::new(),
        glsl_fragment: String::new(),
    });
    device.create_pipeline(PipelineDesc {
        shader,
        input_layout: VertexInputLayout {
            stride: 12,
            attributes: smallvec![
                VertexAttribute {
                    format: VertexFormat::Float2,
                    offset: 0,
                    location: 0,
                },
                VertexAttribute {
                    format: VertexFormat::Float1,
                    offset: 8,
                    location: 1,
                },
            ],
        },
        cull_mode: CullMode::None,
        primitive_type: PrimitiveType::Triangles,
        depth_test_enabled,
        depth_write_enabled,
        blend_enabled: false,
        label: None,
    })
}

/// A full-viewport triangle with a `z` attribute appended to each vertex.
fn depth_triangle_buffer(device: &mut SoftDevice, z: f32) -> softrast_core::handle::BufferHandle {
    vertex_buffer(
        device,
        &[-4.0, -4.0, z, 4.0, -4.0, z, 0.0, 4.0, z],
    )
}

#[test]
fn triangle_covering_the_whole_viewport_fills_every_pixel() {
    shader::reset();
    let mut device = SoftDevice::new(DeviceConfig::new(32, 32));
    let pipeline = make_pipeline(&mut device, "e2e-fill", [0.2, 0.4, 0.6]);
    // a triangle big enough to cover the entire clip-space square
    let vbuf = vertex_buffer(&mut device, &[-4.0, -4.0, 4.0, -4.0, 0.0, 4.0]);

    let mut cb = CommandBuffer::new();
    cb.write_begin_pass(PacketBeginPass {
        color_load_op: 1,
        clear_color: [0.0, 0.0, 0.0, 1.0],
        depth_load_op: 1,
        clear_depth: 1.0,
        viewport: [0, 0, 32, 32],
        scissor: [0, 0, 32, 32],
    });
    cb.write_set_pipeline(pipeline.id());
    cb.write_set_vertex_stream(vbuf.id(), 0, 8, 0);
    cb.write_draw(3, 0, 1);
    cb.write_end_pass();

    device.submit(&cb).unwrap();

    let expected = [51, 102, 153, 255];
    for pixel in device.color_buffer().chunks_exact(4) {
        assert_eq!(pixel, &expected);
    }
}

#[test]
fn scissor_rect_confines_a_clear_to_its_region() {
    shader::reset();
    let mut device = SoftDevice::new(DeviceConfig::new(16, 16));

    let mut cb = CommandBuffer::new();
    cb.write_begin_pass(PacketBeginPass {
        color_load_op: 1,
        clear_color: [0.0, 0.0, 0.0, 1.0],
        depth_load_op: 2,
        clear_depth: 1.0,
        viewport: [0, 0, 16, 16],
        scissor: [0, 0, 16, 16],
    });
    cb.write_set_scissor(4, 4, 4, 4);
    cb.write_clear(Some([1.0, 1.0, 1.0, 1.0]), None, None);
    cb.write_end_pass();

    device.submit(&cb).unwrap();

    let width = 16usize;
    let pixel = |x: usize, y: usize| -> &[u8] {
        let idx = (y * width + x) * 4;
        &device.color_buffer()[idx..idx + 4]
    };
    assert_eq!(pixel(5, 5), &[255, 255, 255, 255]);
    assert_eq!(pixel(0, 0), &[0, 0, 0, 255]);
}

#[test]
fn draw_before_begin_pass_returns_decode_error_without_panicking() {
    shader::reset();
    let mut device = SoftDevice::new(DeviceConfig::new(8, 8));
    let mut cb = CommandBuffer::new();
    cb.write_draw(3, 0, 1);
    assert!(device.submit(&cb).is_err());
}

#[test]
fn nearer_triangle_wins_regardless_of_draw_order() {
    shader::reset();
    let mut device = SoftDevice::new(DeviceConfig::new(16, 16));
    let pipeline = make_depth_pipeline(&mut device, "e2e-depth", [1.0, 0.0, 0.0], true, true);
    let far = depth_triangle_buffer(&mut device, 0.8);
    let near = depth_triangle_buffer(&mut device, 0.2);

    // far drawn first, then near: near should end up on top.
    let mut cb = CommandBuffer::new();
    cb.write_begin_pass(PacketBeginPass {
        color_load_op: 1,
        clear_color: [0.0, 0.0, 0.0, 1.0],
        depth_load_op: 1,
        clear_depth: 1.0,
        viewport: [0, 0, 16, 16],
        scissor: [0, 0, 16, 16],
    });
    cb.write_set_pipeline(pipeline.id());
    cb.write_set_vertex_stream(far.id(), 0, 12, 0);
    cb.write_draw(3, 0, 1);
    cb.write_set_vertex_stream(near.id(), 0, 12, 0);
    cb.write_draw(3, 0, 1);
    cb.write_end_pass();
    device.submit(&cb).unwrap();
    let center = ((8 * 16 + 8) * 4) as usize;
    assert_eq!(&device.color_buffer()[center..center + 4], &[255, 0, 0, 255]);
    assert_eq!(device.depth_buffer()[8 * 16 + 8], 0.2);

    // near drawn first, then far: far must fail the depth test and leave
    // the near triangle's color and depth untouched.
    let mut cb = CommandBuffer::new();
    cb.write_begin_pass(PacketBeginPass {
        color_load_op: 1,
        clear_color: [0.0, 0.0, 0.0, 1.0],
        depth_load_op: 1,
        clear_depth: 1.0,
        viewport: [0, 0, 16, 16],
        scissor: [0, 0, 16, 16],
    });
    cb.write_set_pipeline(pipeline.id());
    cb.write_set_vertex_stream(near.id(), 0, 12, 0);
    cb.write_draw(3, 0, 1);
    cb.write_set_vertex_stream(far.id(), 0, 12, 0);
    cb.write_draw(3, 0, 1);
    cb.write_end_pass();
    device.submit(&cb).unwrap();
    assert_eq!(&device.color_buffer()[center..center + 4], &[255, 0, 0, 255]);
    assert_eq!(device.depth_buffer()[8 * 16 + 8], 0.2);
}

#[test]
fn depth_state_is_read_from_each_triangles_own_pipeline() {
    shader::reset();
    let mut device = SoftDevice::new(DeviceConfig::new(16, 16));

    // seed: writes depth 0.1 everywhere (its own depth state doesn't matter
    // here, the clear depth of 1.0 always lets it through).
    let seed = make_depth_pipeline(&mut device, "e2e-seed", [0.0, 1.0, 0.0], true, true);
    // `a`: depth test AND write enabled. Drawn at z=0.5, behind the seed's
    // 0.1, so a correct per-triangle depth test must reject it.
    let a = make_depth_pipeline(&mut device, "e2e-a", [1.0, 0.0, 0.0], true, true);
    // `b`: depth test and write both disabled, never drawn — bound last so
    // that a buggy implementation reading a single pass-wide depth flag
    // (from whichever pipeline happened to be bound at `EndPass`) would
    // apply `b`'s disabled depth test to `a`'s triangle instead of `a`'s own.
    let b = make_depth_pipeline(&mut device, "e2e-b", [0.0, 0.0, 1.0], false, false);

    let seed_buf = depth_triangle_buffer(&mut device, 0.1);
    let a_buf = depth_triangle_buffer(&mut device, 0.5);

    let mut cb = CommandBuffer::new();
    cb.write_begin_pass(PacketBeginPass {
        color_load_op: 1,
        clear_color: [0.0, 0.0, 0.0, 1.0],
        depth_load_op: 1,
        clear_depth: 1.0,
        viewport: [0, 0, 16, 16],
        scissor: [0, 0, 16, 16],
    });
    cb.write_set_pipeline(seed.id());
    cb.write_set_vertex_stream(seed_buf.id(), 0, 12, 0);
    cb.write_draw(3, 0, 1);
    cb.write_set_pipeline(a.id());
    cb.write_set_vertex_stream(a_buf.id(), 0, 12, 0);
    cb.write_draw(3, 0, 1);
    cb.write_set_pipeline(b.id());
    cb.write_end_pass();

    device.submit(&cb).unwrap();

    let center = ((8 * 16 + 8) * 4) as usize;
    // `a`'s own depth test (enabled) must reject it against the seed's
    // nearer depth, leaving the seed's green in place.
    assert_eq!(&device.color_buffer()[center..center + 4], &[0, 255, 0, 255]);
    assert_eq!(device.depth_buffer()[8 * 16 + 8], 0.1);
}
