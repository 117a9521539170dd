//! Renders a single RGB-interpolated triangle with the soft backend and
//! writes the result out as a PPM image.
//!
//! Run with `cargo run --example triangle -- out.ppm`.

use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};

use smallvec::smallvec;
use softrast_core::buffer::{BufferDesc, BufferKind, BufferUsage};
use softrast_core::command::{CommandBuffer, PacketBeginPass};
use softrast_core::device::{Device, DeviceConfig, SoftDevice};
use softrast_core::pipeline::{
    CullMode, PipelineDesc, PrimitiveType, VertexAttribute, VertexFormat, VertexInputLayout,
};
use softrast_core::shader::{self, ShaderDesc, SoftShader, Varyings};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 256;

/// Interleaved position (xy) + color (rgb) per vertex, fed straight
/// through to the fragment stage as varyings.
struct VertexColorShader;

impl SoftShader for VertexColorShader {
    fn vertex(&self, attrs: &[f32], _uniforms: &[u8]) -> (nalgebra_glm::Vec4, Varyings) {
        let position = nalgebra_glm::vec4(attrs[0], attrs[1], 0.0, 1.0);
        let color = smallvec![attrs[2], attrs[3], attrs[4]];
        (position, color)
    }

    fn fragment(&self, varyings: &[f32], _uniforms: &[u8], _textures: &softrast_core::texture::BoundTextures) -> [u8; 4] {
        [
            (varyings[0].clamp(0.0, 1.0) * 255.0) as u8,
            (varyings[1].clamp(0.0, 1.0) * 255.0) as u8,
            (varyings[2].clamp(0.0, 1.0) * 255.0) as u8,
            255,
        ]
    }
}

fn write_ppm(path: &str, width: u32, height: u32, rgba: &[u8]) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "P6\n{} {}\n255", width, height)?;
    for pixel in rgba.chunks_exact(4) {
        w.write_all(&pixel[..3])?;
    }
    Ok(())
}

fn main() {
    pretty_env_logger::init();

    let shader_handle = shader::register(ShaderDesc {
        name: "vertex-color".to_string(),
        soft_factory: Box::new(|| Box::new(VertexColorShader)),
        glsl_vertex: include_str!("data/vertex_color.vert.glsl.txt").to_string(),
        glsl_fragment: include_str!("data/vertex_color.frag.glsl.txt").to_string(),
    });

    let mut device = SoftDevice::new(DeviceConfig::new(WIDTH, HEIGHT));

    let layout = VertexInputLayout {
        stride: 20,
        attributes: smallvec![
            VertexAttribute {
                format: VertexFormat::Float2,
                offset: 0,
                location: 0,
            },
            VertexAttribute {
                format: VertexFormat::Float3,
                offset: 8,
                location: 1,
            },
        ],
    };
    let pipeline = device.create_pipeline(PipelineDesc {
        shader: shader_handle,
        input_layout: layout,
        cull_mode: CullMode::None,
        primitive_type: PrimitiveType::Triangles,
        depth_test_enabled: true,
        depth_write_enabled: true,
        blend_enabled: false,
        label: Some("vertex-color".to_string()),
    });

    // x, y, r, g, b
    #[rustfmt::skip]
    let vertices: [f32; 15] = [
        -0.8, -0.8,  1.0, 0.0, 0.0,
         0.8, -0.8,  0.0, 1.0, 0.0,
         0.0,  0.8,  0.0, 0.0, 1.0,
    ];
    let vertex_bytes: Vec<u8> = vertices.iter().flat_map(|f| f.to_le_bytes()).collect();
    let vertex_buffer = device.create_buffer(BufferDesc {
        kind: BufferKind::Vertex,
        usage: BufferUsage::Immutable,
        size: vertex_bytes.len(),
        initial_data: Some(vertex_bytes),
        label: Some("triangle vertices".to_string()),
    });

    let mut commands = CommandBuffer::new();
    commands.write_begin_pass(PacketBeginPass {
        color_load_op: 1,
        clear_color: [0.05, 0.05, 0.08, 1.0],
        depth_load_op: 1,
        clear_depth: 1.0,
        viewport: [0, 0, WIDTH as i32, HEIGHT as i32],
        scissor: [0, 0, WIDTH as i32, HEIGHT as i32],
    });
    commands.write_set_pipeline(pipeline.id());
    commands.write_set_vertex_stream(vertex_buffer.id(), 0, 20, 0);
    commands.write_draw(3, 0, 1);
    commands.write_end_pass();

    device.submit(&commands).expect("submit failed");
    device.present();

    let out_path = env::args().nth(1).unwrap_or_else(|| "triangle.ppm".to_string());
    write_ppm(&out_path, WIDTH, HEIGHT, device.color_buffer()).expect("failed to write output image");
    log::info!("wrote {}", out_path);
}
