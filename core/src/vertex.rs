//! Soft pipeline vertex stage: assembly, shader invocation, near-plane
//! clipping, perspective divide / viewport transform, back-face cull (C7).

use smallvec::SmallVec;

use crate::buffer::Buffer;
use crate::pipeline::{CullMode, PipelineDesc};
use crate::shader::{SoftShader, Varyings, MAX_VARYINGS};
use crate::tile::ScreenVertex;

const NEAR_EPSILON: f32 = 1e-5;

/// One vertex between the vertex shader and clipping: clip-space position
/// plus its varyings, still in clip space (not yet perspective-divided).
#[derive(Clone)]
pub struct ClipVertex {
    pub pos: nalgebra_glm::Vec4,
    pub varyings: Varyings,
}

fn lerp_clip_vertex(a: &ClipVertex, b: &ClipVertex, t: f32) -> ClipVertex {
    let pos = a.pos + (b.pos - a.pos) * t;
    let varyings = a
        .varyings
        .iter()
        .zip(b.varyings.iter())
        .map(|(&va, &vb)| va + (vb - va) * t)
        .collect();
    ClipVertex { pos, varyings }
}

/// Clips a single triangle against the near plane `w >= epsilon`, using
/// Sutherland-Hodgman polygon clipping against that one plane, then fans
/// the resulting convex polygon (3 or 4 vertices) back into triangles.
/// Returns 0, 1, or 2 triangles.
pub fn clip_triangle_near(tri: &[ClipVertex; 3]) -> SmallVec<[[ClipVertex; 3]; 2]> {
    let inside = |v: &ClipVertex| v.pos.w >= NEAR_EPSILON;

    let mut polygon: SmallVec<[ClipVertex; 4]> = SmallVec::new();
    for i in 0..3 {
        let current = &tri[i];
        let next = &tri[(i + 1) % 3];
        let current_in = inside(current);
        let next_in = inside(next);

        if current_in {
            polygon.push(current.clone());
        }
        if current_in != next_in {
            // parametric intersection with the plane w = epsilon
            let t = (NEAR_EPSILON - current.pos.w) / (next.pos.w - current.pos.w);
            polygon.push(lerp_clip_vertex(current, next, t));
        }
    }

    let mut out = SmallVec::new();
    if polygon.len() < 3 {
        return out;
    }
    for i in 1..polygon.len() - 1 {
        out.push([polygon[0].clone(), polygon[i].clone(), polygon[i + 1].clone()]);
    }
    out
}

/// Perspective-divides and viewport-transforms one clip vertex, producing
/// its screen-space position and perspective-divided varyings (divided by
/// `w`, for later perspective-correct reconstruction in the rasterizer).
pub fn to_screen(
    v: &ClipVertex,
    viewport: (f32, f32, f32, f32),
    flip_y: bool,
) -> (ScreenVertex, [f32; MAX_VARYINGS], usize) {
    let (vp_x, vp_y, vp_w, vp_h) = viewport;
    let inv_w = 1.0 / v.pos.w;
    let ndc_x = v.pos.x * inv_w;
    let ndc_y = v.pos.y * inv_w;
    let ndc_z = v.pos.z * inv_w;

    let mut screen_y = (ndc_y + 1.0) * 0.5 * vp_h + vp_y;
    if flip_y {
        screen_y = vp_y + vp_h - (screen_y - vp_y);
    }
    let screen = ScreenVertex {
        x: (ndc_x + 1.0) * 0.5 * vp_w + vp_x,
        y: screen_y,
        inv_w,
        z: ndc_z,
    };

    let mut varyings = [0f32; MAX_VARYINGS];
    let count = v.varyings.len().min(MAX_VARYINGS);
    for i in 0..count {
        varyings[i] = v.varyings[i] * inv_w;
    }
    (screen, varyings, count)
}

/// Signed area of a screen-space triangle (shoelace formula, doubled).
/// Positive for counter-clockwise winding in a standard math orientation.
pub fn signed_area(p: &[ScreenVertex; 3]) -> f32 {
    (p[1].x - p[0].x) * (p[2].y - p[0].y) - (p[2].x - p[0].x) * (p[1].y - p[0].y)
}

/// Returns whether a triangle with the given signed screen-space area
/// survives the pipeline's cull mode.
pub fn passes_cull(area: f32, cull_mode: CullMode) -> bool {
    match cull_mode {
        CullMode::None => true,
        // this implementation treats positive signed area (CCW in a
        // y-down screen space) as front-facing
        CullMode::Back => area > 0.0,
        CullMode::Front => area < 0.0,
    }
}

/// Reads one vertex's worth of attribute floats out of a bound vertex
/// buffer, per the pipeline's input layout, flattening all attributes into
/// one contiguous float slice for the shader's `vertex` function.
pub fn assemble_vertex(
    buffer: &Buffer,
    layout: &crate::pipeline::VertexInputLayout,
    vertex_index: u32,
    binding_offset: u32,
) -> SmallVec<[f32; 16]> {
    let base = binding_offset as usize + vertex_index as usize * layout.stride as usize;
    let mut out: SmallVec<[f32; 16]> = SmallVec::new();
    for attr in &layout.attributes {
        let start = base + attr.offset as usize;
        let end = start + attr.format.size_bytes();
        let mut decoded: SmallVec<[f32; 4]> = SmallVec::new();
        attr.format.decode(&buffer.as_bytes()[start..end], &mut decoded);
        out.extend(decoded);
    }
    out
}

/// Runs the full vertex stage for one triangle (three vertex indices),
/// returning the screen-space triangles it produced (0, 1, or 2 depending
/// on near-plane clipping) after culling.
pub fn process_triangle(
    shader: &dyn SoftShader,
    desc: &PipelineDesc,
    buffer: &Buffer,
    binding_offset: u32,
    indices: [u32; 3],
    uniforms: &[u8],
    viewport: (f32, f32, f32, f32),
    flip_y: bool,
) -> SmallVec<[([ScreenVertex; 3], [[f32; MAX_VARYINGS]; 3], usize); 2]> {
    let clip_verts: [ClipVertex; 3] = std::array::from_fn(|i| {
        let attrs = assemble_vertex(buffer, &desc.input_layout, indices[i], binding_offset);
        let (pos, varyings) = shader.vertex(&attrs, uniforms);
        ClipVertex { pos, varyings }
    });

    let mut out = SmallVec::new();
    for triangle in clip_triangle_near(&clip_verts) {
        let mut positions = [ScreenVertex::default(); 3];
        let mut varyings = [[0f32; MAX_VARYINGS]; 3];
        let mut varying_count = 0;
        for (i, v) in triangle.iter().enumerate() {
            let (screen, vary, count) = to_screen(v, viewport, flip_y);
            positions[i] = screen;
            varyings[i] = vary;
            varying_count = count;
        }
        let area = signed_area(&positions);
        if passes_cull(area, desc.cull_mode) {
            out.push((positions, varyings, varying_count));
        }
    }
    out
}
