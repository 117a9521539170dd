//! Process-wide shader registry: name → (soft factory, GLSL source) (C5).

use std::sync::Mutex;

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use smallvec::SmallVec;

use crate::handle::{Handle, ShaderHandle};
use crate::texture::BoundTextures;

pub const MAX_VARYINGS: usize = 8;

/// Per-vertex varying output, fixed at `MAX_VARYINGS` scalars; most shaders
/// use far fewer, so this stays on the stack instead of allocating.
pub type Varyings = SmallVec<[f32; MAX_VARYINGS]>;

/// The executable side of a shader on the soft backend: one instance is
/// created per pipeline by `ShaderDesc::soft_factory` and reused across
/// draws using that pipeline.
pub trait SoftShader: Send + Sync {
    /// Runs the vertex function for one vertex. `attributes` holds the
    /// decoded per-vertex attribute values in input-layout order.
    /// Returns the clip-space position and the varyings passed to the
    /// fragment function.
    fn vertex(&self, attributes: &[f32], uniforms: &[u8]) -> (nalgebra_glm::Vec4, Varyings);

    /// Runs the fragment function for one covered pixel. `varyings` have
    /// already been perspective-corrected. Returns an RGBA8 color.
    fn fragment(&self, varyings: &[f32], uniforms: &[u8], textures: &BoundTextures) -> [u8; 4];
}

pub type SoftFactory = Box<dyn Fn() -> Box<dyn SoftShader> + Send + Sync>;

/// A registered shader: how to build its soft-backend executor, and the
/// GLSL source a hardware backend would compile instead.
pub struct ShaderDesc {
    pub name: String,
    pub soft_factory: SoftFactory,
    pub glsl_vertex: String,
    pub glsl_fragment: String,
}

impl std::fmt::Debug for ShaderDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderDesc").field("name", &self.name).finish()
    }
}

/// Global name → shader-id table. Registration is expected at startup;
/// after that, reads only need the lock for correctness in the general
/// case (the spec permits lock-free reads once registration has stopped,
/// but this implementation keeps a single, uncontended lock rather than
/// adding an unsafe fast path for a case the scheduling model doesn't
/// actually stress).
pub struct ShaderRegistry {
    entries: Vec<Option<ShaderDesc>>,
    name_to_id: FxHashMap<String, u32>,
}

impl ShaderRegistry {
    fn new() -> Self {
        ShaderRegistry {
            // slot 0 reserved invalid
            entries: vec![None],
            name_to_id: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, desc: ShaderDesc) -> ShaderHandle {
        if let Some(&id) = self.name_to_id.get(&desc.name) {
            return Handle::from_raw(id);
        }
        let id = self.entries.len() as u32;
        self.name_to_id.insert(desc.name.clone(), id);
        self.entries.push(Some(desc));
        Handle::from_raw(id)
    }

    pub fn get_shader(&self, name: &str) -> ShaderHandle {
        self.name_to_id
            .get(name)
            .map(|&id| Handle::from_raw(id))
            .unwrap_or_else(Handle::invalid)
    }

    pub fn get_desc(&self, handle: ShaderHandle) -> Option<&ShaderDesc> {
        if !handle.is_valid() {
            return None;
        }
        self.entries.get(handle.id() as usize)?.as_ref()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.entries.push(None);
        self.name_to_id.clear();
    }
}

lazy_static! {
    static ref REGISTRY: Mutex<ShaderRegistry> = Mutex::new(ShaderRegistry::new());
}

pub fn register(desc: ShaderDesc) -> ShaderHandle {
    REGISTRY.lock().unwrap().register(desc)
}

pub fn get_shader(name: &str) -> ShaderHandle {
    REGISTRY.lock().unwrap().get_shader(name)
}

pub fn with_desc<R>(handle: ShaderHandle, f: impl FnOnce(Option<&ShaderDesc>) -> R) -> R {
    let registry = REGISTRY.lock().unwrap();
    f(registry.get_desc(handle))
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.lock().unwrap().is_registered(name)
}

/// Clears the global registry. Intended for test isolation between test
/// functions that each register their own shaders by name.
pub fn reset() {
    REGISTRY.lock().unwrap().reset();
}
