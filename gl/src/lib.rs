//! A GL-style `Device` implementation: the same RHI contract as
//! `softrast-core`'s software backend, driven over a `GlCalls` surface
//! instead of a tile rasterizer. Exists to demonstrate that the RHI is
//! backend-neutral, not to ship a production GPU binding — see
//! [`GlCalls`] for why this crate doesn't depend on a real GL loader.

mod calls;
mod device;

pub use calls::GlCalls;
pub use device::{GlDevice, MAX_TEXTURE_SLOTS, MAX_VERTEX_STREAMS, UNIFORM_SLOTS, UNIFORM_SLOT_SIZE, UNIFORM_STAGING_SIZE};
