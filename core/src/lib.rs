//! A tile-based software rasterizer behind a small render hardware
//! interface (RHI).
//!
//! A host builds a [`command::CommandBuffer`] of draw calls and submits it
//! to a [`device::Device`] once per frame. [`device::SoftDevice`] is the
//! reference backend: it decodes the buffer, runs vertex processing and
//! triangle binning on the submitting thread, then rasterizes tiles in
//! parallel across a fixed worker pool ([`job::JobSystem`]) before handing
//! the frame back.
//!
//! Resources (buffers, textures, pipelines) are referred to by opaque
//! [`handle::Handle`] values, never by reference, so a `Device`
//! implementation is free to store them however it likes.

pub mod bump;
pub mod buffer;
pub mod command;
pub mod device;
pub mod error;
pub mod handle;
pub mod job;
pub mod pipeline;
pub mod raster;
pub mod shader;
pub mod texture;
pub mod tile;
pub mod vertex;

pub use device::{Device, DeviceConfig, SoftDevice};
pub use error::{BufferError, DecodeError, HandleError, SubmitError};
pub use handle::{BufferHandle, Handle, PipelineHandle, ShaderHandle, TextureHandle};
