//! Buffer resource data model: kind, usage hint, owned byte storage.

use crate::error::BufferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Written once at creation time.
    Immutable,
    /// Whole-buffer rewrites permitted after creation.
    Dynamic,
    /// Expected to be overwritten every frame.
    Stream,
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub kind: BufferKind,
    pub usage: BufferUsage,
    pub size: usize,
    pub initial_data: Option<Vec<u8>>,
    pub label: Option<String>,
}

/// Device-owned buffer storage. The device hands out a `BufferHandle`
/// (see `handle.rs`) pointing at one of these; the host never sees the
/// bytes directly except through `update`/the vertex stage's reads.
#[derive(Debug)]
pub struct Buffer {
    pub kind: BufferKind,
    pub usage: BufferUsage,
    data: Vec<u8>,
}

impl Buffer {
    pub fn new(desc: &BufferDesc) -> Self {
        let mut data = vec![0u8; desc.size];
        if let Some(initial) = &desc.initial_data {
            let n = initial.len().min(data.len());
            data[..n].copy_from_slice(&initial[..n]);
        }
        Buffer {
            kind: desc.kind,
            usage: desc.usage,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites `[offset, offset+data.len())`. Fails without mutating
    /// the buffer if that range does not fit inside it.
    pub fn update(&mut self, data: &[u8], offset: usize) -> Result<(), BufferError> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                self.data[offset..end].copy_from_slice(data);
                Ok(())
            }
            None => Err(BufferError::OutOfBounds {
                offset,
                size: data.len(),
                buffer_size: self.data.len(),
            }),
        }
    }
}
