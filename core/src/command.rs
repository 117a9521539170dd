//! Append-only byte-stream command buffer and its packet grammar (C4).
//!
//! Every packet starts with a 4-byte header (`type` tag, `size` including
//! the header, both `u16`, little-endian); `size` is always rounded up to a
//! 4-byte boundary so headers stay 4-byte aligned in the stream.

use std::convert::TryInto;

use crate::error::DecodeError;

const HEADER_LEN: usize = 4;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    BeginPass = 0,
    EndPass = 1,
    SetPipeline = 2,
    SetVertexStream = 3,
    SetIndexBuffer = 4,
    SetTexture = 5,
    UpdateUniform = 6,
    Draw = 7,
    DrawIndexed = 8,
    SetViewport = 9,
    SetScissor = 10,
    Clear = 11,
    NoOp = 12,
}

impl PacketType {
    fn from_u16(tag: u16) -> Result<Self, DecodeError> {
        use PacketType::*;
        Ok(match tag {
            0 => BeginPass,
            1 => EndPass,
            2 => SetPipeline,
            3 => SetVertexStream,
            4 => SetIndexBuffer,
            5 => SetTexture,
            6 => UpdateUniform,
            7 => Draw,
            8 => DrawIndexed,
            9 => SetViewport,
            10 => SetScissor,
            11 => Clear,
            12 => NoOp,
            other => return Err(DecodeError::UnknownTag(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Load = 0,
    Clear = 1,
    DontCare = 2,
}

impl LoadOp {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => LoadOp::Clear,
            2 => LoadOp::DontCare,
            _ => LoadOp::Load,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketBeginPass {
    pub color_load_op: u32,
    pub clear_color: [f32; 4],
    pub depth_load_op: u32,
    pub clear_depth: f32,
    pub viewport: [i32; 4],
    pub scissor: [i32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketSetPipeline {
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketSetVertexStream {
    pub handle: u32,
    pub offset: u32,
    pub stride: u32,
    pub binding_index: u16,
    _padding: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketSetIndexBuffer {
    pub handle: u32,
    pub offset: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketSetTexture {
    pub handle: u32,
    pub slot: u8,
    _padding: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketUpdateUniformHeader {
    pub slot: u8,
    _padding: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketDraw {
    pub vertex_count: u32,
    pub first_vertex: u32,
    pub instance_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketDrawIndexed {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub instance_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketClear {
    pub color_flag: u8,
    pub depth_flag: u8,
    pub stencil_flag: u8,
    _padding: u8,
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: i32,
}

/// A decoded view onto one packet in the stream. Borrows into the buffer
/// it was parsed from.
#[derive(Debug, Clone, Copy)]
pub enum Command<'a> {
    BeginPass(PacketBeginPass),
    EndPass,
    SetPipeline(PacketSetPipeline),
    SetVertexStream(PacketSetVertexStream),
    SetIndexBuffer(PacketSetIndexBuffer),
    SetTexture(PacketSetTexture),
    UpdateUniform { slot: u8, data: &'a [u8] },
    Draw(PacketDraw),
    DrawIndexed(PacketDrawIndexed),
    SetViewport(PacketRect),
    SetScissor(PacketRect),
    Clear(PacketClear),
    NoOp,
}

/// Growable byte-vector command stream. The host writes packets with
/// `write_*`, hands the buffer to `Device::submit`, then calls `reset` to
/// reuse it for the next frame.
#[derive(Default)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer { bytes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    fn push_header(&mut self, tag: PacketType, total_size: usize) {
        self.bytes.extend_from_slice(&(tag as u16).to_le_bytes());
        self.bytes
            .extend_from_slice(&(total_size as u16).to_le_bytes());
    }

    fn write_packet<T: Copy>(&mut self, tag: PacketType, payload: &T) {
        let payload_bytes = unsafe {
            std::slice::from_raw_parts(
                (payload as *const T) as *const u8,
                std::mem::size_of::<T>(),
            )
        };
        let total = align4(HEADER_LEN + payload_bytes.len());
        self.push_header(tag, total);
        self.bytes.extend_from_slice(payload_bytes);
        self.bytes.resize(
            self.bytes.len() + (total - HEADER_LEN - payload_bytes.len()),
            0,
        );
    }

    fn write_tag_only(&mut self, tag: PacketType) {
        self.push_header(tag, HEADER_LEN);
    }

    pub fn write_begin_pass(&mut self, p: PacketBeginPass) {
        self.write_packet(PacketType::BeginPass, &p);
    }

    pub fn write_end_pass(&mut self) {
        self.write_tag_only(PacketType::EndPass);
    }

    pub fn write_set_pipeline(&mut self, handle: u32) {
        self.write_packet(PacketType::SetPipeline, &PacketSetPipeline { handle });
    }

    pub fn write_set_vertex_stream(
        &mut self,
        handle: u32,
        offset: u32,
        stride: u32,
        binding_index: u16,
    ) {
        self.write_packet(
            PacketType::SetVertexStream,
            &PacketSetVertexStream {
                handle,
                offset,
                stride,
                binding_index,
                _padding: 0,
            },
        );
    }

    pub fn write_set_index_buffer(&mut self, handle: u32, offset: u32) {
        self.write_packet(
            PacketType::SetIndexBuffer,
            &PacketSetIndexBuffer { handle, offset },
        );
    }

    pub fn write_set_texture(&mut self, handle: u32, slot: u8) {
        self.write_packet(
            PacketType::SetTexture,
            &PacketSetTexture {
                handle,
                slot,
                _padding: [0; 3],
            },
        );
    }

    /// Appends a uniform header, then `data`, zero-padded to a 4-byte total.
    pub fn write_uniform(&mut self, slot: u8, data: &[u8]) {
        let header_size = HEADER_LEN + std::mem::size_of::<PacketUpdateUniformHeader>();
        let total = align4(header_size + data.len());
        self.push_header(PacketType::UpdateUniform, total);
        self.bytes.push(slot);
        self.bytes.extend_from_slice(&[0u8; 3]);
        self.bytes.extend_from_slice(data);
        self.bytes.resize(self.bytes.len() + (total - header_size - data.len()), 0);
    }

    pub fn write_draw(&mut self, vertex_count: u32, first_vertex: u32, instance_count: u32) {
        self.write_packet(
            PacketType::Draw,
            &PacketDraw {
                vertex_count,
                first_vertex,
                instance_count,
            },
        );
    }

    pub fn write_draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
        instance_count: u32,
    ) {
        self.write_packet(
            PacketType::DrawIndexed,
            &PacketDrawIndexed {
                index_count,
                first_index,
                base_vertex,
                instance_count,
            },
        );
    }

    pub fn write_set_viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.write_packet(PacketType::SetViewport, &PacketRect { x, y, w, h });
    }

    pub fn write_set_scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.write_packet(PacketType::SetScissor, &PacketRect { x, y, w, h });
    }

    pub fn write_clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<i32>) {
        self.write_packet(
            PacketType::Clear,
            &PacketClear {
                color_flag: color.is_some() as u8,
                depth_flag: depth.is_some() as u8,
                stencil_flag: stencil.is_some() as u8,
                _padding: 0,
                color: color.unwrap_or([0.0; 4]),
                depth: depth.unwrap_or(0.0),
                stencil: stencil.unwrap_or(0),
            },
        );
    }

    pub fn write_no_op(&mut self) {
        self.write_tag_only(PacketType::NoOp);
    }
}

/// Walks a byte stream written by `CommandBuffer`, yielding one `Command`
/// per packet. Refuses to advance past the end of the buffer; an unknown
/// type tag or malformed size is a fatal decode error that stops iteration.
pub struct CommandStream<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> CommandStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        CommandStream { bytes, offset: 0 }
    }

    fn read_payload<T: Copy>(bytes: &[u8]) -> T {
        debug_assert!(bytes.len() >= std::mem::size_of::<T>());
        unsafe { (bytes.as_ptr() as *const T).read_unaligned() }
    }
}

impl<'a> Iterator for CommandStream<'a> {
    type Item = Result<Command<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let remaining = self.bytes.len() - self.offset;
        if remaining < HEADER_LEN {
            self.offset = self.bytes.len();
            return Some(Err(DecodeError::TruncatedPacket {
                size: HEADER_LEN,
                remaining,
            }));
        }
        let header = &self.bytes[self.offset..self.offset + HEADER_LEN];
        let tag = u16::from_le_bytes(header[0..2].try_into().unwrap());
        let size = u16::from_le_bytes(header[2..4].try_into().unwrap()) as usize;

        if size % 4 != 0 {
            self.offset = self.bytes.len();
            return Some(Err(DecodeError::Misaligned(size)));
        }
        if size > remaining {
            self.offset = self.bytes.len();
            return Some(Err(DecodeError::TruncatedPacket { size, remaining }));
        }

        let packet_type = match PacketType::from_u16(tag) {
            Ok(t) => t,
            Err(e) => {
                self.offset = self.bytes.len();
                return Some(Err(e));
            }
        };

        let payload = &self.bytes[self.offset + HEADER_LEN..self.offset + size];
        let command = match packet_type {
            PacketType::BeginPass => Command::BeginPass(Self::read_payload(payload)),
            PacketType::EndPass => Command::EndPass,
            PacketType::SetPipeline => Command::SetPipeline(Self::read_payload(payload)),
            PacketType::SetVertexStream => Command::SetVertexStream(Self::read_payload(payload)),
            PacketType::SetIndexBuffer => Command::SetIndexBuffer(Self::read_payload(payload)),
            PacketType::SetTexture => Command::SetTexture(Self::read_payload(payload)),
            PacketType::UpdateUniform => {
                let header: PacketUpdateUniformHeader = Self::read_payload(payload);
                let data = &payload[std::mem::size_of::<PacketUpdateUniformHeader>()..];
                Command::UpdateUniform {
                    slot: header.slot,
                    data,
                }
            }
            PacketType::Draw => Command::Draw(Self::read_payload(payload)),
            PacketType::DrawIndexed => Command::DrawIndexed(Self::read_payload(payload)),
            PacketType::SetViewport => Command::SetViewport(Self::read_payload(payload)),
            PacketType::SetScissor => Command::SetScissor(Self::read_payload(payload)),
            PacketType::Clear => Command::Clear(Self::read_payload(payload)),
            PacketType::NoOp => Command::NoOp,
        };

        self.offset += size;
        Some(Ok(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_set_pipeline_and_uniform() {
        let mut cb = CommandBuffer::new();
        cb.write_set_pipeline(7);
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        cb.write_uniform(3, &payload);

        let mut stream = CommandStream::new(cb.as_bytes());
        match stream.next().unwrap().unwrap() {
            Command::SetPipeline(p) => assert_eq!(p.handle, 7),
            other => panic!("unexpected {:?}", other),
        }
        match stream.next().unwrap().unwrap() {
            Command::UpdateUniform { slot, data } => {
                assert_eq!(slot, 3);
                assert_eq!(data, &payload[..]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let mut bytes = vec![0u8; 4];
        bytes[0..2].copy_from_slice(&99u16.to_le_bytes());
        bytes[2..4].copy_from_slice(&4u16.to_le_bytes());
        let mut stream = CommandStream::new(&bytes);
        assert!(matches!(
            stream.next().unwrap(),
            Err(DecodeError::UnknownTag(99))
        ));
    }

    #[test]
    fn no_op_round_trips() {
        let mut cb = CommandBuffer::new();
        cb.write_no_op();
        let mut stream = CommandStream::new(cb.as_bytes());
        assert!(matches!(stream.next().unwrap().unwrap(), Command::NoOp));
    }

    #[test]
    fn size_sum_equals_buffer_length() {
        let mut cb = CommandBuffer::new();
        cb.write_set_pipeline(1);
        cb.write_draw(3, 0, 1);
        cb.write_end_pass();
        let mut count = 0;
        for cmd in CommandStream::new(cb.as_bytes()) {
            cmd.unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(cb.len() % 4, 0);
    }
}
