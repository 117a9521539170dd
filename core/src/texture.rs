//! Immutable 2D RGBA8 texture resource.

pub const MAX_TEXTURE_SLOTS: usize = 8;

/// The textures bound via `SetTexture` at the moment a fragment is shaded,
/// one optional slot per binding point. Shaders index into this by slot
/// number; an empty slot is `None`.
pub struct BoundTextures<'a>(pub [Option<&'a Texture>; MAX_TEXTURE_SLOTS]);

impl<'a> BoundTextures<'a> {
    pub fn empty() -> Self {
        BoundTextures([None; MAX_TEXTURE_SLOTS])
    }

    pub fn get(&self, slot: u8) -> Option<&'a Texture> {
        self.0.get(slot as usize).copied().flatten()
    }
}

/// Device-owned 2D image, always stored as 4-channel 8-bit RGBA
/// internally; textures uploaded with fewer channels are expanded on
/// creation. No mipmaps; sampling/filtering is entirely the shader's
/// business.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    /// Builds a texture from `channels`-interleaved pixel data, expanding
    /// to RGBA8: 1-channel is replicated into RGB with alpha 255, 3-channel
    /// gets alpha 255 appended, 4-channel is used as-is.
    pub fn from_pixels(pixels: &[u8], width: u32, height: u32, channels: u32) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        let mut rgba = vec![255u8; pixel_count * 4];
        match channels {
            4 => rgba.copy_from_slice(&pixels[..pixel_count * 4]),
            3 => {
                for i in 0..pixel_count {
                    rgba[i * 4..i * 4 + 3].copy_from_slice(&pixels[i * 3..i * 3 + 3]);
                }
            }
            1 => {
                for i in 0..pixel_count {
                    let v = pixels[i];
                    rgba[i * 4..i * 4 + 3].copy_from_slice(&[v, v, v]);
                }
            }
            other => panic!("unsupported channel count {}", other),
        }
        Texture {
            width,
            height,
            pixels: rgba,
        }
    }

    pub fn rgba(&self) -> &[u8] {
        &self.pixels
    }

    /// Nearest-neighbor sample at normalized coordinates, clamped to edge.
    pub fn sample_nearest(&self, u: f32, v: f32) -> [u8; 4] {
        let x = ((u.clamp(0.0, 1.0)) * (self.width.max(1) - 1) as f32).round() as u32;
        let y = ((v.clamp(0.0, 1.0)) * (self.height.max(1) - 1) as f32).round() as u32;
        let idx = ((y * self.width + x) as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel_expands_to_opaque_gray() {
        let tex = Texture::from_pixels(&[128, 64], 2, 1, 1);
        assert_eq!(tex.rgba(), &[128, 128, 128, 255, 64, 64, 64, 255]);
    }

    #[test]
    fn three_channel_gets_opaque_alpha() {
        let tex = Texture::from_pixels(&[10, 20, 30], 1, 1, 3);
        assert_eq!(tex.rgba(), &[10, 20, 30, 255]);
    }

    #[test]
    fn four_channel_passes_through() {
        let tex = Texture::from_pixels(&[1, 2, 3, 4], 1, 1, 4);
        assert_eq!(tex.rgba(), &[1, 2, 3, 4]);
    }
}
