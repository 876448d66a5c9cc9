//! Host-side images, textures, and built-in fallbacks.

/// Decoded RGBA8 image.
///
/// The pixel array is dropped by [`release_pixels`](Self::release_pixels) once
/// the device copy has completed; the dimensions and byte size stay available
/// for layout and bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct HostImage {
    /// Image name from the source document.
    pub name: Option<String>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    pixels: Option<Vec<u8>>,
    byte_size: u64,
}

impl HostImage {
    /// Bytes per RGBA8 pixel.
    pub const BYTES_PER_PIXEL: u64 = 4;

    /// Wrap decoded RGBA8 pixels.
    ///
    /// Returns `None` when `pixels` does not hold exactly
    /// `width * height * 4` bytes.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let byte_size = width as u64 * height as u64 * Self::BYTES_PER_PIXEL;
        if pixels.len() as u64 != byte_size {
            return None;
        }
        Some(Self {
            name: None,
            width,
            height,
            pixels: Some(pixels),
            byte_size,
        })
    }

    /// A 1x1 image filled with one color.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            name: None,
            width: 1,
            height: 1,
            pixels: Some(rgba.to_vec()),
            byte_size: Self::BYTES_PER_PIXEL,
        }
    }

    /// Set the image name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pixel bytes, or `None` after release.
    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }

    /// Size of the RGBA8 pixel data, valid before and after release.
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Whether the host pixel array is still present.
    pub fn is_resident(&self) -> bool {
        self.pixels.is_some()
    }

    /// Drop the host pixel array.
    pub fn release_pixels(&mut self) {
        self.pixels = None;
    }
}

/// A sampled image: an image index plus an optional sampler index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTexture {
    /// Index into the store's image array.
    pub image: usize,
    /// Index into the store's sampler array; `None` selects the default sampler.
    pub sampler: Option<usize>,
}

/// Built-in 1x1 textures appended after the scene textures.
///
/// Material proxies point at these when a texture slot is unused or the
/// referenced texture could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultTexture {
    /// Opaque white; neutral for multiplied color and occlusion.
    White,
    /// Opaque black; neutral for emission.
    Black,
    /// Tangent-space +Z normal.
    FlatNormal,
    /// Fully transparent black.
    Transparent,
    /// Magenta marker for textures that failed to load.
    Missing,
}

impl DefaultTexture {
    /// Number of built-in textures.
    pub const COUNT: usize = 5;

    /// All built-in textures, in the order they are appended.
    pub const ALL: [DefaultTexture; Self::COUNT] = [
        DefaultTexture::White,
        DefaultTexture::Black,
        DefaultTexture::FlatNormal,
        DefaultTexture::Transparent,
        DefaultTexture::Missing,
    ];

    /// Position of this texture within the appended block.
    pub fn offset(self) -> usize {
        self as usize
    }

    /// The single RGBA8 pixel.
    pub fn pixel(self) -> [u8; 4] {
        match self {
            Self::White => [255, 255, 255, 255],
            Self::Black => [0, 0, 0, 255],
            Self::FlatNormal => [128, 128, 255, 255],
            Self::Transparent => [0, 0, 0, 0],
            Self::Missing => [255, 0, 255, 255],
        }
    }

    /// Debug name.
    pub fn name(self) -> &'static str {
        match self {
            Self::White => "default_white",
            Self::Black => "default_black",
            Self::FlatNormal => "default_flat_normal",
            Self::Transparent => "default_transparent",
            Self::Missing => "default_missing",
        }
    }

    /// The 1x1 host image for this texture.
    pub fn image(self) -> HostImage {
        HostImage::solid(self.pixel()).with_name(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba8_checks_size() {
        assert!(HostImage::from_rgba8(2, 2, vec![0; 16]).is_some());
        assert!(HostImage::from_rgba8(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn test_release_keeps_size() {
        let mut image = HostImage::from_rgba8(4, 2, vec![7; 32]).unwrap();
        assert!(image.is_resident());
        image.release_pixels();
        assert!(!image.is_resident());
        assert!(image.pixels().is_none());
        assert_eq!(image.byte_size(), 32);
    }

    #[test]
    fn test_default_texture_order() {
        for (i, texture) in DefaultTexture::ALL.iter().enumerate() {
            assert_eq!(texture.offset(), i);
            let image = texture.image();
            assert_eq!(image.pixels(), Some(&texture.pixel()[..]));
            assert_eq!(image.name.as_deref(), Some(texture.name()));
        }
    }
}
