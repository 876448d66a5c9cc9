//! Image decoding.

use std::path::Path;

use crate::texture::{DefaultTexture, HostImage};

use super::buffers::{Buffers, read_uri};

/// Decode every image in the document to RGBA8.
///
/// Decoding runs on at most `workers` threads. An image that cannot be read or
/// decoded is replaced by the [`DefaultTexture::Missing`] pattern so texture
/// indices stay stable.
pub(crate) fn load_images(
    document: &gltf_dep::Document,
    buffers: &Buffers,
    base_dir: Option<&Path>,
    workers: usize,
) -> Vec<HostImage> {
    let images: Vec<gltf_dep::Image<'_>> = document.images().collect();

    let decoded = super::tasks::parallel_map(images.len(), workers, |i| {
        let image = &images[i];
        match decode_source(image, buffers, base_dir) {
            Ok(decoded) => decoded,
            Err(reason) => {
                log::warn!(
                    "Image {} ({}) replaced by the missing-texture pattern: {reason}",
                    image.index(),
                    image.name().unwrap_or("unnamed")
                );
                DefaultTexture::Missing.image()
            }
        }
    });

    images
        .iter()
        .zip(decoded)
        .map(|(image, decoded)| match image.name() {
            Some(name) => decoded.with_name(name),
            None => decoded,
        })
        .collect()
}

fn decode_source(
    image: &gltf_dep::Image<'_>,
    buffers: &Buffers,
    base_dir: Option<&Path>,
) -> Result<HostImage, String> {
    match image.source() {
        gltf_dep::image::Source::View { view, .. } => {
            let buffer = buffers
                .get(view.buffer().index())
                .and_then(|b| b.as_deref())
                .ok_or_else(|| format!("buffer {} has no data", view.buffer().index()))?;
            let start = view.offset();
            let end = start + view.length();
            let bytes = buffer
                .get(start..end)
                .ok_or_else(|| format!("view {} exceeds its buffer", view.index()))?;
            decode_image(bytes)
        }
        gltf_dep::image::Source::Uri { uri, .. } => {
            let bytes = read_uri(uri, base_dir).map_err(|e| e.to_string())?;
            decode_image(&bytes)
        }
    }
}

fn decode_image(bytes: &[u8]) -> Result<HostImage, String> {
    let img = image::load_from_memory(bytes).map_err(|e| format!("{e}"))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    HostImage::from_rgba8(width, height, rgba.into_raw())
        .ok_or_else(|| "decoded pixel count does not match dimensions".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let decoded = decode_image(&png_bytes(3, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.byte_size(), 24);
        assert_eq!(&decoded.pixels().unwrap()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_image(b"not an image").is_err());
    }
}
