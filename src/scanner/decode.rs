//! Format-appropriate decoding of stored media.

use image::{DynamicImage, ImageFormat};

use crate::error::{Error, Result};

/// Decode `media` with the decoder selected by its MIME type.
pub fn decode_image(media: &[u8], mime_type: &str) -> Result<DynamicImage> {
    let format = match mime_type {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        "image/gif" => ImageFormat::Gif,
        "image/tiff" => ImageFormat::Tiff,
        "image/heic" => return decode_heic(media),
        other => return Err(Error::UnsupportedType(other.to_string())),
    };
    Ok(image::load_from_memory_with_format(media, format)?)
}

#[cfg(feature = "heic")]
fn decode_heic(media: &[u8]) -> Result<DynamicImage> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let heic_error = |msg: &str, e: libheif_rs::HeifError| Error::Decode(format!("heic {}: {}", msg, e));

    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(media).map_err(|e| heic_error("read", e))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|e| heic_error("handle", e))?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| heic_error("decode", e))?;

    let width = decoded.width();
    let height = decoded.height();
    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| Error::Decode("heic image has no interleaved plane".to_string()))?;

    // Rows may be padded; copy only the visible pixels.
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    let img = image::RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| Error::Decode("heic pixel buffer size mismatch".to_string()))?;
    Ok(DynamicImage::ImageRgb8(img))
}

#[cfg(not(feature = "heic"))]
fn decode_heic(_media: &[u8]) -> Result<DynamicImage> {
    Err(Error::Decode(
        "HEIC support not compiled in (enable the `heic` feature)".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&buf, "image/png").unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_decode_wrong_bytes() {
        assert!(matches!(
            decode_image(b"nope", "image/jpeg"),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            decode_image(b"nope", "video/mp4"),
            Err(Error::UnsupportedType(_))
        ));
    }
}
