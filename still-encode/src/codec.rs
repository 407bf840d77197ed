// SPDX-License-Identifier: MIT
// RGB8 in, encoded container bytes out.

use image::codecs::bmp::BmpEncoder;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::{rgb_len, EncodeError, ImageEncoding};

/// Encodes a tightly packed RGB8 frame.
///
/// `quality` only affects JPEG and is clamped to `1..=100`.
pub fn encode_rgb(
    rgb: &[u8],
    width: u32,
    height: u32,
    encoding: ImageEncoding,
    quality: u8,
) -> Result<Vec<u8>, EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::InvalidDimensions { width, height });
    }
    let expected = rgb_len(width, height);
    if rgb.len() < expected {
        return Err(EncodeError::BufferTooSmall { expected, actual: rgb.len() });
    }
    let pixels = &rgb[..expected];

    let mut out = Vec::with_capacity(expected / 4);
    match encoding {
        ImageEncoding::Jpeg => {
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                pixels,
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        ImageEncoding::Bmp => {
            BmpEncoder::new(&mut out).write_image(pixels, width, height, ExtendedColorType::Rgb8)?;
        }
        ImageEncoding::Png => {
            PngEncoder::new(&mut out).write_image(pixels, width, height, ExtendedColorType::Rgb8)?;
        }
        ImageEncoding::Gif => {
            let mut encoder = GifEncoder::new(&mut out);
            encoder.encode(pixels, width, height, ExtendedColorType::Rgb8)?;
        }
    }
    Ok(out)
}
