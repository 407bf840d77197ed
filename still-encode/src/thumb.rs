// SPDX-License-Identifier: MIT
// Thumbnail scaler built on fast_image_resize.
// RGB8 in → RGB8 out at the requested size; aspect ratio is not preserved.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x3;
use fir::{ResizeOptions, Resizer};

use crate::codec::encode_rgb;
use crate::{rgb_len, EncodeError, ImageEncoding};

/// Downscales a tightly packed RGB8 frame.
pub fn scale_rgb(
    resizer: &mut Resizer,
    src_rgb: &[u8],
    width: u32,
    height: u32,
    dst_width: u32,
    dst_height: u32,
) -> Result<Vec<u8>, EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::InvalidDimensions { width, height });
    }
    if dst_width == 0 || dst_height == 0 {
        return Err(EncodeError::InvalidDimensions { width: dst_width, height: dst_height });
    }
    let expected = rgb_len(width, height);
    if src_rgb.len() < expected {
        return Err(EncodeError::BufferTooSmall { expected, actual: src_rgb.len() });
    }

    let mut dst = vec![0u8; rgb_len(dst_width, dst_height)];
    {
        let src_view = TypedImageRef::<U8x3>::from_buffer(width, height, &src_rgb[..expected])?;
        let mut dst_image = TypedImage::<U8x3>::from_buffer(dst_width, dst_height, dst.as_mut_slice())?;
        resizer.resize_typed::<U8x3>(&src_view, &mut dst_image, &ResizeOptions::new())?;
    }
    Ok(dst)
}

/// Scales and JPEG-encodes a thumbnail in one step.
pub fn jpeg_thumbnail(
    resizer: &mut Resizer,
    src_rgb: &[u8],
    width: u32,
    height: u32,
    thumb_width: u32,
    thumb_height: u32,
    quality: u8,
) -> Result<Vec<u8>, EncodeError> {
    let small = scale_rgb(resizer, src_rgb, width, height, thumb_width, thumb_height)?;
    encode_rgb(&small, thumb_width, thumb_height, ImageEncoding::Jpeg, quality)
}
