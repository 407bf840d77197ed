// SPDX-License-Identifier: MIT
//! # still-encode: CPU-side still image encoding
//!
//! Encodes RGB8 frames into the still formats the capture tool writes, builds
//! thumbnails and edits JPEG segments so the metadata travels with the file.
//!
//! ## Key Components
//!
//! - [`codec`]: JPEG / BMP / GIF / PNG encoding via the `image` crate
//! - [`thumb`]: SIMD thumbnail downscaling via `fast_image_resize`
//! - [`jpeg`]: comment segments, JFXX thumbnails and the trailing raw block
//!
//! ## Usage Example
//!
//! ```rust
//! use still_encode::{codec::encode_rgb, jpeg, ImageEncoding};
//!
//! let rgb = vec![128u8; 16 * 8 * 3];
//! let encoded = encode_rgb(&rgb, 16, 8, ImageEncoding::Jpeg, 85).unwrap();
//! let tagged = jpeg::insert_segments(
//!     &encoded,
//!     &[jpeg::comment_segment("IFD0.Make=RaspberryPi").unwrap()],
//! )
//! .unwrap();
//! assert_eq!(jpeg::read_comments(&tagged), vec!["IFD0.Make=RaspberryPi"]);
//! ```

pub mod codec;
pub mod jpeg;
pub mod thumb;

use std::fmt;
use std::str::FromStr;

use fast_image_resize as fir;
use serde::Serialize;
use thiserror::Error;

/// Output container formats supported by the still encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    #[default]
    Jpeg,
    Bmp,
    Gif,
    Png,
}

impl ImageEncoding {
    pub const ALL: [ImageEncoding; 4] = [Self::Jpeg, Self::Bmp, Self::Gif, Self::Png];

    /// Short name as accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
            Self::Png => "png",
        }
    }

    /// Whether the format can carry comment tags and a thumbnail.
    pub fn supports_metadata(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            "gif" => Ok(Self::Gif),
            "png" => Ok(Self::Png),
            other => Err(format!("unknown encoding '{other}' (expected jpg, bmp, gif or png)")),
        }
    }
}

/// Errors raised while encoding or editing a still.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Pixel buffer too small ({actual} bytes, need {expected})")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Data is not a JPEG stream")]
    NotJpeg,
    #[error("JPEG segment payload of {0} bytes exceeds 65533")]
    SegmentTooLarge(usize),
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Fast image resize error: {0}")]
    Fir(#[from] fir::ResizeError),
    #[error("Image buffer error: {0}")]
    ImageBuf(#[from] fir::ImageBufferError),
}

/// Bytes needed for a tightly packed RGB8 frame.
pub(crate) fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_encoding_names() {
        assert_eq!("jpg".parse::<ImageEncoding>().unwrap(), ImageEncoding::Jpeg);
        assert_eq!("PNG".parse::<ImageEncoding>().unwrap(), ImageEncoding::Png);
        assert!("tiff".parse::<ImageEncoding>().is_err());
        for encoding in ImageEncoding::ALL {
            assert_eq!(encoding.name().parse::<ImageEncoding>().unwrap(), encoding);
        }
    }

    #[test]
    fn encode_errors_keep_their_source() {
        use std::error::Error as _;

        let limit = image::error::LimitError::from_kind(image::error::LimitErrorKind::DimensionError);
        let err: EncodeError = image::ImageError::Limits(limit).into();
        assert!(matches!(err, EncodeError::Image(_)));
        assert!(err.to_string().starts_with("Image codec error: "));
        assert!(err.source().is_some());

        let err = EncodeError::SegmentTooLarge(70_000);
        assert_eq!(err.to_string(), "JPEG segment payload of 70000 bytes exceeds 65533");
        assert!(err.source().is_none());
    }
}
