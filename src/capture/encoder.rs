//! Still image encoders behind the encoder node.

use fast_image_resize::Resizer;
use still_encode::{codec, jpeg, thumb, ImageEncoding};
use tracing::{debug, warn};

use crate::capture::sensor::StillFrame;
use crate::config::{ThumbnailConfig, MAX_EXIF_TAG_LENGTH};
use crate::error::{CaptureError, CaptureResult};

/// Everything the encoder needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    pub encoding: ImageEncoding,
    pub quality: u32,
    pub thumbnail: ThumbnailConfig,
    /// `key=value` tags in application order
    pub tags: Vec<String>,
}

/// Checks a metadata tag: `key=value` with a non-empty key, at most 127 bytes.
pub fn check_tag(tag: &str) -> Result<(), String> {
    if tag.len() > MAX_EXIF_TAG_LENGTH {
        return Err(format!("tag is {} bytes, limit is {}", tag.len(), MAX_EXIF_TAG_LENGTH));
    }
    match tag.split_once('=') {
        Some((key, _)) if !key.trim().is_empty() => Ok(()),
        _ => Err("expected key=value".to_string()),
    }
}

/// Compresses captured stills.
pub trait ImageEncoder: Send {
    fn name(&self) -> &str;

    fn supports(&self, encoding: ImageEncoding) -> bool;

    /// Prepares the encoder; called when the encoder node is enabled.
    fn open(&mut self, encoding: ImageEncoding) -> CaptureResult<()> {
        if self.supports(encoding) {
            Ok(())
        } else {
            Err(CaptureError::node_enable(
                self.name().to_string(),
                format!("encoding {encoding} not supported"),
            ))
        }
    }

    fn encode(&mut self, frame: &StillFrame, job: &EncodeJob) -> CaptureResult<Vec<u8>>;
}

/// CPU encoder built on `still-encode`.
pub struct SoftwareEncoder {
    resizer: Resizer,
}

impl Default for SoftwareEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareEncoder {
    pub fn new() -> Self {
        Self { resizer: Resizer::new() }
    }

    fn jpeg_segments(&mut self, frame: &StillFrame, job: &EncodeJob) -> Vec<Vec<u8>> {
        let mut segments = Vec::with_capacity(job.tags.len() + 1);
        if job.thumbnail.is_active() {
            let thumbnail = thumb::jpeg_thumbnail(
                &mut self.resizer,
                frame.image.as_raw(),
                frame.width(),
                frame.height(),
                job.thumbnail.width,
                job.thumbnail.height,
                job.thumbnail.quality.min(100) as u8,
            )
            .and_then(|t| jpeg::jfxx_thumbnail_segment(&t));
            match thumbnail {
                Ok(segment) => segments.push(segment),
                Err(e) => warn!(error = %e, "Thumbnail dropped"),
            }
        }
        for tag in &job.tags {
            match jpeg::comment_segment(tag) {
                Ok(segment) => segments.push(segment),
                Err(e) => warn!(%tag, error = %e, "Metadata tag dropped"),
            }
        }
        segments
    }
}

impl ImageEncoder for SoftwareEncoder {
    fn name(&self) -> &str {
        "software encoder"
    }

    fn supports(&self, encoding: ImageEncoding) -> bool {
        ImageEncoding::ALL.contains(&encoding)
    }

    fn encode(&mut self, frame: &StillFrame, job: &EncodeJob) -> CaptureResult<Vec<u8>> {
        let encoded = codec::encode_rgb(
            frame.image.as_raw(),
            frame.width(),
            frame.height(),
            job.encoding,
            job.quality.min(100) as u8,
        )?;
        if !job.encoding.supports_metadata() {
            if !job.tags.is_empty() || frame.raw.is_some() {
                debug!(encoding = %job.encoding, "Metadata and raw data not embedded");
            }
            return Ok(encoded);
        }

        let segments = self.jpeg_segments(frame, job);
        let mut out = jpeg::insert_segments(&encoded, &segments)?;
        if let Some(raw) = &frame.raw {
            jpeg::append_raw_block(&mut out, raw);
        }
        Ok(out)
    }
}
