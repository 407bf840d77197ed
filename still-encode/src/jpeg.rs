// SPDX-License-Identifier: MIT
//! JPEG segment editing.
//!
//! Segments are inserted directly after SOI and any leading APP0 segments, so a
//! JFXX extension always follows the JFIF header written by the codec. Comment
//! (COM) segments hold one `key=value` tag each and keep insertion order.
//! Raw sensor data, when present, is appended after EOI behind a `BRCM` marker.

use crate::EncodeError;

pub const SOI: u8 = 0xD8;
pub const EOI: u8 = 0xD9;
pub const SOS: u8 = 0xDA;
pub const APP0: u8 = 0xE0;
pub const COM: u8 = 0xFE;

/// Largest payload a length-prefixed segment can carry.
pub const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// Marker that introduces the raw block after EOI.
pub const RAW_BLOCK_MAGIC: &[u8; 4] = b"BRCM";

const JFXX_IDENT: &[u8; 5] = b"JFXX\0";
const JFXX_JPEG_THUMBNAIL: u8 = 0x10;

fn segment(marker: u8, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > MAX_SEGMENT_PAYLOAD {
        return Err(EncodeError::SegmentTooLarge(payload.len()));
    }
    let len = (payload.len() + 2) as u16;
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Builds a COM segment holding `text`.
pub fn comment_segment(text: &str) -> Result<Vec<u8>, EncodeError> {
    segment(COM, text.as_bytes())
}

/// Builds a JFXX APP0 extension embedding a complete JPEG thumbnail.
pub fn jfxx_thumbnail_segment(thumbnail_jpeg: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut payload = Vec::with_capacity(thumbnail_jpeg.len() + JFXX_IDENT.len() + 1);
    payload.extend_from_slice(JFXX_IDENT);
    payload.push(JFXX_JPEG_THUMBNAIL);
    payload.extend_from_slice(thumbnail_jpeg);
    segment(APP0, &payload)
}

fn is_standalone(marker: u8) -> bool {
    matches!(marker, SOI | EOI | 0x01 | 0xD0..=0xD7)
}

/// Walks the header segments, yielding `(marker, payload)` until SOS or EOI.
fn header_segments(jpeg: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut pos = 2;
    std::iter::from_fn(move || {
        loop {
            if pos + 4 > jpeg.len() || jpeg[pos] != 0xFF {
                return None;
            }
            let marker = jpeg[pos + 1];
            if marker == SOS || marker == EOI {
                return None;
            }
            if is_standalone(marker) {
                pos += 2;
                continue;
            }
            let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
            let start = pos + 4;
            let end = pos + 2 + len;
            if len < 2 || end > jpeg.len() {
                return None;
            }
            pos = end;
            return Some((marker, &jpeg[start..end]));
        }
    })
}

fn insertion_point(jpeg: &[u8]) -> Result<usize, EncodeError> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != SOI {
        return Err(EncodeError::NotJpeg);
    }
    let mut pos = 2;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF && jpeg[pos + 1] == APP0 {
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > jpeg.len() {
            return Err(EncodeError::NotJpeg);
        }
        pos += 2 + len;
    }
    Ok(pos)
}

/// Returns a copy of `jpeg` with `segments` spliced in after the APP0 header.
pub fn insert_segments(jpeg: &[u8], segments: &[Vec<u8>]) -> Result<Vec<u8>, EncodeError> {
    let at = insertion_point(jpeg)?;
    let extra: usize = segments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(jpeg.len() + extra);
    out.extend_from_slice(&jpeg[..at]);
    for seg in segments {
        out.extend_from_slice(seg);
    }
    out.extend_from_slice(&jpeg[at..]);
    Ok(out)
}

/// Reads every COM segment in file order.
pub fn read_comments(jpeg: &[u8]) -> Vec<String> {
    header_segments(jpeg)
        .filter(|(marker, _)| *marker == COM)
        .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
        .collect()
}

/// Returns the embedded JFXX thumbnail, if any.
pub fn read_thumbnail(jpeg: &[u8]) -> Option<&[u8]> {
    header_segments(jpeg)
        .filter(|(marker, _)| *marker == APP0)
        .find_map(|(_, payload)| {
            let rest = payload.strip_prefix(JFXX_IDENT.as_slice())?;
            match rest.split_first() {
                Some((&JFXX_JPEG_THUMBNAIL, thumb)) => Some(thumb),
                _ => None,
            }
        })
}

/// Appends the raw block after the image.
pub fn append_raw_block(jpeg: &mut Vec<u8>, raw: &[u8]) {
    jpeg.reserve(raw.len() + RAW_BLOCK_MAGIC.len());
    jpeg.extend_from_slice(RAW_BLOCK_MAGIC);
    jpeg.extend_from_slice(raw);
}

/// Splits a file into the JPEG stream and the trailing raw block.
pub fn split_raw_block(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    let needle = [0xFF, EOI, b'B', b'R', b'C', b'M'];
    match data.windows(needle.len()).position(|w| w == needle) {
        Some(at) => (&data[..at + 2], Some(&data[at + needle.len()..])),
        None => (data, None),
    }
}
