//! # Configuration Module
//!
//! Run configuration ([`StillConfig`]) and the camera control settings applied
//! to the source node ([`camera::CameraParams`]).

pub mod camera;
#[allow(clippy::module_inception)]
pub mod config;

pub use camera::{AwbMode, CameraControl, CameraParams, ExposureMode, ImageEffect, MeteringMode};
pub use config::{
    parse_demo_interval, parse_thumbnail, BufferRequest, ExifTags, FramePlan, PreviewConfig,
    StillConfig, ThumbnailConfig, Window, MAX_EXIF_TAG_LENGTH, MAX_USER_EXIF_TAGS,
    STDOUT_DESTINATION,
};
