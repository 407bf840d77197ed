//! Metadata tags applied to every captured frame.

use chrono::{DateTime, TimeZone};

use crate::capture::SensorInfo;
use crate::config::ExifTags;

pub const EXIF_TIMESTAMP_FORMAT: &str = "%Y:%m:%d:%H:%M:%S";

/// Camera identity and capture time tags, in application order.
pub fn system_tags<Tz>(sensor: &SensorInfo, now: &DateTime<Tz>) -> [String; 4]
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let timestamp = now.format(EXIF_TIMESTAMP_FORMAT).to_string();
    [
        format!("IFD0.Model={}", sensor.model),
        format!("IFD0.Make={}", sensor.make),
        format!("EXIF.DateTimeDigitized={timestamp}"),
        format!("EXIF.DateTimeOriginal={timestamp}"),
    ]
}

/// System tags followed by the user tags in the order given.
pub fn capture_tags<Tz>(sensor: &SensorInfo, now: &DateTime<Tz>, user: &ExifTags) -> Vec<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut tags = Vec::with_capacity(4 + user.len());
    tags.extend(system_tags(sensor, now));
    tags.extend(user.iter().map(str::to_string));
    tags
}
