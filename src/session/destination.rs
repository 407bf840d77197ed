//! Where a captured frame is written.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::capture::{FrameWriter, Platform};
use crate::config::STDOUT_DESTINATION;
use crate::error::{CaptureError, CaptureResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    /// Resolves the output template for a 1-based frame number. Frame numbers
    /// are only substituted while timelapsing.
    pub fn resolve(template: &str, frame: u64, timelapse: bool) -> Self {
        let name = if timelapse {
            expand_frame_template(template, frame)
        } else {
            template.to_string()
        };
        if name == STDOUT_DESTINATION {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(name))
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, Self::Stdout)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Stdout => None,
            Self::File(path) => Some(path),
        }
    }

    pub fn open(&self, platform: &dyn Platform) -> CaptureResult<FrameWriter> {
        match self {
            Self::Stdout => Ok(platform.open_stdout()),
            Self::File(path) => platform
                .create_file(path)
                .map_err(|e| CaptureError::destination(path.display().to_string(), e)),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Substitutes `%d` and zero-padded `%0Nd` with the frame number; `%%` is a
/// literal percent. Any other `%` sequence is kept as written.
pub fn expand_frame_template(template: &str, frame: u64) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let spec = &rest[pos + 1..];
        if let Some(after) = spec.strip_prefix('%') {
            out.push('%');
            rest = after;
            continue;
        }
        let digits = spec.bytes().take_while(u8::is_ascii_digit).count();
        if spec[digits..].starts_with('d') {
            let flags = &spec[..digits];
            let width = flags.parse::<usize>().unwrap_or(0);
            if flags.starts_with('0') {
                out.push_str(&format!("{frame:0width$}"));
            } else {
                out.push_str(&format!("{frame:width$}"));
            }
            rest = &spec[digits + 1..];
        } else {
            out.push('%');
            rest = spec;
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_expansion() {
        assert_eq!(expand_frame_template("img%d.jpg", 7), "img7.jpg");
        assert_eq!(expand_frame_template("img%04d.jpg", 7), "img0007.jpg");
        assert_eq!(expand_frame_template("img%3d.jpg", 7), "img  7.jpg");
        assert_eq!(expand_frame_template("100%%_%d", 2), "100%_2");
        assert_eq!(expand_frame_template("plain.jpg", 3), "plain.jpg");
        assert_eq!(expand_frame_template("odd%s", 3), "odd%s");
        assert_eq!(expand_frame_template("trailing%", 3), "trailing%");
    }

    #[test]
    fn test_resolve() {
        assert_eq!(Destination::resolve("-", 1, false), Destination::Stdout);
        assert_eq!(Destination::resolve("-", 4, true), Destination::Stdout);
        assert_eq!(
            Destination::resolve("shot%02d.jpg", 3, true),
            Destination::File(PathBuf::from("shot03.jpg"))
        );
        // Without timelapse the name is used as is.
        assert_eq!(
            Destination::resolve("shot%02d.jpg", 3, false),
            Destination::File(PathBuf::from("shot%02d.jpg"))
        );
    }
}
