//! Camera control parameters applied to the source node.
//!
//! Each field maps to one [`CameraControl`]; the controller applies them one
//! at a time so a sensor that rejects a single control still captures.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|mode| mode.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| {
                        let names: Vec<_> = Self::ALL.iter().map(|m| m.name()).collect();
                        format!("unknown value '{}' (expected one of: {})", s, names.join(", "))
                    })
            }
        }
    };
}

named_enum! {
    /// Automatic exposure program
    ExposureMode {
        Off => "off",
        Auto => "auto",
        Night => "night",
        NightPreview => "nightpreview",
        Backlight => "backlight",
        Spotlight => "spotlight",
        Sports => "sports",
        Snow => "snow",
        Beach => "beach",
        VeryLong => "verylong",
        FixedFps => "fixedfps",
        AntiShake => "antishake",
        Fireworks => "fireworks",
    }
}

named_enum! {
    /// White balance program
    AwbMode {
        Off => "off",
        Auto => "auto",
        Sun => "sun",
        Cloud => "cloud",
        Shade => "shade",
        Tungsten => "tungsten",
        Fluorescent => "fluorescent",
        Incandescent => "incandescent",
        Flash => "flash",
        Horizon => "horizon",
    }
}

named_enum! {
    ImageEffect {
        None => "none",
        Negative => "negative",
        Solarise => "solarise",
        Sketch => "sketch",
        Denoise => "denoise",
        Emboss => "emboss",
        OilPaint => "oilpaint",
        Hatch => "hatch",
        Pastel => "pastel",
        Watercolour => "watercolour",
        Film => "film",
        Blur => "blur",
        Saturation => "saturation",
        Posterise => "posterise",
        Cartoon => "cartoon",
    }
}

named_enum! {
    MeteringMode {
        Average => "average",
        Spot => "spot",
        Backlit => "backlit",
        Matrix => "matrix",
    }
}

/// A single camera setting, as sent to the source node control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraControl {
    /// -100..=100
    Sharpness(i32),
    /// -100..=100
    Contrast(i32),
    /// 0..=100
    Brightness(u32),
    /// -100..=100
    Saturation(i32),
    /// 0 selects automatic ISO
    Iso(u32),
    /// -10..=10
    ExposureCompensation(i32),
    Exposure(ExposureMode),
    Awb(AwbMode),
    Effect(ImageEffect),
    Metering(MeteringMode),
    /// Degrees, normalised to a multiple of 90
    Rotation(u32),
    Flip { horizontal: bool, vertical: bool },
}

impl CameraControl {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sharpness(_) => "sharpness",
            Self::Contrast(_) => "contrast",
            Self::Brightness(_) => "brightness",
            Self::Saturation(_) => "saturation",
            Self::Iso(_) => "iso",
            Self::ExposureCompensation(_) => "exposure compensation",
            Self::Exposure(_) => "exposure mode",
            Self::Awb(_) => "awb mode",
            Self::Effect(_) => "image effect",
            Self::Metering(_) => "metering mode",
            Self::Rotation(_) => "rotation",
            Self::Flip { .. } => "flip",
        }
    }

    /// Checks the value range; sensors call this before applying.
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |v: i32, lo: i32, hi: i32| {
            if (lo..=hi).contains(&v) {
                Ok(())
            } else {
                Err(format!("{} {} outside {}..={}", self.name(), v, lo, hi))
            }
        };
        match *self {
            Self::Sharpness(v) | Self::Contrast(v) | Self::Saturation(v) => in_range(v, -100, 100),
            Self::Brightness(v) if v > 100 => Err(format!("brightness {v} outside 0..=100")),
            Self::ExposureCompensation(v) => in_range(v, -10, 10),
            Self::Iso(v) if v > 1600 => Err(format!("iso {v} above 1600")),
            _ => Ok(()),
        }
    }
}

/// Camera settings applied once while the source node is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraParams {
    pub sharpness: i32,
    pub contrast: i32,
    pub brightness: u32,
    pub saturation: i32,
    pub iso: u32,
    pub exposure_compensation: i32,
    pub exposure_mode: ExposureMode,
    pub awb_mode: AwbMode,
    pub image_effect: ImageEffect,
    pub metering_mode: MeteringMode,
    pub rotation: u32,
    pub hflip: bool,
    pub vflip: bool,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            sharpness: 0,
            contrast: 0,
            brightness: 50,
            saturation: 0,
            iso: 0,
            exposure_compensation: 0,
            exposure_mode: ExposureMode::Auto,
            awb_mode: AwbMode::Auto,
            image_effect: ImageEffect::None,
            metering_mode: MeteringMode::Average,
            rotation: 0,
            hflip: false,
            vflip: false,
        }
    }
}

impl CameraParams {
    /// The controls to send, in application order.
    pub fn controls(&self) -> Vec<CameraControl> {
        vec![
            CameraControl::Saturation(self.saturation),
            CameraControl::Sharpness(self.sharpness),
            CameraControl::Contrast(self.contrast),
            CameraControl::Brightness(self.brightness),
            CameraControl::Iso(self.iso),
            CameraControl::ExposureCompensation(self.exposure_compensation),
            CameraControl::Exposure(self.exposure_mode),
            CameraControl::Metering(self.metering_mode),
            CameraControl::Awb(self.awb_mode),
            CameraControl::Effect(self.image_effect),
            CameraControl::Rotation(normalise_rotation(self.rotation)),
            CameraControl::Flip {
                horizontal: self.hflip,
                vertical: self.vflip,
            },
        ]
    }
}

/// Rounds to the nearest quarter turn and wraps into `0..360`.
pub fn normalise_rotation(degrees: u32) -> u32 {
    ((degrees % 360 + 45) / 90 * 90) % 360
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_round_trip() {
        for mode in ExposureMode::ALL {
            assert_eq!(mode.name().parse::<ExposureMode>().unwrap(), *mode);
        }
        assert_eq!("Tungsten".parse::<AwbMode>().unwrap(), AwbMode::Tungsten);
        assert!("sepia".parse::<ImageEffect>().is_err());
    }

    #[test]
    fn control_ranges() {
        assert!(CameraControl::Sharpness(100).validate().is_ok());
        assert!(CameraControl::Sharpness(101).validate().is_err());
        assert!(CameraControl::Brightness(101).validate().is_err());
        assert!(CameraControl::ExposureCompensation(-11).validate().is_err());
        assert!(CameraControl::Effect(ImageEffect::Negative).validate().is_ok());
    }

    #[test]
    fn rotation_is_normalised() {
        assert_eq!(normalise_rotation(0), 0);
        assert_eq!(normalise_rotation(95), 90);
        assert_eq!(normalise_rotation(359), 0);
        assert_eq!(normalise_rotation(540), 180);
    }

    #[test]
    fn default_controls_are_valid() {
        let controls = CameraParams::default().controls();
        assert_eq!(controls.len(), 12);
        assert!(controls.iter().all(|c| c.validate().is_ok()));
    }
}
