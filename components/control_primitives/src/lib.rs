use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("volume must be between 0 and 150, got {0}")]
    VolumeOutOfRange(i64),
    #[error("seek position must be between 0 and 86400 seconds, got {0}")]
    SeekOutOfRange(f64),
    #[error("skip delta must be between -3600 and 3600 seconds, got {0}")]
    SkipOutOfRange(f64),
    #[error("unknown output route: {0}")]
    UnknownRoute(String),
    #[error("invalid filename: {0}")]
    InvalidFilename(String),
    #[error("file type not allowed: {0}")]
    ExtensionNotAllowed(String),
    #[error("media file not found: {0}")]
    MediaNotFound(String),
}

/// Player volume as a percentage. The player accepts software amplification
/// above 100, capped at 150.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u32);

impl Volume {
    pub const MIN: i64 = 0;
    pub const MAX: i64 = 150;

    pub fn new(level: i64) -> Result<Self, ValidationError> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level as u32))
        } else {
            Err(ValidationError::VolumeOutOfRange(level))
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(100)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute playback position in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPosition(f64);

impl SeekPosition {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 86_400.0;

    pub fn new(seconds: f64) -> Result<Self, ValidationError> {
        if seconds.is_finite() && (Self::MIN..=Self::MAX).contains(&seconds) {
            Ok(Self(seconds))
        } else {
            Err(ValidationError::SeekOutOfRange(seconds))
        }
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }
}

/// Relative skip in seconds, negative for backwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipDelta(f64);

impl SkipDelta {
    pub const MIN: f64 = -3_600.0;
    pub const MAX: f64 = 3_600.0;

    pub fn new(seconds: f64) -> Result<Self, ValidationError> {
        if seconds.is_finite() && (Self::MIN..=Self::MAX).contains(&seconds) {
            Ok(Self(seconds))
        } else {
            Err(ValidationError::SkipOutOfRange(seconds))
        }
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }

    /// A zero skip is accepted but there is nothing to send to the player.
    pub fn is_noop(&self) -> bool {
        self.0 == 0.0
    }
}

/// Video output connector selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputRoute {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "HDMI-A-1")]
    HdmiA1,
    #[serde(rename = "HDMI-A-2")]
    HdmiA2,
}

impl OutputRoute {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "auto" => Ok(Self::Auto),
            "HDMI-A-1" => Ok(Self::HdmiA1),
            "HDMI-A-2" => Ok(Self::HdmiA2),
            other => Err(ValidationError::UnknownRoute(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::HdmiA1 => "HDMI-A-1",
            Self::HdmiA2 => "HDMI-A-2",
        }
    }

    /// The DRM connector to pass to the player, `None` when auto-detecting.
    pub fn connector(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::HdmiA1 => Some("HDMI-A-1"),
            Self::HdmiA2 => Some("HDMI-A-2"),
        }
    }
}

impl fmt::Display for OutputRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video container extensions the controller will play or accept on upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp", "ogv",
];

pub fn extension_allowed(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&lower.as_str())
}

/// A bare media filename, guaranteed to stay inside the media directory.
///
/// Construction rejects anything that could escape: path separators,
/// parent-directory components, absolute paths, and disallowed extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaName(String);

impl MediaName {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::InvalidFilename(name.to_string()));
        }

        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ValidationError::InvalidFilename(name.to_string()));
        }

        if name.starts_with('.') || name.contains('\0') {
            return Err(ValidationError::InvalidFilename(name.to_string()));
        }

        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && extension_allowed(ext) => {
                Ok(Self(name.to_string()))
            }
            _ => Err(ValidationError::ExtensionNotAllowed(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
