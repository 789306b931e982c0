//! Input validation for control request parameters and capture config entries.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Output device path: absolute, no whitespace (e.g. "/dev/video0", "/dev/v4l/by-id/x").
static DEVICE_PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[A-Za-z0-9_.:/\-]{1,255}$").unwrap());

/// Capture configuration entry: `KEY=VALUE` with exactly one `=`.
static CONFIG_ENTRY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_\-]*)=([^=\s][^=]*)$").unwrap());

/// Key color accepted by the colorkey filter: a color name or `0xRRGGBB[AA]` / `#RRGGBB[AA]`.
static KEY_COLOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z]{3,32}|(?:0x|#)[0-9A-Fa-f]{6}(?:[0-9A-Fa-f]{2})?)$").unwrap()
});

/// Maximum length of a config entry or a path
pub const MAX_FIELD_LEN: usize = 4096;

/// Validation error types.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Output device path is not an absolute device-like path
    InvalidDevicePath(String),
    /// Key color is neither a color name nor a hex value
    InvalidKeyColor(String),
    /// Config entry is not `KEY=VALUE`
    InvalidConfigEntry(String),
    /// Recording requested without a positive length
    InvalidVideoLength(u32),
    /// Path field is empty
    EmptyPath { field: &'static str },
    /// String field exceeds maximum length
    StringTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidDevicePath(p) => write!(f, "Invalid device path: {}", p),
            ValidationError::InvalidKeyColor(c) => write!(f, "Invalid key color: {}", c),
            ValidationError::InvalidConfigEntry(e) => {
                write!(f, "Invalid config entry (expected KEY=VALUE): {}", e)
            }
            ValidationError::InvalidVideoLength(len) => {
                write!(f, "Invalid video length: {}", len)
            }
            ValidationError::EmptyPath { field } => write!(f, "{} is empty", field),
            ValidationError::StringTooLong { field, len, max } => {
                write!(f, "{} too long: {} chars (max {})", field, len, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate the virtual output device path.
pub fn validate_device_path(path: &str) -> Result<(), ValidationError> {
    if !DEVICE_PATH_PATTERN.is_match(path) {
        return Err(ValidationError::InvalidDevicePath(path.to_string()));
    }
    Ok(())
}

/// Validate a chroma key color.
pub fn validate_key_color(color: &str) -> Result<(), ValidationError> {
    if !KEY_COLOR_PATTERN.is_match(color) {
        return Err(ValidationError::InvalidKeyColor(color.to_string()));
    }
    Ok(())
}

/// Bound the size of a raw config entry; its shape is checked later by
/// [`parse_config_entry`].
pub fn validate_config_entry_len(entry: &str) -> Result<(), ValidationError> {
    if entry.len() > MAX_FIELD_LEN {
        return Err(ValidationError::StringTooLong {
            field: "config",
            len: entry.len(),
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

/// Split a `KEY=VALUE` capture config entry.
///
/// Examples: "size=1920x1080", "shutter=20000", "awb=indoor"
pub fn parse_config_entry(entry: &str) -> Result<(&str, &str), ValidationError> {
    let caps = CONFIG_ENTRY_PATTERN
        .captures(entry.trim())
        .ok_or_else(|| ValidationError::InvalidConfigEntry(entry.to_string()))?;
    match (caps.get(1), caps.get(2)) {
        (Some(key), Some(value)) => Ok((key.as_str(), value.as_str().trim_end())),
        _ => Err(ValidationError::InvalidConfigEntry(entry.to_string())),
    }
}

/// Validate a user-supplied file path.
pub fn validate_path(field: &'static str, path: &Path) -> Result<(), ValidationError> {
    let len = path.as_os_str().len();
    if len == 0 {
        return Err(ValidationError::EmptyPath { field });
    }
    if len > MAX_FIELD_LEN {
        return Err(ValidationError::StringTooLong {
            field,
            len,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

/// A recording needs a positive duration.
pub fn validate_video_length(len: u32) -> Result<(), ValidationError> {
    if len == 0 {
        return Err(ValidationError::InvalidVideoLength(len));
    }
    Ok(())
}
