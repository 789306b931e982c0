//! Color-key configuration.
//!
//! A [`ChromaConfig`] is an immutable value. Every control message runs its
//! four optional chroma inputs through [`ChromaConfig::merge`], which falls
//! back to the previous value for omitted inputs and normalizes the result.
//! The caller compares the returned flag to decide whether the encoder has to
//! be restarted.

use picam_common::ipc::ControlMessage;
use std::path::{Path, PathBuf};

/// Key color used until a client picks one
pub const DEFAULT_KEY_COLOR: &str = "0xFFFFFF";

#[derive(Debug, Clone, PartialEq)]
pub struct ChromaConfig {
    active: bool,
    background_image: Option<PathBuf>,
    key_color: String,
    sensitivity: f64,
    blend: f64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            active: false,
            background_image: None,
            key_color: DEFAULT_KEY_COLOR.to_string(),
            sensitivity: 0.0,
            blend: 0.0,
        }
    }
}

/// Raw, unvalidated chroma values as received. `None` keeps the previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromaInput {
    pub background_image: Option<PathBuf>,
    pub key_color: Option<String>,
    pub sensitivity: Option<f64>,
    pub blend: Option<f64>,
}

impl From<&ControlMessage> for ChromaInput {
    fn from(msg: &ControlMessage) -> Self {
        Self {
            background_image: msg.chroma_image.clone(),
            key_color: msg.chroma_color.clone(),
            sensitivity: msg.chroma_sensitivity,
            blend: msg.chroma_blend,
        }
    }
}

fn normalize_sensitivity(value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        0.0
    }
}

fn normalize_blend(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl ChromaConfig {
    /// Merge `input` over `previous`. Returns the new config and whether it
    /// differs from `previous`.
    pub fn merge(previous: &ChromaConfig, input: &ChromaInput) -> (ChromaConfig, bool) {
        let background_image = input
            .background_image
            .clone()
            .or_else(|| previous.background_image.clone());
        let key_color = input
            .key_color
            .clone()
            .unwrap_or_else(|| previous.key_color.clone());
        let sensitivity = normalize_sensitivity(input.sensitivity.unwrap_or(previous.sensitivity));
        let blend = normalize_blend(input.blend.unwrap_or(previous.blend));
        let active = sensitivity != 0.0 && background_image.is_some();

        let next = ChromaConfig {
            active,
            background_image,
            key_color,
            sensitivity,
            blend,
        };
        let changed = next != *previous;
        (next, changed)
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn background_image(&self) -> Option<&Path> {
        self.background_image.as_deref()
    }

    pub fn key_color(&self) -> &str {
        &self.key_color
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn blend(&self) -> f64 {
        self.blend
    }

    /// Extra encoder input carrying the background image. Empty when inactive.
    pub fn input_args(&self) -> Vec<String> {
        match (&self.background_image, self.active) {
            (Some(image), true) => vec!["-i".into(), image.to_string_lossy().into_owned()],
            _ => Vec::new(),
        }
    }

    /// Key-and-overlay filter graph. Input 0 is the background, input 1 the
    /// camera. Empty when inactive.
    pub fn filter_args(&self) -> Vec<String> {
        if !self.active {
            return Vec::new();
        }
        vec![
            "-filter_complex".into(),
            format!(
                "[0:v][1:v]scale2ref[i][v];[v]colorkey={}:{}:{}:[ck];[i][ck]overlay",
                self.key_color, self.sensitivity, self.blend
            ),
        ]
    }
}
