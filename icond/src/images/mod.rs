//! Icon derivation, encoding and packaging
//!
//! Provides:
//! - Size-adaptive resampling from one 512x512 master
//! - PNG/JPEG/ICO encoding and inline data URIs
//! - Zip bundles with a generated PWA manifest
//! - The in-memory generation session cache
//! - The generation pipeline tying them to the synthesis engine

pub mod bundle;
pub mod codec;
mod gen;
pub mod resample;
mod store;

use std::collections::BTreeMap;
use std::fmt;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub use codec::IconFormat;
pub use gen::{
    enhance_prompt, generate_icons, validate_request, GenerateRequest, GenerationMetadata,
    GenerationParams, GenerationResult,
};
pub use store::{compute_digest, GenerationRecord, SessionCache, TimingBreakdown};

/// Logical icon size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeLabel {
    #[serde(rename = "512")]
    S512,
    #[serde(rename = "192")]
    S192,
    #[serde(rename = "164")]
    S164,
    #[serde(rename = "16")]
    S16,
}

impl SizeLabel {
    /// All labels, largest first
    pub const ALL: [SizeLabel; 4] = [
        SizeLabel::S512,
        SizeLabel::S192,
        SizeLabel::S164,
        SizeLabel::S16,
    ];

    /// Edge length in pixels
    pub fn pixels(self) -> u32 {
        match self {
            SizeLabel::S512 => 512,
            SizeLabel::S192 => 192,
            SizeLabel::S164 => 164,
            SizeLabel::S16 => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SizeLabel::S512 => "512",
            SizeLabel::S192 => "192",
            SizeLabel::S164 => "164",
            SizeLabel::S16 => "16",
        }
    }

    /// Parse from a label token ("512", "192", "164", "16")
    pub fn parse(s: &str) -> Option<SizeLabel> {
        match s.trim() {
            "512" => Some(SizeLabel::S512),
            "192" => Some(SizeLabel::S192),
            "164" => Some(SizeLabel::S164),
            "16" => Some(SizeLabel::S16),
            _ => None,
        }
    }

    /// The favicon label is always shipped as ICO
    pub fn is_favicon(self) -> bool {
        self == SizeLabel::S16
    }
}

impl fmt::Display for SizeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four icon sizes derived from one master image
///
/// Only built by [`resample::derive_all`], so every label is always present.
#[derive(Debug, Clone)]
pub struct IconSet {
    icons: BTreeMap<SizeLabel, DynamicImage>,
}

impl IconSet {
    pub(crate) fn from_map(icons: BTreeMap<SizeLabel, DynamicImage>) -> Self {
        Self { icons }
    }

    pub fn get(&self, label: SizeLabel) -> Option<&DynamicImage> {
        self.icons.get(&label)
    }

    /// The master entry
    pub fn master(&self) -> Option<&DynamicImage> {
        self.get(SizeLabel::S512)
    }

    /// Iterate largest first
    pub fn iter(&self) -> impl Iterator<Item = (SizeLabel, &DynamicImage)> {
        self.icons.iter().map(|(label, image)| (*label, image))
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}
