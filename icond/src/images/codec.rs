//! Image encoding: PNG, JPEG, ICO and inline data URIs

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::{ico::IcoEncoder, jpeg::JpegEncoder, png::PngEncoder};
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::IconSet;
use crate::error::IconError;

/// JPEG quality used for every lossy encode
pub const JPEG_QUALITY: u8 = 95;

/// Formats a request may ask for
pub const REQUEST_FORMATS: [IconFormat; 2] = [IconFormat::Png, IconFormat::Jpeg];

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconFormat {
    /// Lossless, keeps alpha
    Png,
    /// Lossy, alpha flattened onto white
    Jpeg,
    /// Icon container, used for the favicon
    Ico,
}

impl IconFormat {
    /// File extension (no dot)
    pub fn extension(self) -> &'static str {
        match self {
            IconFormat::Png => "png",
            IconFormat::Jpeg => "jpeg",
            IconFormat::Ico => "ico",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            IconFormat::Png => "image/png",
            IconFormat::Jpeg => "image/jpeg",
            IconFormat::Ico => "image/x-icon",
        }
    }

    /// Parse a format a caller asked for. Only `png` and `jpeg` are accepted
    /// (case-insensitive); aliases and padding are rejected.
    pub fn requested(token: &str) -> Result<IconFormat, IconError> {
        match token.to_lowercase().as_str() {
            "png" => Ok(IconFormat::Png),
            "jpeg" => Ok(IconFormat::Jpeg),
            _ => Err(IconError::InvalidParameter(
                "Format must be one of [png, jpeg]".to_string(),
            )),
        }
    }
}

impl FromStr for IconFormat {
    type Err = IconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(IconFormat::Png),
            "jpeg" | "jpg" => Ok(IconFormat::Jpeg),
            "ico" => Ok(IconFormat::Ico),
            other => Err(IconError::Encoding(format!("unsupported format: {other}"))),
        }
    }
}

impl fmt::Display for IconFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Encode an image into the bytes of `format`
pub fn encode(image: &DynamicImage, format: IconFormat) -> Result<Vec<u8>, IconError> {
    let mut buf = Vec::new();
    match format {
        IconFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buf))?,
        IconFormat::Jpeg => flatten_onto_white(image)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))?,
        IconFormat::Ico => image.write_with_encoder(IcoEncoder::new(&mut buf))?,
    }
    Ok(buf)
}

/// Encode using a format token; unknown tokens are an encoding error
pub fn encode_token(image: &DynamicImage, token: &str) -> Result<Vec<u8>, IconError> {
    encode(image, token.parse()?)
}

/// Encode as a `data:` URI for inline preview
pub fn encode_inline(image: &DynamicImage, format: IconFormat) -> Result<String, IconError> {
    let bytes = encode(image, format)?;
    Ok(format!(
        "data:{};base64,{}",
        format.mime_type(),
        BASE64.encode(bytes)
    ))
}

/// Inline previews for a whole set, keyed by size label.
/// Every label uses `format`, including 16.
pub fn encode_inline_all(
    icons: &IconSet,
    format: IconFormat,
) -> Result<BTreeMap<String, String>, IconError> {
    icons
        .iter()
        .map(|(label, image)| -> Result<(String, String), IconError> {
            Ok((label.to_string(), encode_inline(image, format)?))
        })
        .collect()
}

/// Encode and write to `path`
pub fn save_to(image: &DynamicImage, path: &Path, format: IconFormat) -> Result<(), IconError> {
    let bytes = encode(image, format)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Decode PNG, JPEG or ICO bytes
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, IconError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Composite onto an opaque white background; JPEG has no alpha
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        Rgb([over_white(r, a), over_white(g, a), over_white(b, a)])
    })
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(channel) * a + 255 * (255 - a) + 127) / 255) as u8
}
