//! PWA icon bundles
//!
//! A bundle is a deflated zip holding every icon size, a `manifest.json`
//! template pointing at them, and a static `README.txt`. Bundles are built
//! per request and never stored.

use std::io::{Cursor, Write};

use image::DynamicImage;
use serde_json::json;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::codec::{self, IconFormat};
use super::{IconSet, SizeLabel};
use crate::error::IconError;

pub const DEFAULT_APP_NAME: &str = "My PWA App";
pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const README_FILENAME: &str = "README.txt";
pub const FAVICON_FILENAME: &str = "favicon.ico";
pub const BUNDLE_MIME_TYPE: &str = "application/zip";

/// Labels whose manifest entries are tagged maskable
const MASKABLE: [SizeLabel; 2] = [SizeLabel::S512, SizeLabel::S192];

const README: &str = r##"PWA Icon Generator - Generated Icons
====================================

This package contains all the icon sizes needed for your Progressive Web App (PWA).

INCLUDED FILES:
--------------
- icon-512x512.*     : Large icon (app launcher, splash screen)
- icon-192x192.*     : Medium icon (app launcher, home screen)
- icon-164x164.*     : Small icon (various UI elements)
- favicon.ico        : Favicon for browser tabs (ICO format)
- manifest.json      : PWA manifest template
- README.txt         : This file

INSTALLATION INSTRUCTIONS:
-------------------------
1. Copy all icon files to your app's public/images directory
2. Update manifest.json with your app details:
   - Change "name" and "short_name" to your app name
   - Update "theme_color" and "background_color" to match your brand
   - Adjust "start_url" if needed

3. Reference the manifest in your HTML <head>:
   <link rel="manifest" href="/manifest.json">

4. Add favicon reference:
   <link rel="icon" type="image/x-icon" href="/images/favicon.ico">

5. For best results, also add these meta tags:
   <meta name="theme-color" content="#000000">
   <link rel="apple-touch-icon" href="/images/icon-192x192.png">

PWA MANIFEST ICON PURPOSES:
---------------------------
- "any": Icon can be used for any purpose
- "maskable": Icon designed to work with adaptive icon masks
  (Note: For true maskable icons, ensure your design has important
  content in the center 'safe zone' with padding around edges)

BROWSER SUPPORT:
---------------
- Chrome/Edge: Full support for all features
- Firefox: Full support for all features
- Safari: Partial support (manifest.json support varies)

For more information about PWAs:
https://web.dev/progressive-web-apps/
"##;

/// File name for one icon inside a bundle or as a single download
pub fn icon_filename(label: SizeLabel, format: IconFormat) -> String {
    if label.is_favicon() {
        FAVICON_FILENAME.to_string()
    } else {
        let px = label.pixels();
        format!("icon-{}x{}.{}", px, px, format.extension())
    }
}

/// Format actually used for a label; the favicon is always ICO
pub fn effective_format(label: SizeLabel, format: IconFormat) -> IconFormat {
    if label.is_favicon() {
        IconFormat::Ico
    } else {
        format
    }
}

/// MIME type of a single-file download
pub fn single_mime_type(label: SizeLabel, format: IconFormat) -> &'static str {
    effective_format(label, format).mime_type()
}

/// Suggested download name for a generation's bundle
pub fn bundle_filename(generation_id: &str) -> String {
    let prefix: String = generation_id.chars().take(8).collect();
    format!("pwa-icons-{prefix}.zip")
}

/// Manifest template referencing every non-favicon icon in `icons`
pub fn manifest(icons: &IconSet, format: IconFormat, app_name: &str) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = icons
        .iter()
        .map(|(label, _)| label)
        .filter(|label| !label.is_favicon())
        .map(|label| {
            let px = label.pixels();
            let mut entry = json!({
                "src": icon_filename(label, format),
                "sizes": format!("{px}x{px}"),
                "type": format.mime_type(),
            });
            if MASKABLE.contains(&label) {
                entry["purpose"] = json!("any maskable");
            }
            entry
        })
        .collect();

    json!({
        "name": app_name,
        "short_name": app_name,
        "description": "Progressive Web App",
        "start_url": "/",
        "display": "standalone",
        "theme_color": "#000000",
        "background_color": "#ffffff",
        "icons": entries,
    })
}

/// Static installation instructions shipped in every bundle
pub fn readme() -> &'static str {
    README
}

/// Build the zip bundle for a derived icon set
pub fn build_bundle(
    icons: &IconSet,
    format: IconFormat,
    app_name: &str,
) -> Result<Vec<u8>, IconError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    for (label, image) in icons.iter() {
        let filename = icon_filename(label, format);
        let bytes = codec::encode(image, effective_format(label, format))?;
        zip.start_file(filename.as_str(), options)?;
        zip.write_all(&bytes)?;
        debug!("Added {} ({} bytes) to bundle", filename, bytes.len());
    }

    let manifest = serde_json::to_string_pretty(&manifest(icons, format, app_name))
        .map_err(|e| IconError::Internal(format!("failed to serialize manifest: {e}")))?;
    zip.start_file(MANIFEST_FILENAME, options)?;
    zip.write_all(manifest.as_bytes())?;

    zip.start_file(README_FILENAME, options)?;
    zip.write_all(README.as_bytes())?;

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Encode one icon for a single-file download
pub fn build_single(
    image: &DynamicImage,
    label: SizeLabel,
    format: IconFormat,
) -> Result<Vec<u8>, IconError> {
    codec::encode(image, effective_format(label, format))
}

/// Size of an archive in megabytes
pub fn measure_size_mb(bytes: &[u8]) -> f64 {
    bytes.len() as f64 / (1024.0 * 1024.0)
}
