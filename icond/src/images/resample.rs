//! Size-adaptive downscaling
//!
//! Every derived size is a Lanczos3 resize of the master followed by an
//! unsharp mask whose strength depends on the downscale ratio. The favicon
//! also gets a contrast boost. No step is randomized, so the same master
//! always yields the same pixels.

use std::collections::BTreeMap;

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, Rgba, RgbaImage};
use tracing::debug;

use super::{IconSet, SizeLabel};
use crate::error::IconError;

/// Edge length of the synthesized master image
pub const MASTER_SIZE: u32 = 512;

/// Contrast factor applied to the favicon after sharpening
pub const FAVICON_CONTRAST: f32 = 1.5;

/// Unsharp mask parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpenParams {
    /// Gaussian blur radius
    pub radius: f32,
    /// Strength in percent
    pub amount: u32,
    /// Minimum per-channel difference that gets sharpened
    pub threshold: u8,
}

impl SharpenParams {
    /// Pick the sharpening tier for a `source / target` ratio.
    /// Lower bounds are inclusive.
    pub fn for_ratio(ratio: f64) -> Self {
        if ratio >= 32.0 {
            Self {
                radius: 2.0,
                amount: 200,
                threshold: 2,
            }
        } else if ratio >= 3.0 {
            Self {
                radius: 1.5,
                amount: 160,
                threshold: 3,
            }
        } else if ratio >= 2.0 {
            Self {
                radius: 1.0,
                amount: 130,
                threshold: 3,
            }
        } else {
            Self {
                radius: 0.8,
                amount: 120,
                threshold: 3,
            }
        }
    }

    /// Tier for resizing a `source` edge down to `target`
    pub fn for_sizes(source: u32, target: u32) -> Self {
        Self::for_ratio(f64::from(source) / f64::from(target))
    }
}

/// Downscale `master` to `target`×`target` and sharpen
pub fn derive(master: &DynamicImage, target: u32) -> Result<DynamicImage, IconError> {
    let sharpened = resize_and_sharpen(master, target)?;
    Ok(restore_color_mode(master, sharpened))
}

/// Derive the 16×16 favicon: sharpen, then boost contrast
pub fn derive_favicon(master: &DynamicImage) -> Result<DynamicImage, IconError> {
    let sharpened = resize_and_sharpen(master, SizeLabel::S16.pixels())?;
    let boosted = enhance_contrast(&sharpened, FAVICON_CONTRAST);
    Ok(restore_color_mode(master, boosted))
}

/// Derive every icon size. The 512 entry is the master itself.
pub fn derive_all(master: DynamicImage) -> Result<IconSet, IconError> {
    let (width, height) = master.dimensions();
    if width != MASTER_SIZE || height != MASTER_SIZE {
        return Err(IconError::InvalidParameter(format!(
            "master image must be {MASTER_SIZE}x{MASTER_SIZE}, got {width}x{height}"
        )));
    }

    let mut icons = BTreeMap::new();
    icons.insert(SizeLabel::S192, derive(&master, SizeLabel::S192.pixels())?);
    icons.insert(SizeLabel::S164, derive(&master, SizeLabel::S164.pixels())?);
    icons.insert(SizeLabel::S16, derive_favicon(&master)?);
    icons.insert(SizeLabel::S512, master);

    Ok(IconSet::from_map(icons))
}

fn resize_and_sharpen(master: &DynamicImage, target: u32) -> Result<RgbaImage, IconError> {
    let (width, height) = master.dimensions();
    if width != height {
        return Err(IconError::InvalidParameter(format!(
            "master image must be square, got {width}x{height}"
        )));
    }
    if target == 0 || target > width {
        return Err(IconError::InvalidParameter(format!(
            "cannot derive {target}x{target} from a {width}x{width} master"
        )));
    }

    let params = SharpenParams::for_sizes(width, target);
    debug!(
        "Deriving {}x{} (radius {}, amount {}%, threshold {})",
        target, target, params.radius, params.amount, params.threshold
    );

    let resized = resize_lanczos(master, target);
    Ok(unsharp_mask(&resized, params))
}

/// Lanczos3 resize. Masters with an alpha channel are resized premultiplied
/// so fully transparent pixels contribute no color to their neighbors.
fn resize_lanczos(master: &DynamicImage, target: u32) -> RgbaImage {
    if !master.color().has_alpha() {
        return imageops::resize(&master.to_rgba8(), target, target, FilterType::Lanczos3);
    }

    let mut premultiplied = master.to_rgba32f();
    for pixel in premultiplied.pixels_mut() {
        let alpha = pixel.0[3];
        for c in 0..3 {
            pixel.0[c] *= alpha;
        }
    }
    let resized = imageops::resize(&premultiplied, target, target, FilterType::Lanczos3);

    RgbaImage::from_fn(target, target, |x, y| {
        let [r, g, b, a] = resized.get_pixel(x, y).0;
        let straight = |v: f32| if a > 0.0 { v / a } else { 0.0 };
        Rgba([
            unit_to_channel(straight(r)),
            unit_to_channel(straight(g)),
            unit_to_channel(straight(b)),
            unit_to_channel(a),
        ])
    })
}

fn unit_to_channel(v: f32) -> u8 {
    clamp_channel(v * 255.0)
}

/// Unsharp mask: push each color channel away from its blurred value when
/// the difference reaches the threshold. Alpha is left untouched.
pub fn unsharp_mask(image: &RgbaImage, params: SharpenParams) -> RgbaImage {
    let blurred = imageops::blur(image, params.radius);
    let amount = params.amount as f32 / 100.0;
    let threshold = i16::from(params.threshold);

    let mut out = image.clone();
    for (pixel, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let orig = i16::from(pixel.0[c]);
            let diff = orig - i16::from(soft.0[c]);
            if diff.abs() >= threshold {
                pixel.0[c] = clamp_channel(f32::from(orig) + f32::from(diff) * amount);
            }
        }
    }
    out
}

/// Scale each color channel's distance from the mean luminance by `factor`.
/// A factor of 1.0 leaves the image unchanged.
pub fn enhance_contrast(image: &RgbaImage, factor: f32) -> RgbaImage {
    let mean = mean_luma(image);
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            let v = f32::from(pixel.0[c]);
            pixel.0[c] = clamp_channel(mean + factor * (v - mean));
        }
    }
    out
}

/// Rounded mean of ITU-R 601 luma over all pixels
fn mean_luma(image: &RgbaImage) -> f32 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image
        .pixels()
        .map(|p| {
            let [r, g, b, _] = p.0;
            (u64::from(r) * 299 + u64::from(g) * 587 + u64::from(b) * 114 + 500) / 1000
        })
        .sum();
    (sum as f64 / count as f64).round() as f32
}

fn clamp_channel(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Hand back the working RGBA buffer in the master's channel layout
fn restore_color_mode(master: &DynamicImage, rgba: RgbaImage) -> DynamicImage {
    let derived = DynamicImage::ImageRgba8(rgba);
    if master.color().has_alpha() {
        derived
    } else {
        DynamicImage::ImageRgb8(derived.into_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_master() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(512, 512, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_sharpen_tiers_for_icon_sizes() {
        let favicon = SharpenParams::for_sizes(512, 16);
        assert_eq!((favicon.radius, favicon.amount, favicon.threshold), (2.0, 200, 2));

        let medium = SharpenParams::for_sizes(512, 192);
        assert_eq!((medium.radius, medium.amount, medium.threshold), (1.0, 130, 3));

        let small = SharpenParams::for_sizes(512, 164);
        assert_eq!((small.radius, small.amount, small.threshold), (1.5, 160, 3));
    }

    #[test]
    fn test_sharpen_tier_boundaries_are_inclusive() {
        assert_eq!(SharpenParams::for_ratio(32.0).amount, 200);
        assert_eq!(SharpenParams::for_ratio(31.99).amount, 160);
        assert_eq!(SharpenParams::for_ratio(3.0).amount, 160);
        assert_eq!(SharpenParams::for_ratio(2.99).amount, 130);
        assert_eq!(SharpenParams::for_ratio(2.0).amount, 130);
        assert_eq!(SharpenParams::for_ratio(1.99).amount, 120);
        assert_eq!(SharpenParams::for_ratio(1.0).radius, 0.8);
    }

    #[test]
    fn test_derive_exact_dimensions() {
        let master = gradient_master();
        for size in [192, 164, 16] {
            let derived = derive(&master, size).unwrap();
            assert_eq!(derived.dimensions(), (size, size));
        }
        assert_eq!(derive_favicon(&master).unwrap().dimensions(), (16, 16));
    }

    #[test]
    fn test_derive_preserves_color_mode() {
        let rgb = gradient_master();
        assert_eq!(derive(&rgb, 192).unwrap().color(), rgb.color());

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(512, 512, Rgba([10, 20, 30, 128])));
        let derived = derive(&rgba, 164).unwrap();
        assert_eq!(derived.color(), rgba.color());
    }

    #[test]
    fn test_derive_all_keeps_master_untouched() {
        let master = gradient_master();
        let icons = derive_all(master.clone()).unwrap();

        assert_eq!(icons.len(), 4);
        let kept = icons.master().unwrap();
        assert_eq!(kept.dimensions(), (512, 512));
        assert_eq!(kept.as_bytes(), master.as_bytes());

        for (label, image) in icons.iter() {
            assert_eq!(image.dimensions(), (label.pixels(), label.pixels()));
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let master = gradient_master();
        let first = derive_all(master.clone()).unwrap();
        let second = derive_all(master).unwrap();
        for label in SizeLabel::ALL {
            assert_eq!(
                first.get(label).unwrap().as_bytes(),
                second.get(label).unwrap().as_bytes(),
                "label {label} differs between runs"
            );
        }
    }

    #[test]
    fn test_derive_rejects_bad_masters() {
        let wide = DynamicImage::ImageRgb8(RgbImage::new(512, 256));
        assert!(matches!(
            derive(&wide, 16),
            Err(IconError::InvalidParameter(_))
        ));

        let small = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        assert!(matches!(
            derive(&small, 192),
            Err(IconError::InvalidParameter(_))
        ));
        assert!(matches!(
            derive_all(small),
            Err(IconError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_contrast_identity_cases() {
        let gray = RgbaImage::from_pixel(8, 8, Rgba([128, 128, 128, 255]));
        assert_eq!(enhance_contrast(&gray, FAVICON_CONTRAST), gray);

        let noisy = RgbaImage::from_fn(8, 8, |x, y| Rgba([(x * 30) as u8, (y * 30) as u8, 77, 200]));
        assert_eq!(enhance_contrast(&noisy, 1.0), noisy);
    }

    #[test]
    fn test_contrast_spreads_values_and_keeps_alpha() {
        let image = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([100, 100, 100, 40])
            } else {
                Rgba([150, 150, 150, 90])
            }
        });
        let boosted = enhance_contrast(&image, 1.5);
        // mean luma 125: 125 + 1.5 * (100 - 125) = 87.5, 125 + 1.5 * 25 = 162.5
        assert_eq!(boosted.get_pixel(0, 0).0, [88, 88, 88, 40]);
        assert_eq!(boosted.get_pixel(1, 0).0, [163, 163, 163, 90]);
    }

    #[test]
    fn test_transparent_pixels_do_not_bleed_color() {
        // Invisible red on the left, opaque blue on the right
        let master = DynamicImage::ImageRgba8(RgbaImage::from_fn(512, 512, |x, _| {
            if x < 256 {
                Rgba([255, 0, 0, 0])
            } else {
                Rgba([0, 0, 255, 255])
            }
        }));

        for size in [192, 164, 16] {
            let resized = resize_lanczos(&master, size);
            for pixel in resized.pixels().filter(|p| p.0[3] > 0) {
                assert_eq!(pixel.0[0], 0, "red leaked into a visible pixel at {size}");
            }
            assert_eq!(resized.get_pixel(size - 1, 0).0, [0, 0, 255, 255]);
        }
    }

    #[test]
    fn test_opaque_masters_resize_as_rgba8() {
        let master = gradient_master();
        let direct = imageops::resize(&master.to_rgba8(), 164, 164, FilterType::Lanczos3);
        assert_eq!(resize_lanczos(&master, 164), direct);
    }

    #[test]
    fn test_unsharp_mask_leaves_alpha() {
        let image = RgbaImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgba([20, 20, 20, 77])
            } else {
                Rgba([230, 230, 230, 77])
            }
        });
        let sharpened = unsharp_mask(&image, SharpenParams::for_ratio(32.0));
        assert_eq!(sharpened.dimensions(), (16, 16));
        assert!(sharpened.pixels().all(|p| p.0[3] == 77));
    }
}
