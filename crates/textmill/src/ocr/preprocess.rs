//! Image preprocessing to improve recognition accuracy.
//!
//! Profiles:
//!   none       - pass the image through unchanged
//!   standard   - grayscale + deskew + auto-contrast
//!   aggressive - standard + upscale if low-res + denoise + sharpen
//!
//! Deskew is skipped when the caller knows the document is born-digital
//! (`deskew = false`): those pages are already axis-aligned and skew
//! estimation is the most expensive step here.

use crate::types::PreprocessProfile;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

/// Minimum width (px) below which "aggressive" upscales 2x.
/// ~150 DPI on an A4 page is about 1240 px wide.
const LOW_RES_THRESHOLD: u32 = 1240;

/// Histogram fraction clipped at each end by auto-contrast.
const AUTOCONTRAST_CUTOFF: f32 = 0.01;

/// Skew search half-range in degrees.
const SKEW_RANGE_DEGREES: f32 = 5.0;
const SKEW_STEP_DEGREES: f32 = 0.25;

/// Skew below this is noise; rotating would only blur the glyphs.
const SKEW_MIN_DEGREES: f32 = 0.1;

/// Width the skew estimator downsamples to before scoring angles.
const SKEW_ESTIMATE_WIDTH: u32 = 800;

/// Apply the OCR preprocessing profile to a page bitmap.
pub fn preprocess_for_ocr(
    image: DynamicImage,
    profile: PreprocessProfile,
    deskew: bool,
) -> DynamicImage {
    if profile == PreprocessProfile::None {
        return image;
    }

    let mut gray = image.to_luma8();

    if profile == PreprocessProfile::Aggressive && gray.width() < LOW_RES_THRESHOLD {
        let (width, height) = (gray.width() * 2, gray.height() * 2);
        gray = image::imageops::resize(&gray, width, height, FilterType::Lanczos3);
        tracing::info!("Upscaled low-res image 2x to {}x{}", width, height);
    }

    if deskew {
        gray = deskew_image(gray);
    }

    gray = autocontrast(&gray, AUTOCONTRAST_CUTOFF);

    if profile == PreprocessProfile::Aggressive {
        // Median filter removes salt-and-pepper scanner noise; the unsharp
        // mask then restores character edges for better segmentation.
        gray = imageproc::filter::median_filter(&gray, 1, 1);
        gray = image::imageops::unsharpen(&gray, 1.0, 3);
    }

    DynamicImage::ImageLuma8(gray)
}

/// Contrast-stretch a grayscale image, clipping `cutoff` of the histogram at
/// each end. Washed-out and very dark scans both end up spanning the full
/// range.
fn autocontrast(gray: &GrayImage, cutoff: f32) -> GrayImage {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return gray.clone();
    }
    let clip = (total as f64 * cutoff as f64) as u64;

    let mut low = 0usize;
    let mut cumulative = 0u64;
    for (value, count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative > clip {
            low = value;
            break;
        }
    }

    let mut high = 255usize;
    let mut cumulative = 0u64;
    for (value, count) in histogram.iter().enumerate().rev() {
        cumulative += count;
        if cumulative > clip {
            high = value;
            break;
        }
    }

    if high <= low {
        return gray.clone();
    }

    let scale = 255.0 / (high - low) as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y).0[0] as f32;
        let stretched = ((value - low as f32) * scale).clamp(0.0, 255.0);
        Luma([stretched as u8])
    })
}

fn deskew_image(gray: GrayImage) -> GrayImage {
    let angle = estimate_skew_degrees(&gray);
    if angle.abs() < SKEW_MIN_DEGREES {
        return gray;
    }

    tracing::debug!("Deskewing page by {:.2} degrees", angle);
    rotate_about_center(
        &gray,
        -angle.to_radians(),
        Interpolation::Bilinear,
        Luma([255u8]),
    )
}

/// Estimate page skew by maximizing the variance of horizontal ink
/// projections over candidate angles. Straight text lines concentrate ink
/// into few rows, so the correct angle scores the highest variance.
fn estimate_skew_degrees(gray: &GrayImage) -> f32 {
    let thumb;
    let image = if gray.width() > SKEW_ESTIMATE_WIDTH {
        let height = (gray.height() as u64 * SKEW_ESTIMATE_WIDTH as u64 / gray.width() as u64)
            .max(1) as u32;
        thumb = image::imageops::resize(gray, SKEW_ESTIMATE_WIDTH, height, FilterType::Triangle);
        &thumb
    } else {
        gray
    };

    let ink: Vec<(f32, f32)> = image
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel.0[0] < 128)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();

    if ink.is_empty() {
        return 0.0;
    }

    let rows = image.height() as usize;
    let mut best_angle = 0.0f32;
    let mut best_score = f64::MIN;

    let steps = (2.0 * SKEW_RANGE_DEGREES / SKEW_STEP_DEGREES) as i32;
    for step in 0..=steps {
        let angle = -SKEW_RANGE_DEGREES + step as f32 * SKEW_STEP_DEGREES;
        let shear = angle.to_radians().tan();

        let mut counts = vec![0u32; rows];
        for &(x, y) in &ink {
            let row = (y - x * shear).round();
            if row >= 0.0 && (row as usize) < rows {
                counts[row as usize] += 1;
            }
        }

        let mean = ink.len() as f64 / rows as f64;
        let variance: f64 = counts
            .iter()
            .map(|&count| {
                let diff = count as f64 - mean;
                diff * diff
            })
            .sum();

        if variance > best_score {
            best_score = variance;
            best_angle = angle;
        }
    }

    best_angle
}
