use image::{DynamicImage, GenericImageView, ImageFormat, Pixel};
use serde::Serialize;

use crate::error::{ClearcapError, Result};

/// Captchas shorter than this are upscaled before recognition.
const MIN_RECOGNITION_HEIGHT: u32 = 50;
const MAX_UPSCALE: u32 = 4;

const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// One preprocessing variant applied before a recognition pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreprocessConfig {
    pub name: &'static str,
    pub grayscale: bool,
    /// 1.0 leaves contrast untouched, 2.0 doubles the distance from the mean.
    pub contrast_factor: f32,
    pub sharpen: bool,
    pub binarize_threshold: Option<u8>,
    pub invert: bool,
}

/// Ordered by general reliability; the order decides ties between equally
/// confident passes.
const CATALOGUE: [PreprocessConfig; 5] = [
    PreprocessConfig {
        name: "default",
        grayscale: true,
        contrast_factor: 2.0,
        sharpen: true,
        binarize_threshold: None,
        invert: false,
    },
    PreprocessConfig {
        name: "high_contrast",
        grayscale: true,
        contrast_factor: 3.0,
        sharpen: false,
        binarize_threshold: Some(140),
        invert: false,
    },
    PreprocessConfig {
        name: "soft",
        grayscale: true,
        contrast_factor: 1.3,
        sharpen: false,
        binarize_threshold: None,
        invert: false,
    },
    PreprocessConfig {
        name: "inverted",
        grayscale: true,
        contrast_factor: 2.0,
        sharpen: false,
        binarize_threshold: Some(128),
        invert: true,
    },
    PreprocessConfig {
        name: "dark_threshold",
        grayscale: true,
        contrast_factor: 1.0,
        sharpen: false,
        binarize_threshold: Some(100),
        invert: false,
    },
];

/// The variant catalogue. With multi-pass disabled only `default` is returned.
pub fn variants(multi_pass: bool) -> &'static [PreprocessConfig] {
    if multi_pass {
        &CATALOGUE
    } else {
        &CATALOGUE[..1]
    }
}

/// Apply one variant to raw image bytes and re-encode as PNG.
pub fn apply_variant(bytes: &[u8], config: &PreprocessConfig) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ClearcapError::Preprocess(format!("Failed to decode image: {e}")))?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ClearcapError::Preprocess(format!(
            "Image has no pixels: {width}x{height}"
        )));
    }

    let img = flatten_alpha(img);
    let img = upscale_if_small(img, MIN_RECOGNITION_HEIGHT);

    let img = if config.grayscale {
        DynamicImage::ImageLuma8(img.to_luma8())
    } else {
        img
    };

    let img = adjust_contrast(img, config.contrast_factor);

    let img = if config.sharpen {
        img.filter3x3(&SHARPEN_KERNEL)
    } else {
        img
    };

    let mut img = match config.binarize_threshold {
        Some(threshold) => binarize(&img, threshold),
        None => img,
    };

    if config.invert {
        img.invert();
    }

    let mut output = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| ClearcapError::Preprocess(format!("Failed to encode image: {e}")))?;

    Ok(output)
}

/// Composite transparent captchas onto white so the glyphs keep their contrast
fn flatten_alpha(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return img;
    }

    let rgba = img.to_rgba8();
    DynamicImage::ImageRgb8(image::RgbImage::from_fn(
        rgba.width(),
        rgba.height(),
        |x, y| {
            let pixel = rgba.get_pixel(x, y);
            let alpha = pixel[3] as u32;
            let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])])
        },
    ))
}

/// Upscale small images by an integer factor so strokes survive thresholding
///
/// Uses Lanczos3, same as for downscaling elsewhere
fn upscale_if_small(img: DynamicImage, min_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if height >= min_height {
        return img;
    }

    let factor = min_height.div_ceil(height).min(MAX_UPSCALE);
    img.resize_exact(
        width * factor,
        height * factor,
        image::imageops::FilterType::Lanczos3,
    )
}

fn mean_luma(img: &DynamicImage) -> f32 {
    let gray = img.to_luma8();
    let count = gray.width() as u64 * gray.height() as u64;
    if count == 0 {
        return 128.0;
    }
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    sum as f32 / count as f32
}

fn stretch(value: u8, pivot: f32, factor: f32) -> u8 {
    (pivot + (value as f32 - pivot) * factor)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Scale every channel's distance from the mean luminance by `factor`
fn adjust_contrast(img: DynamicImage, factor: f32) -> DynamicImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return img;
    }

    let pivot = mean_luma(&img);
    match img {
        DynamicImage::ImageLuma8(mut gray) => {
            for pixel in gray.pixels_mut() {
                pixel.apply(|c| stretch(c, pivot, factor));
            }
            DynamicImage::ImageLuma8(gray)
        }
        other => {
            let mut rgb = other.to_rgb8();
            for pixel in rgb.pixels_mut() {
                pixel.apply(|c| stretch(c, pivot, factor));
            }
            DynamicImage::ImageRgb8(rgb)
        }
    }
}

fn binarize(img: &DynamicImage, threshold: u8) -> DynamicImage {
    let mut gray = img.to_luma8();
    for pixel in gray.pixels_mut() {
        pixel[0] = if pixel[0] > threshold { 255 } else { 0 };
    }
    DynamicImage::ImageLuma8(gray)
}
