use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
use imageproc::contrast::{threshold, ThresholdType};
use std::io::Cursor;
use tracing::debug;

use crate::ocr::error::OcrError;

/// Luminance at or above this value becomes white, everything else black.
pub const LUMINANCE_THRESHOLD: u8 = 128;

/// ITU-R BT.601 luma (0.299, 0.587, 0.114), truncated.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

pub fn grayscale(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        Luma([luminance(r, g, b)])
    })
}

/// Two-level image: every pixel is either 0 or 255.
pub fn binarize(image: &DynamicImage) -> GrayImage {
    let gray = grayscale(&image.to_rgb8());
    // imageproc maps values strictly above the threshold to white
    threshold(&gray, LUMINANCE_THRESHOLD - 1, ThresholdType::Binary)
}

/// Decodes, binarizes and re-encodes an image as PNG.
pub fn preprocess_image(bytes: &[u8]) -> Result<Vec<u8>, OcrError> {
    let image = image::load_from_memory(bytes).map_err(|e| OcrError::InvalidImageFormat {
        details: e.to_string(),
    })?;
    debug!(
        "Binarizing {}x{} image for OCR",
        image.width(),
        image.height()
    );

    let binary = binarize(&image);

    let mut encoded = Cursor::new(Vec::new());
    binary
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|e| OcrError::InvalidImageFormat {
            details: format!("Failed to encode preprocessed image: {}", e),
        })?;
    Ok(encoded.into_inner())
}

pub async fn preprocess_image_async(bytes: Vec<u8>) -> Result<Vec<u8>, OcrError> {
    tokio::task::spawn_blocking(move || preprocess_image(&bytes))
        .await
        .map_err(OcrError::from_join)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_luminance_weights() {
        assert_eq!(luminance(0, 0, 0), 0);
        assert_eq!(luminance(255, 255, 255), 255);
        assert_eq!(luminance(255, 0, 0), 76);
        assert_eq!(luminance(0, 255, 0), 149);
        assert_eq!(luminance(0, 0, 255), 29);
    }

    #[test]
    fn test_threshold_boundary() {
        // Gray 128 is white, gray 127 is black
        let image = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([128, 128, 128])
            } else {
                Rgb([127, 127, 127])
            }
        });
        let binary = binarize(&DynamicImage::ImageRgb8(image));
        assert_eq!(binary.get_pixel(0, 0).0, [255]);
        assert_eq!(binary.get_pixel(1, 0).0, [0]);
    }

    #[test]
    fn test_preprocessed_image_is_two_level_png() {
        let gradient = RgbImage::from_fn(64, 16, |x, y| {
            Rgb([(x * 4) as u8, (y * 16) as u8, ((x + y) * 3) as u8])
        });
        let png = preprocess_image(&encode(gradient, ImageFormat::Png)).unwrap();

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .unwrap()
            .to_luma8();
        assert_eq!(decoded.dimensions(), (64, 16));
        assert!(decoded.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(decoded.pixels().any(|p| p.0[0] == 0));
        assert!(decoded.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn test_jpeg_input_is_accepted() {
        let white = RgbImage::from_pixel(8, 8, Rgb([250, 250, 250]));
        let png = preprocess_image(&encode(white, ImageFormat::Jpeg)).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert!(decoded.pixels().all(|p| p.0[0] == 255));
    }

    #[tokio::test]
    async fn test_undecodable_bytes_are_rejected() {
        let err = preprocess_image_async(b"definitely not an image".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "OCR_INVALID_FORMAT");
    }
}
