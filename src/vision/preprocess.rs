//! Image loading and normalization
//!
//! Grayscale loading, fixed-canvas resizing for signature comparison, and the
//! adaptive binarization used by the table segmenter.

use anyhow::{Context, Result};
use image::{imageops, GrayImage, Luma};
use std::path::Path;

/// Load an image from disk as 8-bit grayscale.
pub fn load_grayscale(path: &Path) -> Result<GrayImage> {
    let img = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(img.to_luma8())
}

/// Load an image and resize it to a fixed comparison canvas.
///
/// Both signatures in a comparison go through this so descriptor positions
/// are measured on the same scale.
pub fn load_canvas(path: &Path, width: u32, height: u32) -> Result<GrayImage> {
    let gray = load_grayscale(path)?;
    Ok(imageops::resize(
        &gray,
        width,
        height,
        imageops::FilterType::Triangle,
    ))
}

/// Binarize a sheet so dark ruling lines become foreground (255).
///
/// Inverts the image, then thresholds each pixel against the mean of its
/// `(2 * block_radius + 1)` square neighborhood plus `offset`. Uniform regions
/// stay background; only locally dark ink survives.
pub fn binarize_lines(gray: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut inverted = gray.clone();
    imageops::invert(&mut inverted);

    // Summed-area table with one row/column of zero padding.
    let w = width as usize;
    let h = height as usize;
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(inverted.get_pixel(x as u32, y as u32).0[0]);
            integral[(y + 1) * stride + (x + 1)] = integral[y * stride + (x + 1)] + row_sum;
        }
    }

    let r = i64::from(block_radius);
    let mut out = GrayImage::new(width, height);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let x0 = (x - r).max(0) as usize;
            let y0 = (y - r).max(0) as usize;
            let x1 = (x + r + 1).min(w as i64) as usize;
            let y1 = (y + r + 1).min(h as i64) as usize;

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as u64;
            let mean = (sum / count) as i32;

            let value = i32::from(inverted.get_pixel(x as u32, y as u32).0[0]);
            let bit = if value > mean + offset { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, Luma([bit]));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_fails() {
        let result = load_grayscale(Path::new("/nonexistent/sheet.png"));
        assert!(result.is_err());
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("/nonexistent/sheet.png"));
    }

    #[test]
    fn test_load_canvas_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.png");
        let img = GrayImage::from_pixel(40, 30, Luma([128]));
        img.save(&path).unwrap();

        let canvas = load_canvas(&path, 500, 250).unwrap();
        assert_eq!(canvas.dimensions(), (500, 250));
    }

    #[test]
    fn test_binarize_uniform_is_background() {
        let img = GrayImage::from_pixel(40, 40, Luma([255]));
        let binary = binarize_lines(&img, 7, 2);
        assert!(binary.pixels().all(|p| p.0[0] == 0));

        let dark = GrayImage::from_pixel(40, 40, Luma([30]));
        let binary = binarize_lines(&dark, 7, 2);
        assert!(binary.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_binarize_detects_dark_line() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([255]));
        for y in 0..40 {
            for x in 19..21 {
                img.put_pixel(x, y, Luma([0]));
            }
        }

        let binary = binarize_lines(&img, 7, 2);
        assert_eq!(binary.get_pixel(19, 20).0[0], 255);
        assert_eq!(binary.get_pixel(20, 20).0[0], 255);
        // Far from the line everything stays background.
        assert_eq!(binary.get_pixel(5, 20).0[0], 0);
        assert_eq!(binary.get_pixel(35, 20).0[0], 0);
    }
}
