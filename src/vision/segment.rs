//! Table segmentation
//!
//! Recovers the ruling-line grid of a scanned attendance table, derives
//! per-cell bounding boxes, locates the signature column by its "sign" header
//! cell, and crops each signature cell to disk named by its roll number.

use anyhow::{Context, Result};
use image::{imageops, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::point::Point;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SegmenterSettings;
use crate::vision::ocr::{self, TextRecognizer};
use crate::vision::preprocess;

/// Detection failures the orchestrator can match on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// No cell OCR'd to the marker text, so the signature column is unknown.
    #[error("no table cell matching marker text {0:?} was found")]
    MarkerNotFound(String),
    /// Roll numbers and signature cells disagree on count; pairing them
    /// positionally would silently attach signatures to the wrong students.
    #[error("extracted {rolls} roll numbers but found {cells} signature cells")]
    RollCountMismatch { rolls: usize, cells: usize },
}

/// Rectangular table cell in sheet coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A signature crop written to disk, keyed by its roll number.
#[derive(Debug, Clone)]
pub struct SignatureCrop {
    pub roll: String,
    pub path: PathBuf,
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

/// Detect candidate table cells.
///
/// Ruling lines are isolated by opening the binarized sheet along each axis
/// separately with a kernel sized `dimension / line_scale`, so only strokes at
/// least that long survive. The two line masks are unioned, gaps closed with a
/// 3x3 dilation, and every contour bounding box above the minimum cell size is
/// kept, ordered top-to-bottom then left-to-right.
pub fn detect_cells(sheet: &GrayImage, settings: &SegmenterSettings) -> Vec<CellRect> {
    let start = Instant::now();
    let (width, height) = sheet.dimensions();
    let binary = preprocess::binarize_lines(sheet, settings.block_radius, settings.binarize_offset);

    let vertical_kernel = (height / settings.line_scale).max(3);
    let horizontal_kernel = (width / settings.line_scale).max(3);
    let vertical = open_along_axis(
        &binary,
        vertical_kernel,
        Axis::Vertical,
        settings.open_iterations,
    );
    let horizontal = open_along_axis(
        &binary,
        horizontal_kernel,
        Axis::Horizontal,
        settings.open_iterations,
    );

    let mut lines = union(&vertical, &horizontal);
    lines = dilate(&lines, Norm::LInf, 1);

    let contours = find_contours::<i32>(&lines);
    let mut cells: Vec<CellRect> = contours
        .iter()
        .filter_map(|contour| bounding_rect(&contour.points))
        .filter(|rect| rect.width > settings.min_cell_size && rect.height > settings.min_cell_size)
        .collect();
    cells.sort_by_key(|cell| (cell.y, cell.x));

    debug!(
        "detected {} candidate cells in {:?} (kernels {}x1 / 1x{})",
        cells.len(),
        start.elapsed(),
        horizontal_kernel,
        vertical_kernel
    );
    cells
}

/// Locate the signature column.
///
/// Scans the sorted cells, skipping the first (the table's own outline), and
/// returns the x-coordinate of the first cell whose normalized OCR text equals
/// the marker.
pub fn find_sign_column(
    sheet: &GrayImage,
    cells: &[CellRect],
    recognizer: &mut dyn TextRecognizer,
    marker: &str,
) -> Result<Option<u32>> {
    for cell in cells.iter().skip(1) {
        let crop = crop_cell(sheet, cell);
        let text = ocr::recognize_cell(recognizer, &crop)
            .with_context(|| format!("OCR failed on cell at ({}, {})", cell.x, cell.y))?;
        if ocr::normalize_marker(&text) == marker {
            debug!("marker cell found at ({}, {})", cell.x, cell.y);
            return Ok(Some(cell.x));
        }
    }
    Ok(None)
}

/// Crop every signature cell and save it under its paired roll number.
///
/// The pairing is positional: the first data cell in the signature column
/// belongs to the first extracted roll number. Counts are validated before
/// anything is written.
pub fn extract_signature_cells(
    sheet: &GrayImage,
    rolls: &[String],
    recognizer: &mut dyn TextRecognizer,
    settings: &SegmenterSettings,
    output_dir: &Path,
) -> Result<Vec<SignatureCrop>> {
    let start = Instant::now();
    let cells = detect_cells(sheet, settings);
    let marker = ocr::normalize_marker(&settings.marker_text);

    let sign_x = find_sign_column(sheet, &cells, recognizer, &marker)?
        .ok_or_else(|| SegmentError::MarkerNotFound(settings.marker_text.clone()))?;

    // Everything sharing the marker's x-coordinate is the signature column;
    // its first entry is the marker header itself.
    let data_cells: Vec<&CellRect> = cells.iter().filter(|c| c.x == sign_x).skip(1).collect();
    if data_cells.len() != rolls.len() {
        return Err(SegmentError::RollCountMismatch {
            rolls: rolls.len(),
            cells: data_cells.len(),
        }
        .into());
    }

    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("failed to create output directory {}", output_dir.display())
    })?;

    let mut crops = Vec::with_capacity(data_cells.len());
    for (roll, cell) in rolls.iter().zip(data_cells) {
        let crop = crop_cell(sheet, cell);
        let path = output_dir.join(format!("{roll}.png"));
        crop.save(&path)
            .with_context(|| format!("failed to save signature crop {}", path.display()))?;
        crops.push(SignatureCrop {
            roll: roll.clone(),
            path,
        });
    }

    info!(
        "segmented {} signature cells in {:?}",
        crops.len(),
        start.elapsed()
    );
    Ok(crops)
}

fn crop_cell(sheet: &GrayImage, cell: &CellRect) -> GrayImage {
    imageops::crop_imm(sheet, cell.x, cell.y, cell.width, cell.height).to_image()
}

/// Morphological opening restricted to one axis: `iterations` erosions
/// followed by `iterations` dilations with a 1-D structuring element.
fn open_along_axis(mask: &GrayImage, kernel_len: u32, axis: Axis, iterations: u32) -> GrayImage {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = line_filter(&out, kernel_len, axis, true);
    }
    for _ in 0..iterations {
        out = line_filter(&out, kernel_len, axis, false);
    }
    out
}

/// 1-D min (erode) or max (dilate) with a centered window along one axis.
fn line_filter(mask: &GrayImage, kernel_len: u32, axis: Axis, erode: bool) -> GrayImage {
    let (width, height) = mask.dimensions();
    let len = i64::from(kernel_len.max(1));
    let before = (len - 1) / 2;
    let after = len / 2;

    let mut out = GrayImage::new(width, height);
    for y in 0..i64::from(height) {
        for x in 0..i64::from(width) {
            let mut value = if erode { 255u8 } else { 0u8 };
            for offset in -before..=after {
                let (sx, sy) = match axis {
                    Axis::Horizontal => (x + offset, y),
                    Axis::Vertical => (x, y + offset),
                };
                // Outside the sheet counts as background.
                let sample = if sx < 0 || sy < 0 || sx >= i64::from(width) || sy >= i64::from(height)
                {
                    0
                } else {
                    mask.get_pixel(sx as u32, sy as u32).0[0]
                };
                value = if erode {
                    value.min(sample)
                } else {
                    value.max(sample)
                };
            }
            out.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
    out
}

fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        pixel.0[0] = pixel.0[0].max(b.get_pixel(x, y).0[0]);
    }
    out
}

fn bounding_rect(points: &[Point<i32>]) -> Option<CellRect> {
    let first = points.first()?;
    let (mut min_x, mut max_x) = (first.x, first.x);
    let (mut min_y, mut max_y) = (first.y, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    Some(CellRect {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARGIN: u32 = 10;
    const LINE: u32 = 3;
    const CELL_W: u32 = 120;
    const CELL_H: u32 = 60;

    fn fill_rect(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
        for yy in y..(y + h).min(img.height()) {
            for xx in x..(x + w).min(img.width()) {
                img.put_pixel(xx, yy, Luma([value]));
            }
        }
    }

    /// White sheet with a black-ruled `cols` x `rows` table.
    fn draw_table(cols: u32, rows: u32) -> GrayImage {
        let width = 2 * MARGIN + cols * CELL_W + (cols + 1) * LINE;
        let height = 2 * MARGIN + rows * CELL_H + (rows + 1) * LINE;
        let mut img = GrayImage::from_pixel(width, height, Luma([255]));
        let table_w = cols * CELL_W + (cols + 1) * LINE;
        let table_h = rows * CELL_H + (rows + 1) * LINE;
        for c in 0..=cols {
            let x = MARGIN + c * (CELL_W + LINE);
            fill_rect(&mut img, x, MARGIN, LINE, table_h, 0);
        }
        for r in 0..=rows {
            let y = MARGIN + r * (CELL_H + LINE);
            fill_rect(&mut img, MARGIN, y, table_w, LINE, 0);
        }
        img
    }

    /// Top-left corner of a cell's interior.
    fn cell_origin(row: u32, col: u32) -> (u32, u32) {
        (
            MARGIN + LINE + col * (CELL_W + LINE),
            MARGIN + LINE + row * (CELL_H + LINE),
        )
    }

    /// Stamp a small 200-intensity blob in the middle of a cell. It is short
    /// enough to be erased by the directional opening but gives the fake
    /// recognizer a pixel value to key on.
    fn mark_cell(img: &mut GrayImage, row: u32, col: u32) {
        let (x, y) = cell_origin(row, col);
        fill_rect(&mut img, x + CELL_W / 2 - 3, y + CELL_H / 2 - 3, 6, 6, 200);
    }

    /// Draw a few small dark blobs as a stand-in for a handwritten signature.
    fn sign_cell(img: &mut GrayImage, row: u32, col: u32, seed: u32) {
        let (x, y) = cell_origin(row, col);
        for i in 0..4 {
            let dx = 12 + (seed * 7 + i * 23) % (CELL_W - 40);
            let dy = 10 + (seed * 11 + i * 13) % (CELL_H - 28);
            fill_rect(&mut img, x + dx, y + dy, 6, 6, 0);
        }
    }

    /// Recognizes the marker blob by the value at the crop's center.
    struct MarkerFake;

    impl TextRecognizer for MarkerFake {
        fn name(&self) -> &str {
            "fake"
        }

        fn recognize(&mut self, image: &GrayImage) -> Result<String> {
            let center = image.get_pixel(image.width() / 2, image.height() / 2).0[0];
            Ok(if center == 200 { "Sign".to_string() } else { String::new() })
        }
    }

    fn settings() -> SegmenterSettings {
        SegmenterSettings::default()
    }

    #[test]
    fn test_detect_cells_finds_grid() {
        // 2 columns x 3 rows: one outline box plus six cell interiors.
        let sheet = draw_table(2, 3);
        let cells = detect_cells(&sheet, &settings());
        assert_eq!(cells.len(), 7);

        // The outline sorts first, then cells in (row, column) order.
        assert!(cells[0].width > 2 * CELL_W);
        assert!(cells[1].x < cells[2].x);
        assert_eq!(cells[1].x, cells[3].x);
        assert!(cells[1].y < cells[3].y);
    }

    #[test]
    fn test_detect_cells_ignores_cell_content() {
        let mut sheet = draw_table(2, 3);
        mark_cell(&mut sheet, 0, 1);
        sign_cell(&mut sheet, 1, 1, 1);
        sign_cell(&mut sheet, 2, 1, 2);
        let cells = detect_cells(&sheet, &settings());
        assert_eq!(cells.len(), 7);
    }

    #[test]
    fn test_find_sign_column() {
        let mut sheet = draw_table(2, 3);
        mark_cell(&mut sheet, 0, 1);
        let cells = detect_cells(&sheet, &settings());
        let sign_x = find_sign_column(&sheet, &cells, &mut MarkerFake, "sign").unwrap();
        let (marker_x, _) = cell_origin(0, 1);
        // The dilated ruling line reaches the first interior pixel, so the
        // hole contour starts exactly at the cell origin.
        assert_eq!(sign_x, Some(marker_x));
    }

    #[test]
    fn test_extract_writes_one_crop_per_roll_in_row_order() {
        let mut sheet = draw_table(2, 3);
        mark_cell(&mut sheet, 0, 1);
        sign_cell(&mut sheet, 1, 1, 1);
        sign_cell(&mut sheet, 2, 1, 2);

        let dir = tempfile::tempdir().unwrap();
        let rolls = vec!["20230001".to_string(), "20230002".to_string()];
        let crops =
            extract_signature_cells(&sheet, &rolls, &mut MarkerFake, &settings(), dir.path())
                .unwrap();

        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].roll, "20230001");
        assert_eq!(crops[1].roll, "20230002");
        for crop in &crops {
            assert!(crop.path.exists());
        }

        // Row order: the saved crops are exactly the column's data cells,
        // top row first.
        let cells = detect_cells(&sheet, &settings());
        let sign_x = find_sign_column(&sheet, &cells, &mut MarkerFake, "sign")
            .unwrap()
            .unwrap();
        let column: Vec<&CellRect> = cells.iter().filter(|c| c.x == sign_x).collect();
        let first = preprocess::load_grayscale(&crops[0].path).unwrap();
        let second = preprocess::load_grayscale(&crops[1].path).unwrap();
        assert_eq!(first.as_raw(), crop_cell(&sheet, column[1]).as_raw());
        assert_eq!(second.as_raw(), crop_cell(&sheet, column[2]).as_raw());
        assert_ne!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_missing_marker_is_reported() {
        let sheet = draw_table(2, 3); // no marker blob anywhere
        let dir = tempfile::tempdir().unwrap();
        let rolls = vec!["20230001".to_string()];
        let err = extract_signature_cells(&sheet, &rolls, &mut MarkerFake, &settings(), dir.path())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SegmentError>(),
            Some(SegmentError::MarkerNotFound(_))
        ));
        // Nothing was written.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_roll_count_mismatch_is_reported() {
        let mut sheet = draw_table(2, 3);
        mark_cell(&mut sheet, 0, 1);

        let dir = tempfile::tempdir().unwrap();
        let rolls = vec![
            "20230001".to_string(),
            "20230002".to_string(),
            "20230003".to_string(),
        ];
        let err = extract_signature_cells(&sheet, &rolls, &mut MarkerFake, &settings(), dir.path())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SegmentError>(),
            Some(&SegmentError::RollCountMismatch { rolls: 3, cells: 2 })
        );
    }

    #[test]
    fn test_small_contours_are_discarded() {
        let mut sheet = draw_table(2, 3);
        // A long but thin scratch: survives opening on one axis only if it is
        // line-like; either way its bounding box is under the size floor.
        fill_rect(&mut sheet, 30, 2, 60, 2, 0);
        let cells = detect_cells(&sheet, &settings());
        assert_eq!(cells.len(), 7);
    }
}
