//! Sheet text recognition
//!
//! OCR backend abstraction with a Tesseract implementation, plus the parsing
//! that turns raw OCR text into roll numbers and marker-cell labels.

use anyhow::{Context, Result};
use image::{imageops, GrayImage};
use leptess::LepTess;
use std::io::Cursor;
use tracing::debug;

use crate::config::OcrSettings;

/// Expected length of a roll number, in digits.
pub const ROLL_NUMBER_LEN: usize = 8;

/// OCR engines struggle below this dimension; smaller crops get upscaled.
const MIN_OCR_DIMENSION: u32 = 80;

/// An OCR backend.
///
/// A trait seam so the segmenter and orchestrator can run against a fake
/// engine in tests and alternative backends can be slotted in later.
pub trait TextRecognizer {
    fn name(&self) -> &str;

    /// Recognize all text in a grayscale image.
    fn recognize(&mut self, image: &GrayImage) -> Result<String>;
}

/// Tesseract OCR backend.
pub struct TesseractOcr {
    engine: LepTess,
    dpi: i32,
}

impl TesseractOcr {
    /// Initialize Tesseract for the configured language.
    pub fn new(settings: &OcrSettings) -> Result<Self> {
        let engine = LepTess::new(None, &settings.language)
            .context("failed to initialize Tesseract; is it installed?")?;
        Ok(Self {
            engine,
            dpi: settings.dpi,
        })
    }
}

impl TextRecognizer for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<String> {
        // Tesseract wants a standard container format, so hand the buffer
        // over as an in-memory PNG.
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .context("failed to encode image for OCR")?;

        self.engine
            .set_image_from_mem(&png)
            .context("failed to load image into Tesseract")?;
        self.engine.set_source_resolution(self.dpi);

        self.engine
            .get_utf8_text()
            .context("failed to extract text from image")
    }
}

/// OCR a table cell, upscaling small crops for more reliable recognition.
pub fn recognize_cell(recognizer: &mut dyn TextRecognizer, cell: &GrayImage) -> Result<String> {
    let (width, height) = cell.dimensions();
    if width < MIN_OCR_DIMENSION || height < MIN_OCR_DIMENSION {
        debug!("upscaling {}x{} cell for OCR", width, height);
        let scaled = imageops::resize(
            cell,
            width * 2,
            height * 2,
            imageops::FilterType::Triangle,
        );
        recognizer.recognize(&scaled)
    } else {
        recognizer.recognize(cell)
    }
}

/// Extract roll numbers from raw OCR text.
///
/// Each physical line is reduced to its digits; a line is accepted only when
/// exactly [`ROLL_NUMBER_LEN`] digits remain, so OCR noise letters inside a
/// line do not split a roll number apart, while short or long runs are
/// rejected. Sheet order is preserved.
pub fn parse_roll_numbers(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
        })
        .filter(|digits| digits.len() == ROLL_NUMBER_LEN)
        .collect()
}

/// Reduce marker-cell OCR output to its case-folded letters.
pub fn normalize_marker(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase()
}

/// Run OCR over the whole sheet and return its roll numbers in sheet order.
pub fn extract_roll_numbers(
    recognizer: &mut dyn TextRecognizer,
    sheet: &GrayImage,
) -> Result<Vec<String>> {
    let text = recognizer
        .recognize(sheet)
        .context("sheet OCR failed")?;
    let rolls = parse_roll_numbers(&text);
    debug!("{} roll numbers extracted by {}", rolls.len(), recognizer.name());
    Ok(rolls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_eight_digit_lines_in_order() {
        let text = "20230001\n20230002\n20230003\n";
        assert_eq!(
            parse_roll_numbers(text),
            vec!["20230001", "20230002", "20230003"]
        );
    }

    #[test]
    fn test_parse_strips_noise_within_a_line() {
        // Stray letters and spaces inside a line do not break the digit run.
        let text = "2023 0001\nab20230002cd\n";
        assert_eq!(parse_roll_numbers(text), vec!["20230001", "20230002"]);
    }

    #[test]
    fn test_parse_rejects_wrong_lengths() {
        let text = "1234567\n123456789\n\n20230004\n";
        assert_eq!(parse_roll_numbers(text), vec!["20230004"]);
    }

    #[test]
    fn test_parse_handles_missing_trailing_newline() {
        assert_eq!(parse_roll_numbers("20230009"), vec!["20230009"]);
    }

    #[test]
    fn test_parse_empty_text() {
        assert!(parse_roll_numbers("").is_empty());
        assert!(parse_roll_numbers("header text only\n").is_empty());
    }

    #[test]
    fn test_normalize_marker() {
        assert_eq!(normalize_marker("Sign"), "sign");
        assert_eq!(normalize_marker(" S i g n .\n"), "sign");
        assert_eq!(normalize_marker("SIGN2"), "sign");
        assert_eq!(normalize_marker("1234"), "");
    }
}
