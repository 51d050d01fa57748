//! Vision layer
//!
//! Everything that looks at pixels: image loading and normalization, table
//! segmentation, OCR text extraction, and signature feature matching.

pub mod features;
pub mod ocr;
pub mod preprocess;
pub mod segment;

pub use features::SignatureMatcher;
pub use ocr::{TesseractOcr, TextRecognizer};
