//! Application Configuration
//!
//! User settings stored in TOML format in the platform config directory.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem layout
    pub paths: PathsConfig,
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Table segmentation settings
    pub segmenter: SegmenterSettings,
    /// Signature matching settings
    pub matcher: MatcherSettings,
}

/// Where reference signatures live and where crops are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding one reference signature per roll number
    pub reference_dir: PathBuf,
    /// Directory the segmenter writes signature crops into
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            reference_dir: PathBuf::from("Student_signatures"),
            output_dir: PathBuf::from("sign_images"),
        }
    }
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Tesseract language code
    pub language: String,
    /// Source resolution handed to the engine
    pub dpi: i32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: 300,
        }
    }
}

/// Table segmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Ruling-line kernel length is `image dimension / line_scale`
    pub line_scale: u32,
    /// Iterations of the directional opening
    pub open_iterations: u32,
    /// Minimum cell width/height in pixels; smaller contours are noise
    pub min_cell_size: u32,
    /// Radius of the adaptive binarization block (block is `2r + 1` square)
    pub block_radius: u32,
    /// How far above the local mean a pixel must be to count as ink
    pub binarize_offset: i32,
    /// Header text identifying the signature column
    pub marker_text: String,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            line_scale: 30,
            open_iterations: 2,
            min_cell_size: 20,
            block_radius: 7,
            binarize_offset: 2,
            marker_text: "sign".to_string(),
        }
    }
}

/// Signature matching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherSettings {
    /// Comparison canvas width
    pub canvas_width: u32,
    /// Comparison canvas height
    pub canvas_height: u32,
    /// FAST-9 corner detection threshold
    pub fast_threshold: u8,
    /// Keep at most this many keypoints per image
    pub max_keypoints: usize,
    /// Similarity at or above this marks a student Present
    pub presence_threshold: f32,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            canvas_width: 500,
            canvas_height: 250,
            fast_threshold: 20,
            max_keypoints: 500,
            presence_threshold: 85.0,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get the configuration directory, creating it if needed
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "attendance-vision", "AttendanceVision")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
