//! Attendance decision pipeline
//!
//! Orchestrates OCR, segmentation, and signature matching into per-student
//! Present/Absent records. Pure of any UI concern: callers hand in a sheet
//! path and get records back.

pub mod report;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::vision::ocr;
use crate::vision::{preprocess, segment, SignatureMatcher, TextRecognizer};

/// Present/Absent determination for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "Present"),
            AttendanceStatus::Absent => write!(f, "Absent"),
        }
    }
}

/// What happened for one roll number.
///
/// A roll whose reference or crop cannot be read is reported as `Failed`
/// rather than aborting the remaining students or being coerced to Absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecordOutcome {
    Marked {
        status: AttendanceStatus,
        similarity: f32,
    },
    Failed {
        reason: String,
    },
}

/// One row of the attendance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub roll: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

/// Verify one scanned sheet.
///
/// Extracts roll numbers, segments the signature column, then compares every
/// fresh crop against its stored reference. Segmentation-level failures (no
/// marker column, roll/cell count mismatch) abort the submission; per-student
/// comparison failures are isolated into their own record.
pub fn verify_sheet(
    sheet_path: &Path,
    config: &AppConfig,
    recognizer: &mut dyn TextRecognizer,
) -> Result<Vec<AttendanceRecord>> {
    let start = Instant::now();

    let sheet = preprocess::load_grayscale(sheet_path)?;
    let rolls = ocr::extract_roll_numbers(recognizer, &sheet)?;
    info!(
        "extracted {} roll numbers from {}",
        rolls.len(),
        sheet_path.display()
    );

    let crops = segment::extract_signature_cells(
        &sheet,
        &rolls,
        recognizer,
        &config.segmenter,
        &config.paths.output_dir,
    )?;

    let matcher = SignatureMatcher::new(config.matcher.clone());
    let mut records = Vec::with_capacity(crops.len());
    for crop in &crops {
        let reference = config
            .paths
            .reference_dir
            .join(format!("{}.png", crop.roll));

        let outcome = match matcher.compare_files(&reference, &crop.path) {
            Ok(similarity) => {
                let status = if similarity >= config.matcher.presence_threshold {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                };
                RecordOutcome::Marked { status, similarity }
            }
            Err(err) => {
                warn!("could not verify {}: {err:#}", crop.roll);
                RecordOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        };
        records.push(AttendanceRecord {
            roll: crop.roll.clone(),
            outcome,
        });
    }

    info!(
        "verified {} students in {:?}",
        records.len(),
        start.elapsed()
    );
    Ok(records)
}
