//! Attendance report output
//!
//! One `<roll> : <status>` line per student on stdout, plus an optional JSON
//! report file for downstream tooling.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use super::{AttendanceRecord, RecordOutcome};

/// Render one report line.
pub fn format_record(record: &AttendanceRecord) -> String {
    match &record.outcome {
        RecordOutcome::Marked { status, .. } => format!("{} : {}", record.roll, status),
        RecordOutcome::Failed { reason } => format!("{} : Failed: {}", record.roll, reason),
    }
}

/// Write the line-per-roll report to any writer.
pub fn write_report<W: Write>(mut out: W, records: &[AttendanceRecord]) -> Result<()> {
    for record in records {
        writeln!(out, "{}", format_record(record))?;
    }
    Ok(())
}

/// Print the report to stdout.
pub fn print_report(records: &[AttendanceRecord]) -> Result<()> {
    write_report(std::io::stdout().lock(), records)
}

/// Save the records as a pretty-printed JSON report.
pub fn save_json_report(records: &[AttendanceRecord], path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(records)?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}
