//! Attendance Vision - attendance verification from scanned sheets
//!
//! Segments the attendance table into cells, extracts roll numbers via OCR,
//! and compares each signature cell against a stored reference signature to
//! decide Present or Absent per student.

mod analysis;
mod app;
mod config;
mod vision;

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::analysis::report;
use crate::config::AppConfig;
use crate::vision::TesseractOcr;

/// Attendance verification from scanned sheets
#[derive(Parser, Debug)]
#[command(name = "attendance-vision")]
#[command(about = "Verify attendance by matching signature cells against reference signatures")]
struct Args {
    /// Verify this sheet headlessly and print per-roll results instead of
    /// opening a window
    #[arg(short, long)]
    sheet: Option<PathBuf>,

    /// Also write a JSON report to this path (headless mode)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref());

    if let Some(sheet) = args.sheet {
        run_headless(&sheet, &config, args.report.as_deref())?;
    } else if let Err(e) = app::run_app(config) {
        tracing::error!("GUI error: {e}");
    }

    Ok(())
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(override_path: Option<&Path>) -> AppConfig {
    let path = match override_path {
        Some(p) => Some(p.to_path_buf()),
        None => config::config_dir().ok().map(|dir| dir.join("config.toml")),
    };

    if let Some(path) = path {
        if path.exists() {
            match config::load_config(&path) {
                Ok(cfg) => {
                    info!("Loaded configuration from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable config {}: {e:#}", path.display());
                }
            }
        } else if override_path.is_none() {
            // First run: write the defaults so the operator has a file to edit.
            let config = AppConfig::default();
            match config::save_config(&config, &path) {
                Ok(()) => info!("Wrote default configuration to {}", path.display()),
                Err(e) => tracing::warn!("Could not write default config: {e:#}"),
            }
            return config;
        }
    }

    info!("Using default configuration");
    AppConfig::default()
}

/// Verify one sheet without a window and print the report
fn run_headless(sheet: &Path, config: &AppConfig, report_path: Option<&Path>) -> Result<()> {
    let mut recognizer = TesseractOcr::new(&config.ocr)?;
    let records = analysis::verify_sheet(sheet, config, &mut recognizer)?;

    report::print_report(&records)?;
    if let Some(path) = report_path {
        report::save_json_report(&records, path)?;
        info!("Wrote JSON report to {}", path.display());
    }

    Ok(())
}
