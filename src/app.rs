//! Desktop shell
//!
//! Single-window egui front end: pick a scanned sheet, run verification on a
//! worker thread so the interface stays responsive, and show the per-student
//! results.

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver};
use eframe::egui;
use egui_extras::{Column, TableBuilder};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

use crate::analysis::{self, AttendanceRecord, AttendanceStatus, RecordOutcome};
use crate::config::AppConfig;
use crate::vision::TesseractOcr;

const PRESENT_COLOR: egui::Color32 = egui::Color32::from_rgb(46, 160, 67);
const ABSENT_COLOR: egui::Color32 = egui::Color32::from_rgb(203, 36, 49);
const FAILED_COLOR: egui::Color32 = egui::Color32::from_rgb(191, 135, 0);

/// Message sent back from the verification worker
enum WorkerMessage {
    Finished(Result<Vec<AttendanceRecord>, String>),
}

/// The main application window
pub struct AttendanceApp {
    /// Loaded configuration
    config: AppConfig,
    /// Path of the sheet to verify, as typed or browsed
    sheet_path: String,
    /// Records from the last completed submission
    records: Vec<AttendanceRecord>,
    /// Status line under the controls
    status: String,
    /// Progress text shared with the worker thread
    progress: Arc<RwLock<String>>,
    /// Channel from the running worker, if any
    worker_rx: Option<Receiver<WorkerMessage>>,
    /// Handle to the worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl AttendanceApp {
    /// Create the application with a loaded configuration
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            sheet_path: String::new(),
            records: Vec::new(),
            status: "Choose a scanned attendance sheet".to_string(),
            progress: Arc::new(RwLock::new(String::new())),
            worker_rx: None,
            worker_handle: None,
        }
    }

    /// Window options
    pub fn options() -> eframe::NativeOptions {
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([900.0, 620.0])
                .with_min_inner_size([700.0, 460.0])
                .with_title("Attendance Vision"),
            ..Default::default()
        }
    }

    fn is_running(&self) -> bool {
        self.worker_rx.is_some()
    }

    /// Open a native file dialog for the sheet image
    fn browse(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "bmp", "tif", "tiff"])
            .pick_file()
        {
            self.sheet_path = path.display().to_string();
        }
    }

    /// Kick off verification of the selected sheet on a worker thread
    fn submit(&mut self) {
        if self.is_running() {
            return;
        }
        let trimmed = self.sheet_path.trim();
        if trimmed.is_empty() {
            self.status = "Choose a sheet image first".to_string();
            return;
        }

        let path = PathBuf::from(trimmed);
        let config = self.config.clone();
        let progress = self.progress.clone();
        let (tx, rx) = unbounded();

        let handle = std::thread::spawn(move || {
            info!("Verification worker starting for {}", path.display());
            *progress.write() = format!("Verifying {}", path.display());
            let result = run_submission(&path, &config).map_err(|e| format!("{e:#}"));
            let _ = tx.send(WorkerMessage::Finished(result));
        });

        self.worker_rx = Some(rx);
        self.worker_handle = Some(handle);
        self.records.clear();
        self.status = "Verifying...".to_string();
    }

    /// Drain results from a finished worker
    fn poll_worker(&mut self) {
        let Some(rx) = &self.worker_rx else {
            return;
        };
        let Ok(WorkerMessage::Finished(result)) = rx.try_recv() else {
            return;
        };

        match result {
            Ok(records) => {
                let present = records
                    .iter()
                    .filter(|r| {
                        matches!(
                            r.outcome,
                            RecordOutcome::Marked {
                                status: AttendanceStatus::Present,
                                ..
                            }
                        )
                    })
                    .count();
                self.status = format!("{} students, {} present", records.len(), present);
                self.records = records;
            }
            Err(message) => {
                self.status = format!("Verification failed: {message}");
            }
        }

        self.worker_rx = None;
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }

    fn render_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Sheet:");
            ui.add(
                egui::TextEdit::singleline(&mut self.sheet_path)
                    .hint_text("Path to scanned sheet image")
                    .desired_width(440.0),
            );
            if ui.button("Browse...").clicked() {
                self.browse();
            }
            let verify = ui.add_enabled(!self.is_running(), egui::Button::new("Verify"));
            if verify.clicked() {
                self.submit();
            }
        });

        if self.is_running() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(self.progress.read().clone());
            });
        } else {
            ui.label(&self.status);
        }
    }

    fn render_results(&self, ui: &mut egui::Ui) {
        if self.records.is_empty() {
            return;
        }

        TableBuilder::new(ui)
            .striped(true)
            .column(Column::auto().at_least(120.0))
            .column(Column::auto().at_least(90.0))
            .column(Column::remainder())
            .header(20.0, |mut header| {
                header.col(|ui| {
                    ui.strong("Roll number");
                });
                header.col(|ui| {
                    ui.strong("Status");
                });
                header.col(|ui| {
                    ui.strong("Similarity");
                });
            })
            .body(|mut body| {
                for record in &self.records {
                    body.row(20.0, |mut row| {
                        row.col(|ui| {
                            ui.monospace(&record.roll);
                        });
                        match &record.outcome {
                            RecordOutcome::Marked { status, similarity } => {
                                let color = match status {
                                    AttendanceStatus::Present => PRESENT_COLOR,
                                    AttendanceStatus::Absent => ABSENT_COLOR,
                                };
                                row.col(|ui| {
                                    ui.colored_label(color, status.to_string());
                                });
                                row.col(|ui| {
                                    ui.label(format!("{similarity:.1}"));
                                });
                            }
                            RecordOutcome::Failed { reason } => {
                                row.col(|ui| {
                                    ui.colored_label(FAILED_COLOR, "Failed");
                                });
                                row.col(|ui| {
                                    ui.label(reason);
                                });
                            }
                        }
                    });
                }
            });
    }

    fn render_preview(&self, ui: &mut egui::Ui) {
        let trimmed = self.sheet_path.trim();
        if trimmed.is_empty() {
            return;
        }
        ui.separator();
        ui.add(
            egui::Image::from_uri(format!("file://{trimmed}"))
                .max_height(280.0)
                .max_width(ui.available_width()),
        );
    }
}

/// The blocking part of a submission, run off the UI thread
fn run_submission(path: &Path, config: &AppConfig) -> Result<Vec<AttendanceRecord>> {
    let mut recognizer = TesseractOcr::new(&config.ocr)?;
    analysis::verify_sheet(path, config, &mut recognizer)
}

impl eframe::App for AttendanceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_worker();

        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.add_space(6.0);
            self.render_controls(ui);
            ui.add_space(6.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                self.render_results(ui);
                self.render_preview(ui);
            });
        });

        // Keep polling while the worker runs
        if self.is_running() {
            ctx.request_repaint_after(Duration::from_millis(200));
        }
    }
}

impl Drop for AttendanceApp {
    fn drop(&mut self) {
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Run the desktop shell (blocking)
pub fn run_app(config: AppConfig) -> Result<(), eframe::Error> {
    let app = AttendanceApp::new(config);
    eframe::run_native(
        "Attendance Vision",
        AttendanceApp::options(),
        Box::new(|cc| {
            egui_extras::install_image_loaders(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
}
