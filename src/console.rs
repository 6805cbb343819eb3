//! Operator console.
//!
//! Binds a [`CaptureSession`] to a transport, the overlay and learning
//! accessories, and the terminal. Every failure ends up as advisory text;
//! nothing here panics or aborts the loop.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::config::{ClientConfig, DisplaySettings};
use crate::error::{CaptureError, ErrorKind};
use crate::learning::{self, LearningStats, Readiness, RetrainOutcome};
use crate::overlay::{self, Overlay};
use crate::session::{
    CaptureSession, Decision, DispositionAck, DispositionReport, FirstImageOutcome, Phase,
    SessionEvent, ZoomImageOutcome,
};
use crate::transport::{Driver, ImageUpload, Transport};
use crate::ui::{Tone, Ui};

pub const HELP: &str = "\
commands:
  analyze <image>   send an image for the current step (wide shot, then plate close-up)
  confirm           confirm the current result
  reject            reject the current detection
  status            show the session state
  stats             refresh learning statistics
  retrain           retrain the model (only when the service reports it is ready)
  help              show this text
  quit              leave the console";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Analyze(PathBuf),
    Confirm,
    Reject,
    Status,
    Stats,
    Retrain,
    Help,
    Quit,
}

impl Command {
    /// Parses one input line; blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "analyze" | "a" => {
                if rest.is_empty() {
                    return Err(anyhow!("analyze needs an image path"));
                }
                Command::Analyze(PathBuf::from(rest))
            }
            "confirm" | "c" => Command::Confirm,
            "reject" | "r" => Command::Reject,
            "status" => Command::Status,
            "stats" => Command::Stats,
            "retrain" => Command::Retrain,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(anyhow!("unknown command '{}' (try 'help')", other)),
        };
        if !rest.is_empty() && !matches!(command, Command::Analyze(_)) {
            return Err(anyhow!("'{}' takes no arguments", word));
        }
        Ok(Some(command))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStep {
    First,
    Zoom,
}

impl CaptureStep {
    fn task(self) -> &'static str {
        match self {
            CaptureStep::First => "analyzing first image",
            CaptureStep::Zoom => "analyzing zoom image",
        }
    }

    fn overlay_file(self) -> &'static str {
        match self {
            CaptureStep::First => "overlay_first.png",
            CaptureStep::Zoom => "overlay_zoom.png",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisOutcome {
    First(FirstImageOutcome),
    Zoom(ZoomImageOutcome),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisReport {
    pub step: CaptureStep,
    pub outcome: AnalysisOutcome,
    /// `None` when the overlay could not be produced.
    pub overlay: Option<Overlay>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RetrainAttempt {
    NotReady(LearningStats),
    Ran(RetrainOutcome),
}

pub struct CaptureConsole {
    session: CaptureSession,
    transport: Arc<dyn Transport>,
    ui: Ui,
    display: DisplaySettings,
    overlay_dir: Option<PathBuf>,
    retraining_threshold: u32,
}

impl CaptureConsole {
    pub fn new(cfg: &ClientConfig, transport: Arc<dyn Transport>, ui: Ui) -> Self {
        Self {
            session: CaptureSession::new(cfg.default_image_ref.clone()),
            transport,
            ui,
            display: cfg.display,
            overlay_dir: cfg.overlay_dir.clone(),
            retraining_threshold: cfg.stats.retraining_threshold,
        }
    }

    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.session = self.session.with_events(events);
        self
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn analyze(&mut self, path: &Path) -> Result<AnalysisReport, CaptureError> {
        let image = ImageUpload::from_path(path)?;
        self.analyze_upload(&image)
    }

    /// Routes `image` to the step the session expects. The busy indicator
    /// covers both the analysis call and the overlay call.
    ///
    /// The overlay is fetched whenever the service received the image, even
    /// if its analysis answer could not be used.
    pub fn analyze_upload(&mut self, image: &ImageUpload) -> Result<AnalysisReport, CaptureError> {
        let step = match self.session.phase() {
            Phase::AwaitingZoom => CaptureStep::Zoom,
            Phase::AwaitingFirst | Phase::PendingDisposition => CaptureStep::First,
        };
        let _busy = self.ui.busy(step.task());
        let transport = self.transport.as_ref();
        let analysis = match step {
            CaptureStep::First => self
                .session
                .submit_first_image(transport, image)
                .map(AnalysisOutcome::First),
            CaptureStep::Zoom => self
                .session
                .submit_zoom_image(transport, image)
                .map(AnalysisOutcome::Zoom),
        };
        let outcome = match analysis {
            Ok(outcome) => outcome,
            Err(err) if err.kind() == ErrorKind::UnrecognizedDiscriminant => {
                self.overlay_for(image, step);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let overlay = self.overlay_for(image, step);
        Ok(AnalysisReport {
            step,
            outcome,
            overlay,
        })
    }

    fn overlay_for(&self, image: &ImageUpload, step: CaptureStep) -> Option<Overlay> {
        let overlay = match overlay::fetch_overlay(self.transport.as_ref(), image, self.display) {
            Ok(overlay) => overlay,
            Err(err) => {
                log::warn!("overlay unavailable for {}: {}", image.file_name, err);
                return None;
            }
        };
        if let Some(dir) = &self.overlay_dir {
            let out = dir.join(step.overlay_file());
            match overlay::write_overlay(image, &overlay, &out) {
                Ok(()) => log::info!("overlay written to {}", out.display()),
                Err(err) => log::warn!("failed to write overlay {}: {}", out.display(), err),
            }
        }
        Some(overlay)
    }

    pub fn confirm(&mut self) -> DispositionReport {
        let _busy = self.ui.busy("recording decision");
        self.session.dispose(self.transport.as_ref(), Decision::Confirm)
    }

    pub fn reject(&mut self) -> DispositionReport {
        let _busy = self.ui.busy("rejecting detection");
        self.session.dispose(self.transport.as_ref(), Decision::Reject)
    }

    pub fn refresh_stats(&self) -> Result<LearningStats, CaptureError> {
        learning::fetch_stats(self.transport.as_ref())
    }

    /// Retrains only when the service itself reports readiness.
    pub fn retrain(&self) -> Result<RetrainAttempt, CaptureError> {
        let stats = self.refresh_stats()?;
        if !stats.ready_for_retraining {
            return Ok(RetrainAttempt::NotReady(stats));
        }
        let _busy = self.ui.busy("retraining model");
        let outcome = learning::trigger_retraining(self.transport.as_ref())?;
        Ok(RetrainAttempt::Ran(outcome))
    }

    pub fn prompt(&self) -> String {
        match self.session.phase() {
            Phase::AwaitingFirst => "first> ".to_string(),
            Phase::AwaitingZoom => "zoom> ".to_string(),
            Phase::PendingDisposition => "decide> ".to_string(),
        }
    }

    pub fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Analyze(path) => match self.analyze(&path) {
                Ok(report) => self.show_analysis(&report),
                Err(err) => self.show_error(&err),
            },
            Command::Confirm => {
                let report = self.confirm();
                self.show_disposition(&report);
            }
            Command::Reject => {
                let report = self.reject();
                self.show_disposition(&report);
            }
            Command::Status => self.show_status(),
            Command::Stats => match self.refresh_stats() {
                Ok(stats) => self
                    .ui
                    .notice(Tone::Info, &stats.describe(self.retraining_threshold)),
                Err(err) => {
                    log::warn!("learning stats unavailable: {}", err);
                    self.ui.notice(Tone::Warning, "learning statistics unavailable");
                }
            },
            Command::Retrain => match self.retrain() {
                Ok(RetrainAttempt::NotReady(stats)) => {
                    let remaining = match stats.readiness(self.retraining_threshold) {
                        Readiness::Remaining(n) => n,
                        Readiness::Ready => 0,
                    };
                    self.ui.notice(
                        Tone::Info,
                        &format!("not ready for retraining: {remaining} more confirmed images needed"),
                    );
                }
                Ok(RetrainAttempt::Ran(outcome)) => {
                    let tone = match outcome {
                        RetrainOutcome::Success { .. } => Tone::Success,
                        RetrainOutcome::NoImprovement { .. } => Tone::Warning,
                        RetrainOutcome::Other { .. } => Tone::Info,
                    };
                    self.ui.notice(tone, &outcome.to_string());
                }
                Err(err) => self.show_error(&err),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn show_analysis(&self, report: &AnalysisReport) {
        match &report.outcome {
            AnalysisOutcome::First(FirstImageOutcome::NoViolation { message }) => {
                self.ui.notice(
                    Tone::Success,
                    message.as_deref().unwrap_or("no violation detected"),
                );
                self.ui.notice(
                    Tone::Info,
                    "confirm to record a clean observation, or reject",
                );
            }
            AnalysisOutcome::First(FirstImageOutcome::ZoomRequired {
                violation_id,
                message,
                detected_violation,
                ..
            }) => {
                let fallback = format!("violation candidate {violation_id}; upload a plate close-up");
                self.ui
                    .notice(Tone::Warning, message.as_deref().unwrap_or(&fallback));
                if let Some(class) = detected_violation {
                    self.ui.detail(&[format!("detected: {class}")]);
                }
            }
            AnalysisOutcome::Zoom(ZoomImageOutcome::PlateNotFound) => {
                self.ui.notice(Tone::Failure, "plate not found");
            }
            AnalysisOutcome::Zoom(ZoomImageOutcome::DriverUnknown { plate }) => {
                self.ui.notice(
                    Tone::Failure,
                    &format!(
                        "plate {}: driver not in registry",
                        plate.as_deref().unwrap_or("unknown")
                    ),
                );
            }
            AnalysisOutcome::Zoom(ZoomImageOutcome::ReservationExempt { driver, message }) => {
                self.ui.notice(
                    Tone::Success,
                    message
                        .as_deref()
                        .unwrap_or("driver holds a reservation; parking permitted"),
                );
                self.ui.detail(&driver_card(
                    driver,
                    Some("parking on reservation"),
                    Some("0 (permitted)".to_string()),
                ));
            }
            AnalysisOutcome::Zoom(ZoomImageOutcome::AwaitingConfirmation(candidate)) => {
                self.ui
                    .notice(Tone::Warning, "violation ready: confirm or reject");
                self.ui.detail(&driver_card(
                    &candidate.driver,
                    candidate.description.as_deref(),
                    candidate.penalty.map(|penalty| format!("{penalty} KM")),
                ));
            }
        }

        if let Some(overlay) = &report.overlay {
            self.ui.notice(
                Tone::Info,
                &format!(
                    "{} detections ({}x{} shown at {}x{})",
                    overlay.boxes.len(),
                    overlay.natural.width,
                    overlay.natural.height,
                    overlay.displayed.width,
                    overlay.displayed.height
                ),
            );
            let lines: Vec<String> = overlay
                .boxes
                .iter()
                .map(|d| {
                    format!(
                        "{} [{:.1}, {:.1}, {:.1}, {:.1}]",
                        d.label(),
                        d.bbox[0],
                        d.bbox[1],
                        d.bbox[2],
                        d.bbox[3]
                    )
                })
                .collect();
            self.ui.detail(&lines);
        }
    }

    fn show_disposition(&self, report: &DispositionReport) {
        match &report.result {
            Ok(DispositionAck::Recorded(ack)) => self.ui.notice(
                Tone::Success,
                &format!(
                    "recorded: {}",
                    ack.message.as_deref().unwrap_or("decision saved")
                ),
            ),
            Ok(DispositionAck::Rejected(ack)) => self.ui.notice(
                Tone::Warning,
                &format!("detection rejected ({} images)", ack.count),
            ),
            Err(err) => self.ui.notice(
                Tone::Failure,
                &format!("{} failed: {} (session reset)", report.decision, err),
            ),
        }
    }

    fn show_status(&self) {
        let state = self.session.state();
        let mut lines = vec![format!("phase: {}", state.phase)];
        if let Some(id) = &state.violation_id {
            lines.push(format!(
                "violation: {} (on reservation: {})",
                id, state.on_reservation
            ));
        }
        if let Some(driver) = &state.detected_driver {
            lines.push(format!("driver: {} ({})", driver.name, driver.plate));
        }
        if let Some(first) = &state.first_image_ref {
            lines.push(format!("first image: {first}"));
        }
        if let Some(second) = &state.second_image_ref {
            lines.push(format!("zoom image: {second}"));
        }
        self.ui.notice(Tone::Info, "session");
        self.ui.detail(&lines);
    }

    fn show_error(&self, err: &CaptureError) {
        let text = match err.kind() {
            ErrorKind::Protocol => format!("not allowed now: {err}"),
            ErrorKind::UnrecognizedDiscriminant => {
                format!("unexpected answer from the service, nothing changed: {err}")
            }
            ErrorKind::Transport => format!("service unreachable, try again: {err}"),
            ErrorKind::Input => err.to_string(),
        };
        self.ui.notice(Tone::Failure, &text);
    }
}

pub fn driver_card(
    driver: &Driver,
    description: Option<&str>,
    penalty: Option<String>,
) -> Vec<String> {
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    vec![
        format!("name: {}", driver.name),
        format!("plate: {}", driver.plate),
        format!(
            "vehicle: {}",
            driver.vehicle_type.as_deref().unwrap_or("unknown")
        ),
        format!("disability permit: {}", yes_no(driver.disability_permit)),
        format!("reservation: {}", yes_no(driver.has_reservation)),
        format!("violation: {}", description.unwrap_or("-")),
        format!("penalty: {}", penalty.as_deref().unwrap_or("-")),
    ]
}
