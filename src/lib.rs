//! Parking violation capture client.
//!
//! An operator photographs a parked vehicle, a remote detection service
//! classifies the photo, and the operator confirms or rejects what it found.
//! This crate holds the client side of that workflow.
//!
//! # Capture cycle
//!
//! 1. A wide shot goes to first-stage analysis. A clean result waits for the
//!    operator's decision; a violation candidate asks for a plate close-up.
//! 2. The close-up goes to second-stage analysis, which either drops the
//!    candidate (no plate, unknown driver, valid reservation) or produces a
//!    confirmable violation.
//! 3. Confirm or reject sends the final disposition and starts a new cycle.
//!
//! # Module Structure
//!
//! - `session`: the capture state machine
//! - `transport`: request types, multipart encoding, HTTP client, wire payloads
//! - `overlay`: detection boxes scaled for display
//! - `learning`: learning statistics, retraining, background poller
//! - `console`: operator command layer used by the `capture_console` binary
//! - `config`, `error`, `ui`: ambient plumbing

pub mod config;
pub mod console;
pub mod error;
pub mod learning;
pub mod overlay;
pub mod session;
pub mod transport;
pub mod ui;

pub use config::ClientConfig;
pub use console::{CaptureConsole, Command, Flow};
pub use error::{CaptureError, ErrorKind};
pub use learning::{LearningStats, Readiness, RetrainOutcome, StatsPoller};
pub use session::{
    CaptureSession, Decision, DispositionReport, FirstImageOutcome, Phase, SessionEvent,
    SessionState, ZoomImageOutcome,
};
pub use transport::{Driver, Endpoint, HttpTransport, ImageUpload, RecordId, Request, Transport};
