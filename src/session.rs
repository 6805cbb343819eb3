//! Violation capture session.
//!
//! One session tracks one capture cycle: a wide shot, optionally a plate
//! close-up, then the operator's confirm/reject decision. The cycle is an
//! explicit three-phase machine:
//!
//! ```text
//!   AwaitingFirst --OK--------------------------> PendingDisposition
//!   AwaitingFirst --NEEDS_ZOOM------------------> AwaitingZoom
//!   AwaitingZoom  --NO_PLATE|NO_DRIVER|RESERVED-> AwaitingFirst (reset)
//!   AwaitingZoom  --READY_TO_CONFIRM------------> PendingDisposition
//!   any           --dispose(confirm|reject)-----> AwaitingFirst (reset)
//! ```
//!
//! Analysis failures (transport, unknown status) never move the phase, so
//! the operator can retry the same upload. Dispositions always reset, even
//! when the request fails.
//!
//! The session does not guard against concurrent use; callers issue one
//! operation at a time.

use std::fmt;
use std::sync::mpsc::Sender;

use serde_json::Value;

use crate::error::CaptureError;
use crate::transport::payload::{self, parse_first_analysis, parse_zoom_analysis};
use crate::transport::{
    Ack, Driver, Endpoint, FirstAnalysis, Form, ImageUpload, RecordId, RejectionAck, Request,
    Transport, ViolationCandidate, ViolationRecord, ZoomAnalysis,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    AwaitingFirst,
    AwaitingZoom,
    /// An analysis result is on screen and waits for confirm or reject.
    PendingDisposition,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::AwaitingFirst => "awaiting first image",
            Phase::AwaitingZoom => "awaiting zoom image",
            Phase::PendingDisposition => "pending disposition",
        })
    }
}

/// All session-scoped values. Replaced wholesale on reset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub violation_id: Option<RecordId>,
    /// Only meaningful while `violation_id` is set.
    pub on_reservation: bool,
    pub detected_driver: Option<Driver>,
    pub first_image_ref: Option<String>,
    pub second_image_ref: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Confirm => "confirm",
            Decision::Reject => "reject",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FirstImageOutcome {
    NoViolation {
        message: Option<String>,
    },
    ZoomRequired {
        violation_id: RecordId,
        on_reservation: bool,
        message: Option<String>,
        detected_violation: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ZoomImageOutcome {
    PlateNotFound,
    DriverUnknown {
        plate: Option<String>,
    },
    /// Parked legitimately under a reservation; nothing left to decide.
    ReservationExempt {
        driver: Driver,
        message: Option<String>,
    },
    AwaitingConfirmation(Box<ViolationCandidate>),
}

/// The request a disposition sends.
#[derive(Clone, Debug, PartialEq)]
pub enum DispositionRequest {
    CleanObservation {
        image_ref: String,
    },
    Violation(ViolationRecord),
    Rejection {
        image_ref: String,
        second_image_ref: Option<String>,
    },
}

impl DispositionRequest {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            DispositionRequest::CleanObservation { .. } => Endpoint::RecordCleanObservation,
            DispositionRequest::Violation(_) => Endpoint::RecordViolation,
            DispositionRequest::Rejection { .. } => Endpoint::RejectDetection,
        }
    }

    fn to_request(&self) -> Result<Request, CaptureError> {
        Ok(match self {
            DispositionRequest::CleanObservation { image_ref } => Request::form(
                self.endpoint(),
                Form::new().text("image_path", image_ref.clone()),
            ),
            DispositionRequest::Violation(record) => {
                let body: Value = serde_json::to_value(record).map_err(|e| {
                    CaptureError::transport(self.endpoint(), format!("encode record: {e}"))
                })?;
                Request::json(self.endpoint(), body)
            }
            DispositionRequest::Rejection {
                image_ref,
                second_image_ref,
            } => {
                let mut form = Form::new().text("image_path", image_ref.clone());
                if let Some(second) = second_image_ref {
                    form = form.text("second_image_path", second.clone());
                }
                Request::form(self.endpoint(), form)
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispositionAck {
    Recorded(Ack),
    Rejected(RejectionAck),
}

/// What a disposition did. The session has already been reset when this is
/// returned, whatever `result` holds.
#[derive(Debug)]
pub struct DispositionReport {
    pub decision: Decision,
    pub request: DispositionRequest,
    pub result: Result<DispositionAck, CaptureError>,
}

impl DispositionReport {
    pub fn delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Notifications for observers outside the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Disposed { decision: Decision, delivered: bool },
}

#[derive(Debug)]
pub struct CaptureSession {
    state: SessionState,
    default_image_ref: String,
    events: Option<Sender<SessionEvent>>,
}

impl CaptureSession {
    pub fn new(default_image_ref: impl Into<String>) -> Self {
        Self {
            state: SessionState::default(),
            default_image_ref: default_image_ref.into(),
            events: None,
        }
    }

    /// Publish a [`SessionEvent`] after every disposition.
    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn violation_id(&self) -> Option<&RecordId> {
        self.state.violation_id.as_ref()
    }

    pub fn on_reservation(&self) -> bool {
        self.state.on_reservation
    }

    pub fn detected_driver(&self) -> Option<&Driver> {
        self.state.detected_driver.as_ref()
    }

    pub fn first_image_ref(&self) -> Option<&str> {
        self.state.first_image_ref.as_deref()
    }

    pub fn second_image_ref(&self) -> Option<&str> {
        self.state.second_image_ref.as_deref()
    }

    /// Sends the wide shot for first-stage analysis.
    pub fn submit_first_image(
        &mut self,
        transport: &dyn Transport,
        image: &ImageUpload,
    ) -> Result<FirstImageOutcome, CaptureError> {
        if self.state.phase != Phase::AwaitingFirst {
            return Err(CaptureError::ProtocolViolation {
                operation: "submit_first_image",
                reason: format!("session is {}", self.state.phase),
            });
        }

        let form = Form::new().file("file", image);
        let body = transport.send(Request::form(Endpoint::AnalyzeFirst, form))?;
        let analysis = parse_first_analysis(&body)?;

        match analysis {
            FirstAnalysis::Clean { message } => {
                log::info!("first image clean; awaiting disposition");
                self.state.phase = Phase::PendingDisposition;
                Ok(FirstImageOutcome::NoViolation { message })
            }
            FirstAnalysis::NeedsZoom {
                violation_id,
                on_reservation,
                message,
                detected_violation,
            } => {
                log::info!(
                    "violation candidate {} (on_reservation={}); zoom image required",
                    violation_id,
                    on_reservation
                );
                self.state.phase = Phase::AwaitingZoom;
                self.state.violation_id = Some(violation_id.clone());
                self.state.on_reservation = on_reservation;
                Ok(FirstImageOutcome::ZoomRequired {
                    violation_id,
                    on_reservation,
                    message,
                    detected_violation,
                })
            }
        }
    }

    /// Sends the plate close-up for the pending violation candidate.
    pub fn submit_zoom_image(
        &mut self,
        transport: &dyn Transport,
        image: &ImageUpload,
    ) -> Result<ZoomImageOutcome, CaptureError> {
        if self.state.phase != Phase::AwaitingZoom {
            return Err(CaptureError::ProtocolViolation {
                operation: "submit_zoom_image",
                reason: format!("session is {}", self.state.phase),
            });
        }
        let violation_id = self.state.violation_id.clone().ok_or_else(|| {
            CaptureError::ProtocolViolation {
                operation: "submit_zoom_image",
                reason: "no violation candidate is pending".to_string(),
            }
        })?;

        let form = Form::new()
            .file("file", image)
            .text("on_reservation", self.state.on_reservation.to_string())
            .text("prekrsaj_id", violation_id.to_string());
        let body = transport.send(Request::form(Endpoint::AnalyzeZoom, form))?;
        let analysis = parse_zoom_analysis(&body)?;

        match analysis {
            ZoomAnalysis::NoPlate => {
                log::info!("zoom image: no plate found; candidate {} dropped", violation_id);
                self.reset();
                Ok(ZoomImageOutcome::PlateNotFound)
            }
            ZoomAnalysis::NoDriver { plate } => {
                log::info!(
                    "zoom image: plate {} has no driver record; candidate {} dropped",
                    plate.as_deref().unwrap_or("?"),
                    violation_id
                );
                self.reset();
                Ok(ZoomImageOutcome::DriverUnknown { plate })
            }
            ZoomAnalysis::ReservationExempt {
                driver, message, ..
            } => {
                log::info!("zoom image: driver {} holds a reservation", driver.id);
                self.reset();
                Ok(ZoomImageOutcome::ReservationExempt { driver, message })
            }
            ZoomAnalysis::ReadyToConfirm(candidate) => {
                log::info!(
                    "zoom image: violation {} by driver {} ready to confirm",
                    violation_id,
                    candidate.driver.id
                );
                self.state.phase = Phase::PendingDisposition;
                self.state.detected_driver = Some(candidate.driver.clone());
                self.state.first_image_ref = candidate.first_image_ref.clone();
                self.state.second_image_ref = candidate.second_image_ref.clone();
                Ok(ZoomImageOutcome::AwaitingConfirmation(candidate))
            }
        }
    }

    /// Sends the operator's decision and resets the session.
    ///
    /// Valid in every phase. Confirming without a complete violation
    /// candidate records a clean observation.
    pub fn dispose(&mut self, transport: &dyn Transport, decision: Decision) -> DispositionReport {
        let request = self.disposition_request(decision);
        let endpoint = request.endpoint();
        log::info!("disposition {} via {}", decision, endpoint);

        let result = request
            .to_request()
            .and_then(|req| transport.send(req))
            .and_then(|body| match decision {
                Decision::Confirm => payload::parse_ack(endpoint, &body).map(DispositionAck::Recorded),
                Decision::Reject => {
                    payload::parse_rejection_ack(&body).map(DispositionAck::Rejected)
                }
            });
        if let Err(err) = &result {
            log::warn!("disposition {} not delivered: {}", decision, err);
        }

        self.reset();

        let report = DispositionReport {
            decision,
            request,
            result,
        };
        if let Some(events) = &self.events {
            let event = SessionEvent::Disposed {
                decision,
                delivered: report.delivered(),
            };
            if events.send(event).is_err() {
                log::debug!("no listener for session events");
            }
        }
        report
    }

    fn disposition_request(&self, decision: Decision) -> DispositionRequest {
        let first_ref = self
            .state
            .first_image_ref
            .clone()
            .unwrap_or_else(|| self.default_image_ref.clone());
        match decision {
            Decision::Confirm => match (&self.state.violation_id, &self.state.detected_driver) {
                (Some(violation_id), Some(driver)) => {
                    DispositionRequest::Violation(ViolationRecord {
                        vozac_id: driver.id.clone(),
                        prekrsaj_id: violation_id.clone(),
                        slika1: first_ref,
                        slika2: self.state.second_image_ref.clone(),
                    })
                }
                _ => DispositionRequest::CleanObservation {
                    image_ref: first_ref,
                },
            },
            Decision::Reject => DispositionRequest::Rejection {
                image_ref: first_ref,
                second_image_ref: self.state.second_image_ref.clone(),
            },
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::default();
    }
}
