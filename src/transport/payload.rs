//! Wire payloads of the detection service.
//!
//! Field names follow the service exactly (`prekrsaj_id`, `vozac`, `slika1`,
//! ...). Each `parse_*` function turns a raw JSON body into a typed outcome
//! and rejects statuses it does not know, so the caller can keep its state
//! when the service says something unexpected.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Endpoint;
use crate::error::CaptureError;

/// Opaque identifier issued by the service.
///
/// The service uses integers today; strings are accepted so the client never
/// has to interpret ids. The original JSON kind is preserved when the id is
/// sent back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{n}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Number(value)
    }
}

/// Driver record (`vozac`) as returned by zoom analysis.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Driver {
    #[serde(rename = "vozac_id")]
    pub id: RecordId,
    #[serde(rename = "ime")]
    pub name: String,
    #[serde(rename = "tablica")]
    pub plate: String,
    /// Sent as `auto_tip` or, on the reservation path, `auto`.
    #[serde(rename = "auto_tip", alias = "auto", default)]
    pub vehicle_type: Option<String>,
    /// Holder of a disability (`invalid`) permit.
    #[serde(rename = "invalid", default)]
    pub disability_permit: bool,
    #[serde(rename = "rezervacija", default)]
    pub has_reservation: bool,
}

// -------------------- First image --------------------

#[derive(Debug, Deserialize)]
struct FirstAnalysisWire {
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    prekrsaj_id: Option<RecordId>,
    #[serde(default)]
    on_reservation: Option<bool>,
    #[serde(default)]
    detected_violation: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FirstAnalysis {
    /// `OK`: nothing wrong in the wide shot.
    Clean { message: Option<String> },
    /// `NEEDS_ZOOM`: candidate violation, a plate close-up is required.
    NeedsZoom {
        violation_id: RecordId,
        on_reservation: bool,
        message: Option<String>,
        detected_violation: Option<String>,
    },
}

pub fn parse_first_analysis(body: &[u8]) -> Result<FirstAnalysis, CaptureError> {
    let endpoint = Endpoint::AnalyzeFirst;
    let wire: FirstAnalysisWire = decode(endpoint, body)?;
    match required_status(endpoint, wire.status)?.as_str() {
        "OK" => Ok(FirstAnalysis::Clean {
            message: wire.message,
        }),
        "NEEDS_ZOOM" => {
            let violation_id = wire
                .prekrsaj_id
                .ok_or_else(|| CaptureError::malformed(endpoint, "NEEDS_ZOOM without prekrsaj_id"))?;
            Ok(FirstAnalysis::NeedsZoom {
                violation_id,
                on_reservation: wire.on_reservation.unwrap_or(false),
                message: wire.message,
                detected_violation: wire.detected_violation,
            })
        }
        other => Err(CaptureError::UnrecognizedStatus {
            endpoint,
            status: other.to_string(),
        }),
    }
}

// -------------------- Zoom image --------------------

#[derive(Debug, Deserialize)]
struct ZoomAnalysisWire {
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    plate: Option<String>,
    #[serde(default)]
    vozac: Option<Driver>,
    #[serde(default)]
    prekrsaj_opis: Option<String>,
    #[serde(default)]
    prekrsaj_kazna: Option<f64>,
    #[serde(default)]
    extra_violation_id: Option<RecordId>,
    #[serde(default)]
    slika1: Option<String>,
    #[serde(default)]
    slika2: Option<String>,
}

/// A violation the operator can confirm or reject.
#[derive(Clone, Debug, PartialEq)]
pub struct ViolationCandidate {
    pub driver: Driver,
    pub plate: Option<String>,
    pub description: Option<String>,
    pub penalty: Option<f64>,
    pub extra_violation_id: Option<RecordId>,
    pub first_image_ref: Option<String>,
    pub second_image_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ZoomAnalysis {
    NoPlate,
    NoDriver { plate: Option<String> },
    ReservationExempt {
        driver: Driver,
        plate: Option<String>,
        message: Option<String>,
    },
    ReadyToConfirm(Box<ViolationCandidate>),
}

pub fn parse_zoom_analysis(body: &[u8]) -> Result<ZoomAnalysis, CaptureError> {
    let endpoint = Endpoint::AnalyzeZoom;
    let wire: ZoomAnalysisWire = decode(endpoint, body)?;
    match required_status(endpoint, wire.status)?.as_str() {
        "NO_PLATE" => Ok(ZoomAnalysis::NoPlate),
        "NO_DRIVER" => Ok(ZoomAnalysis::NoDriver { plate: wire.plate }),
        "OK_WITH_RESERVATION" => {
            let driver = wire
                .vozac
                .ok_or_else(|| CaptureError::malformed(endpoint, "OK_WITH_RESERVATION without vozac"))?;
            Ok(ZoomAnalysis::ReservationExempt {
                driver,
                plate: wire.plate,
                message: wire.message,
            })
        }
        "READY_TO_CONFIRM" => {
            let driver = wire
                .vozac
                .ok_or_else(|| CaptureError::malformed(endpoint, "READY_TO_CONFIRM without vozac"))?;
            Ok(ZoomAnalysis::ReadyToConfirm(Box::new(ViolationCandidate {
                driver,
                plate: wire.plate,
                description: wire.prekrsaj_opis,
                penalty: wire.prekrsaj_kazna,
                extra_violation_id: wire.extra_violation_id,
                first_image_ref: wire.slika1,
                second_image_ref: wire.slika2,
            })))
        }
        other => Err(CaptureError::UnrecognizedStatus {
            endpoint,
            status: other.to_string(),
        }),
    }
}

// -------------------- Dispositions --------------------

/// Body of `record_violation`; serializes to exactly
/// `{vozac_id, prekrsaj_id, slika1, slika2}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViolationRecord {
    pub vozac_id: RecordId,
    pub prekrsaj_id: RecordId,
    pub slika1: String,
    pub slika2: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AckWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    count: Option<u32>,
}

/// Acknowledgement of a recording request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ack {
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectionAck {
    /// Number of images the service discarded into its rejected set.
    pub count: u32,
    pub message: Option<String>,
}

pub fn parse_ack(endpoint: Endpoint, body: &[u8]) -> Result<Ack, CaptureError> {
    let wire = decode_ack(endpoint, body)?;
    Ok(Ack {
        message: wire.message,
    })
}

pub fn parse_rejection_ack(body: &[u8]) -> Result<RejectionAck, CaptureError> {
    let endpoint = Endpoint::RejectDetection;
    let wire = decode_ack(endpoint, body)?;
    Ok(RejectionAck {
        count: wire.count.unwrap_or(0),
        message: wire.message,
    })
}

fn decode_ack(endpoint: Endpoint, body: &[u8]) -> Result<AckWire, CaptureError> {
    let wire: AckWire = decode(endpoint, body)?;
    if wire
        .status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case("error"))
    {
        return Err(CaptureError::ServiceError {
            endpoint,
            message: wire.message.unwrap_or_else(|| "unspecified error".to_string()),
        });
    }
    Ok(wire)
}

// -------------------- Helpers --------------------

pub(crate) fn decode<'a, T: Deserialize<'a>>(
    endpoint: Endpoint,
    body: &'a [u8],
) -> Result<T, CaptureError> {
    serde_json::from_slice(body).map_err(|e| CaptureError::malformed(endpoint, e.to_string()))
}

pub(crate) fn required_status(
    endpoint: Endpoint,
    status: Option<String>,
) -> Result<String, CaptureError> {
    status.ok_or_else(|| CaptureError::malformed(endpoint, "missing status"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const READY_TO_CONFIRM: &str = r#"{
        "status": "READY_TO_CONFIRM",
        "plate": "A12-B-345",
        "vozac": {
            "vozac_id": 4,
            "ime": "Amar H.",
            "tablica": "A12-B-345",
            "auto_tip": "Golf",
            "invalid": false,
            "rezervacija": false
        },
        "prekrsaj_opis": "NepropisnoParkirano_Trotoar",
        "prekrsaj_kazna": 50,
        "prekrsaj_id": 2,
        "slika1": "backend/uploads/first_image.jpg",
        "slika2": "backend/uploads/zoom_image.jpg"
    }"#;

    #[test]
    fn first_ok_is_clean() {
        let parsed = parse_first_analysis(br#"{"status":"OK","message":"clean"}"#).unwrap();
        assert_eq!(
            parsed,
            FirstAnalysis::Clean {
                message: Some("clean".to_string())
            }
        );
    }

    #[test]
    fn needs_zoom_keeps_numeric_id_and_defaults_reservation() {
        let parsed = parse_first_analysis(
            br#"{"status":"NEEDS_ZOOM","prekrsaj_id":3,"detected_violation":"NepropisnoParkirano_Trava"}"#,
        )
        .unwrap();
        match parsed {
            FirstAnalysis::NeedsZoom {
                violation_id,
                on_reservation,
                detected_violation,
                ..
            } => {
                assert_eq!(violation_id, RecordId::Number(3));
                assert!(!on_reservation);
                assert_eq!(
                    detected_violation.as_deref(),
                    Some("NepropisnoParkirano_Trava")
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn needs_zoom_without_id_is_malformed() {
        let err = parse_first_analysis(br#"{"status":"NEEDS_ZOOM"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnrecognizedDiscriminant);
    }

    #[test]
    fn unknown_first_status_is_unrecognized() {
        let err = parse_first_analysis(br#"{"status":"MAYBE"}"#).unwrap_err();
        assert!(matches!(err, CaptureError::UnrecognizedStatus { ref status, .. } if status == "MAYBE"));
    }

    #[test]
    fn ready_to_confirm_carries_driver_and_refs() {
        let parsed = parse_zoom_analysis(READY_TO_CONFIRM.as_bytes()).unwrap();
        let ZoomAnalysis::ReadyToConfirm(candidate) = parsed else {
            panic!("expected READY_TO_CONFIRM");
        };
        assert_eq!(candidate.driver.id, RecordId::Number(4));
        assert_eq!(candidate.driver.vehicle_type.as_deref(), Some("Golf"));
        assert_eq!(candidate.penalty, Some(50.0));
        assert_eq!(
            candidate.second_image_ref.as_deref(),
            Some("backend/uploads/zoom_image.jpg")
        );
    }

    #[test]
    fn reservation_driver_accepts_auto_alias() {
        let body = br#"{
            "status": "OK_WITH_RESERVATION",
            "message": "reserved",
            "vozac": {"vozac_id": 9, "ime": "Lejla", "tablica": "K99", "auto": "Clio", "invalid": true, "rezervacija": true}
        }"#;
        let ZoomAnalysis::ReservationExempt { driver, .. } = parse_zoom_analysis(body).unwrap() else {
            panic!("expected OK_WITH_RESERVATION");
        };
        assert_eq!(driver.vehicle_type.as_deref(), Some("Clio"));
        assert!(driver.disability_permit);
        assert!(driver.has_reservation);
    }

    #[test]
    fn no_driver_carries_plate() {
        let parsed = parse_zoom_analysis(br#"{"status":"NO_DRIVER","plate":"X1"}"#).unwrap();
        assert_eq!(
            parsed,
            ZoomAnalysis::NoDriver {
                plate: Some("X1".to_string())
            }
        );
    }

    #[test]
    fn violation_record_serializes_exact_fields() {
        let record = ViolationRecord {
            vozac_id: RecordId::Number(4),
            prekrsaj_id: RecordId::from("V1"),
            slika1: "a.jpg".to_string(),
            slika2: Some("b.jpg".to_string()),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"vozac_id": 4, "prekrsaj_id": "V1", "slika1": "a.jpg", "slika2": "b.jpg"})
        );
    }

    #[test]
    fn error_status_ack_is_service_error() {
        let err = parse_ack(
            Endpoint::RecordCleanObservation,
            br#"{"status":"error","message":"Slika ne postoji"}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("Slika ne postoji"));
    }

    #[test]
    fn rejection_ack_reads_count() {
        let ack = parse_rejection_ack(br#"{"status":"success","count":2}"#).unwrap();
        assert_eq!(ack.count, 2);
    }
}
