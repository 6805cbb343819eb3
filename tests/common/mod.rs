#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use parking_capture::transport::Request;
use parking_capture::{CaptureError, Endpoint, Transport};

/// In-memory transport answering from per-endpoint queues.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<Endpoint, VecDeque<Result<Vec<u8>, String>>>>,
    sent: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, endpoint: Endpoint, json: &str) {
        self.push(endpoint, Ok(json.as_bytes().to_vec()));
    }

    pub fn fail(&self, endpoint: Endpoint, reason: &str) {
        self.push(endpoint, Err(reason.to_string()));
    }

    fn push(&self, endpoint: Endpoint, response: Result<Vec<u8>, String>) {
        self.responses
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(response);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, endpoint: Endpoint) -> Vec<Request> {
        self.sent()
            .into_iter()
            .filter(|request| request.endpoint == endpoint)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: Request) -> Result<Vec<u8>, CaptureError> {
        let endpoint = request.endpoint;
        self.sent.lock().unwrap().push(request);
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(body)) => Ok(body),
            Some(Err(reason)) => Err(CaptureError::Transport { endpoint, reason }),
            None => Err(CaptureError::Transport {
                endpoint,
                reason: "no scripted response".to_string(),
            }),
        }
    }
}

pub const NEEDS_ZOOM_V1: &str = r#"{
    "status": "NEEDS_ZOOM",
    "prekrsaj_id": "V1",
    "on_reservation": true,
    "detected_violation": "NepropisnoParkirano_Trotoar",
    "message": "violation detected, zoom in on the plate"
}"#;

pub const FIRST_CLEAN: &str = r#"{"status": "OK", "message": "parked correctly"}"#;

pub const READY_TO_CONFIRM: &str = r#"{
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
    "prekrsaj_id": "V1",
    "slika1": "backend/uploads/first_image.jpg",
    "slika2": "backend/uploads/zoom_image.jpg"
}"#;

pub const RESERVATION_OK: &str = r#"{
    "status": "OK_WITH_RESERVATION",
    "message": "driver holds a reservation",
    "plate": "K99",
    "vozac": {"vozac_id": 9, "ime": "Lejla", "tablica": "K99", "auto_tip": "Clio", "invalid": false, "rezervacija": true}
}"#;
