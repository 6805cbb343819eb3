//! Learning statistics and model retraining.
//!
//! Stats are read-only accessories of the capture workflow. They are polled
//! on a timer and refreshed after every disposition via [`SessionEvent`]s;
//! failures are logged and otherwise ignored.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::CaptureError;
use crate::session::SessionEvent;
use crate::transport::payload::{decode, required_status};
use crate::transport::{Endpoint, Request, Transport};

const POLL_TICK: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LearningStats {
    #[serde(default)]
    pub confirmed_images: u32,
    #[serde(default)]
    pub rejected_first: u32,
    #[serde(default)]
    pub rejected_zoom: u32,
    #[serde(default)]
    pub ready_for_retraining: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Remaining(u32),
}

impl LearningStats {
    /// The service's own flag decides readiness; the remainder is display only.
    pub fn readiness(&self, threshold: u32) -> Readiness {
        if self.ready_for_retraining {
            Readiness::Ready
        } else {
            Readiness::Remaining(remaining_to_threshold(self.confirmed_images, threshold))
        }
    }

    pub fn describe(&self, threshold: u32) -> String {
        let readiness = match self.readiness(threshold) {
            Readiness::Ready => "ready for retraining".to_string(),
            Readiness::Remaining(n) => format!("{n} more confirmed images needed"),
        };
        format!(
            "confirmed={} rejected_first={} rejected_zoom={} | {}",
            self.confirmed_images, self.rejected_first, self.rejected_zoom, readiness
        )
    }
}

pub fn remaining_to_threshold(confirmed: u32, threshold: u32) -> u32 {
    threshold.saturating_sub(confirmed)
}

pub fn parse_stats(body: &[u8]) -> Result<LearningStats, CaptureError> {
    decode(Endpoint::LearningStats, body)
}

pub fn fetch_stats(transport: &dyn Transport) -> Result<LearningStats, CaptureError> {
    let body = transport.send(Request::get(Endpoint::LearningStats))?;
    parse_stats(&body)
}

#[derive(Clone, Debug, PartialEq)]
pub enum RetrainOutcome {
    Success {
        message: String,
        improvement: Option<f64>,
        old_map50: Option<f64>,
        new_map50: Option<f64>,
    },
    NoImprovement {
        message: String,
        old_map50: Option<f64>,
        new_map50: Option<f64>,
    },
    /// `NOT_ENOUGH_DATA`, `ERROR`, or anything else the service says.
    Other { status: String, message: String },
}

impl fmt::Display for RetrainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainOutcome::Success {
                message,
                improvement,
                ..
            } => match improvement {
                Some(improvement) => {
                    write!(f, "{} (improvement +{:.1}%)", message, improvement * 100.0)
                }
                None => f.write_str(message),
            },
            RetrainOutcome::NoImprovement { message, .. } => f.write_str(message),
            RetrainOutcome::Other { status, message } => write!(f, "{status}: {message}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RetrainWire {
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    improvement: Option<f64>,
    #[serde(default)]
    old_map50: Option<f64>,
    #[serde(default)]
    new_map50: Option<f64>,
}

pub fn parse_retrain(body: &[u8]) -> Result<RetrainOutcome, CaptureError> {
    let endpoint = Endpoint::Retrain;
    let wire: RetrainWire = decode(endpoint, body)?;
    let status = required_status(endpoint, wire.status)?;
    let message = wire.message.unwrap_or_default();
    Ok(match status.as_str() {
        "SUCCESS" => RetrainOutcome::Success {
            message,
            improvement: wire.improvement,
            old_map50: wire.old_map50,
            new_map50: wire.new_map50,
        },
        "NO_IMPROVEMENT" => RetrainOutcome::NoImprovement {
            message,
            old_map50: wire.old_map50,
            new_map50: wire.new_map50,
        },
        _ => RetrainOutcome::Other { status, message },
    })
}

pub fn trigger_retraining(transport: &dyn Transport) -> Result<RetrainOutcome, CaptureError> {
    let body = transport.send(Request::post(Endpoint::Retrain))?;
    parse_retrain(&body)
}

/// Handle to a running [`StatsPoller`] thread.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stats poller thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Background stats refresher.
///
/// Fetches once at start, then every `interval`, and immediately after each
/// session event received on `events`.
pub struct StatsPoller {
    transport: Arc<dyn Transport>,
    interval: Duration,
    events: Option<Receiver<SessionEvent>>,
}

impl StatsPoller {
    pub fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Receiver<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn spawn<F>(self, mut on_update: F) -> PollerHandle
    where
        F: FnMut(&LearningStats) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            let mut refresh = |transport: &dyn Transport| match fetch_stats(transport) {
                Ok(stats) => on_update(&stats),
                Err(err) => log::warn!("learning stats unavailable: {}", err),
            };

            refresh(self.transport.as_ref());
            let mut next_due = Instant::now() + self.interval;
            let mut events = self.events;

            while !shutdown_thread.load(Ordering::SeqCst) {
                let tick = POLL_TICK.min(next_due.saturating_duration_since(Instant::now()));
                let received = match &events {
                    Some(rx) => rx.recv_timeout(tick),
                    None => {
                        std::thread::sleep(tick);
                        Err(RecvTimeoutError::Timeout)
                    }
                };
                let event_arrived = match received {
                    Ok(event) => {
                        log::debug!("stats refresh after {:?}", event);
                        true
                    }
                    Err(RecvTimeoutError::Timeout) => false,
                    Err(RecvTimeoutError::Disconnected) => {
                        events = None;
                        false
                    }
                };
                if shutdown_thread.load(Ordering::SeqCst) {
                    break;
                }
                if event_arrived || Instant::now() >= next_due {
                    refresh(self.transport.as_ref());
                    next_due = Instant::now() + self.interval;
                }
            }
        });

        PollerHandle {
            shutdown,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_to_zero() {
        assert_eq!(remaining_to_threshold(7, 10), 3);
        assert_eq!(remaining_to_threshold(12, 10), 0);
    }

    #[test]
    fn readiness_follows_service_flag() {
        let seven = LearningStats {
            confirmed_images: 7,
            ..Default::default()
        };
        assert_eq!(seven.readiness(10), Readiness::Remaining(3));

        let ten = LearningStats {
            confirmed_images: 10,
            ready_for_retraining: true,
            ..Default::default()
        };
        assert_eq!(ten.readiness(10), Readiness::Ready);

        let flagged_early = LearningStats {
            confirmed_images: 2,
            ready_for_retraining: true,
            ..Default::default()
        };
        assert_eq!(flagged_early.readiness(10), Readiness::Ready);
    }

    #[test]
    fn parses_stats_payload() {
        let stats = parse_stats(
            br#"{"confirmed_images":4,"rejected_first":2,"rejected_zoom":1,"ready_for_retraining":false}"#,
        )
        .unwrap();
        assert_eq!(stats.rejected_first, 2);
        assert!(stats.describe(10).contains("6 more confirmed images needed"));
    }

    #[test]
    fn retrain_statuses() {
        let success = parse_retrain(
            br#"{"status":"SUCCESS","message":"updated","old_map50":0.5,"new_map50":0.55,"improvement":0.05}"#,
        )
        .unwrap();
        assert_eq!(success.to_string(), "updated (improvement +5.0%)");

        let flat = parse_retrain(br#"{"status":"NO_IMPROVEMENT","message":"kept old"}"#).unwrap();
        assert!(matches!(flat, RetrainOutcome::NoImprovement { .. }));

        let short = parse_retrain(br#"{"status":"NOT_ENOUGH_DATA","message":"need 10"}"#).unwrap();
        assert_eq!(
            short,
            RetrainOutcome::Other {
                status: "NOT_ENOUGH_DATA".to_string(),
                message: "need 10".to_string()
            }
        );
    }
}
