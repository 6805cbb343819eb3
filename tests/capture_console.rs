mod common;

use std::io::Cursor;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedTransport, FIRST_CLEAN, NEEDS_ZOOM_V1, READY_TO_CONFIRM};
use image::{ImageFormat, RgbImage};
use parking_capture::config::DisplaySettings;
use parking_capture::console::{AnalysisOutcome, CaptureStep, RetrainAttempt};
use parking_capture::overlay::Size;
use parking_capture::ui::Ui;
use parking_capture::{
    CaptureConsole, ClientConfig, Command, Endpoint, ErrorKind, Flow, ImageUpload, Phase,
    RetrainOutcome, StatsPoller, ZoomImageOutcome,
};

fn png(width: u32, height: u32) -> ImageUpload {
    let mut bytes = Vec::new();
    RgbImage::new(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    ImageUpload::new("shot.png", "image/png", bytes)
}

fn console_with(transport: &Arc<ScriptedTransport>, cfg: &ClientConfig) -> CaptureConsole {
    CaptureConsole::new(cfg, transport.clone(), Ui::plain())
}

fn small_display() -> ClientConfig {
    ClientConfig {
        display: DisplaySettings {
            max_width: 500,
            max_height: 500,
        },
        ..ClientConfig::default()
    }
}

#[test]
fn analyze_routes_by_phase_and_scales_overlay() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut console = console_with(&transport, &small_display());
    let image = png(1000, 500);

    transport.respond(Endpoint::AnalyzeFirst, NEEDS_ZOOM_V1);
    transport.respond(
        Endpoint::Detect,
        r#"{"detections": [{"box": [100, 100, 300, 200], "class": "NepropisnoParkirano_Trotoar", "confidence": 0.91}]}"#,
    );
    let report = console.analyze_upload(&image).expect("first analysis");

    assert_eq!(report.step, CaptureStep::First);
    assert!(matches!(report.outcome, AnalysisOutcome::First(_)));
    let overlay = report.overlay.expect("overlay");
    assert_eq!(overlay.natural, Size { width: 1000, height: 500 });
    assert_eq!(overlay.displayed, Size { width: 500, height: 250 });
    assert_eq!(overlay.boxes.len(), 1);
    assert_eq!(overlay.boxes[0].bbox, [50.0, 50.0, 150.0, 100.0]);
    assert_eq!(console.session().phase(), Phase::AwaitingZoom);
    assert_eq!(console.prompt(), "zoom> ");

    transport.respond(Endpoint::AnalyzeZoom, READY_TO_CONFIRM);
    transport.respond(Endpoint::Detect, r#"{"detections": []}"#);
    let report = console.analyze_upload(&image).expect("zoom analysis");

    assert_eq!(report.step, CaptureStep::Zoom);
    match report.outcome {
        AnalysisOutcome::Zoom(ZoomImageOutcome::AwaitingConfirmation(candidate)) => {
            assert_eq!(candidate.penalty, Some(50.0));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(console.session().phase(), Phase::PendingDisposition);
}

#[test]
fn overlay_failure_does_not_block_analysis() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut console = console_with(&transport, &ClientConfig::default());

    transport.respond(Endpoint::AnalyzeFirst, FIRST_CLEAN);
    transport.fail(Endpoint::Detect, "detector offline");
    let report = console.analyze_upload(&png(64, 48)).expect("analysis");

    assert!(report.overlay.is_none());
    assert_eq!(console.session().phase(), Phase::PendingDisposition);
}

#[test]
fn analysis_failure_sends_no_overlay_request() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut console = console_with(&transport, &ClientConfig::default());

    transport.fail(Endpoint::AnalyzeFirst, "connection refused");
    assert!(console.analyze_upload(&png(64, 48)).is_err());

    assert!(transport.sent_to(Endpoint::Detect).is_empty());
    assert_eq!(console.session().phase(), Phase::AwaitingFirst);
}

#[test]
fn unrecognized_analysis_answer_still_fetches_overlay() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = ClientConfig {
        overlay_dir: Some(dir.path().to_path_buf()),
        ..ClientConfig::default()
    };
    let transport = Arc::new(ScriptedTransport::new());
    let mut console = console_with(&transport, &cfg);

    transport.respond(Endpoint::AnalyzeFirst, r#"{"status": "MAYBE_LATER"}"#);
    transport.respond(
        Endpoint::Detect,
        r#"{"detections": [{"box": [4, 4, 40, 30], "class": "car"}]}"#,
    );
    let err = console
        .analyze_upload(&png(64, 48))
        .expect_err("unknown status");

    assert_eq!(err.kind(), ErrorKind::UnrecognizedDiscriminant);
    assert_eq!(transport.sent_to(Endpoint::Detect).len(), 1);
    assert!(dir.path().join("overlay_first.png").exists());
    assert_eq!(console.session().phase(), Phase::AwaitingFirst);
}

#[test]
fn overlay_png_is_written_when_configured() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = ClientConfig {
        overlay_dir: Some(dir.path().to_path_buf()),
        ..ClientConfig::default()
    };
    let transport = Arc::new(ScriptedTransport::new());
    let mut console = console_with(&transport, &cfg);

    transport.respond(Endpoint::AnalyzeFirst, FIRST_CLEAN);
    transport.respond(
        Endpoint::Detect,
        r#"{"detections": [{"box": [4, 4, 40, 30], "class": "car"}]}"#,
    );
    console.analyze_upload(&png(64, 48)).expect("analysis");

    let written = image::open(dir.path().join("overlay_first.png")).expect("overlay png");
    assert_eq!((written.width(), written.height()), (64, 48));
}

#[test]
fn execute_drives_a_full_cycle() {
    let dir = tempfile::tempdir().expect("temp dir");
    let photo = dir.path().join("wide.png");
    RgbImage::new(32, 32).save(&photo).expect("save photo");

    let transport = Arc::new(ScriptedTransport::new());
    let (tx, rx) = mpsc::channel();
    let mut console = console_with(&transport, &ClientConfig::default()).with_events(tx);

    transport.respond(Endpoint::AnalyzeFirst, FIRST_CLEAN);
    transport.respond(Endpoint::Detect, r#"{"detections": []}"#);
    transport.respond(Endpoint::RecordCleanObservation, r#"{"status": "success"}"#);

    let analyze = Command::parse(&format!("analyze {}", photo.display()))
        .expect("parse")
        .expect("command");
    assert_eq!(console.execute(analyze), Flow::Continue);
    assert_eq!(console.prompt(), "decide> ");
    assert_eq!(console.execute(Command::Confirm), Flow::Continue);
    assert_eq!(console.prompt(), "first> ");
    assert!(rx.try_recv().is_ok());
    assert_eq!(transport.sent_to(Endpoint::RecordCleanObservation).len(), 1);

    assert_eq!(console.execute(Command::Quit), Flow::Quit);
}

#[test]
fn missing_image_file_leaves_session_untouched() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut console = console_with(&transport, &ClientConfig::default());

    let flow = console.execute(Command::Analyze("/nonexistent/wide.jpg".into()));

    assert_eq!(flow, Flow::Continue);
    assert!(transport.sent().is_empty());
    assert_eq!(console.session().phase(), Phase::AwaitingFirst);
}

#[test]
fn retrain_waits_for_service_readiness() {
    let transport = Arc::new(ScriptedTransport::new());
    let console = console_with(&transport, &ClientConfig::default());

    transport.respond(
        Endpoint::LearningStats,
        r#"{"confirmed_images": 3, "rejected_first": 1, "rejected_zoom": 0, "ready_for_retraining": false}"#,
    );
    match console.retrain().expect("retrain attempt") {
        RetrainAttempt::NotReady(stats) => assert_eq!(stats.confirmed_images, 3),
        other => panic!("unexpected attempt {other:?}"),
    }
    assert!(transport.sent_to(Endpoint::Retrain).is_empty());

    transport.respond(
        Endpoint::LearningStats,
        r#"{"confirmed_images": 12, "ready_for_retraining": true}"#,
    );
    transport.respond(
        Endpoint::Retrain,
        r#"{"status": "SUCCESS", "message": "model updated", "improvement": 0.05, "old_map50": 0.61, "new_map50": 0.66}"#,
    );
    match console.retrain().expect("retrain attempt") {
        RetrainAttempt::Ran(outcome @ RetrainOutcome::Success { .. }) => {
            assert_eq!(outcome.to_string(), "model updated (improvement +5.0%)");
        }
        other => panic!("unexpected attempt {other:?}"),
    }
}

#[test]
fn poller_refreshes_after_disposition_event() {
    let transport = Arc::new(ScriptedTransport::new());
    for confirmed in [4, 5] {
        transport.respond(
            Endpoint::LearningStats,
            &format!(r#"{{"confirmed_images": {confirmed}}}"#),
        );
    }
    let (events_tx, events_rx) = mpsc::channel();
    let (updates_tx, updates_rx) = mpsc::channel();

    let handle = StatsPoller::new(transport.clone(), Duration::from_secs(3600))
        .with_events(events_rx)
        .spawn(move |stats| {
            let _ = updates_tx.send(stats.confirmed_images);
        });

    let first = updates_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("initial fetch");
    assert_eq!(first, 4);

    let mut console = console_with(&transport, &ClientConfig::default()).with_events(events_tx);
    transport.respond(Endpoint::RejectDetection, r#"{"status": "success", "count": 1}"#);
    console.reject();

    let second = updates_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("refresh after event");
    assert_eq!(second, 5);

    handle.stop().expect("stop poller");
}
