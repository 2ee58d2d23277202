// Integration tests for the live session lifecycle
//
// Sessions run against the in-memory devices and a fake transport, so every
// resource acquisition and release can be counted.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    audio_message, audio_message_with_data, eventually, interrupted_audio_message,
    interrupted_message, turn_complete_message, FakeTransport, Observed, OpenBehavior,
    RecordingObserver,
};
use duplex_voice::audio::DeviceFailure;
use duplex_voice::transport::TransportEvent;
use duplex_voice::{
    codec, DeviceError, LiveSession, MemoryDevices, SessionConfig, SessionError, SessionState,
    TransportError,
};

struct Harness {
    session: Arc<LiveSession>,
    transport: FakeTransport,
    devices: MemoryDevices,
    observer: Arc<RecordingObserver>,
}

fn harness_with(transport: FakeTransport) -> Harness {
    let devices = MemoryDevices::new();
    let observer = RecordingObserver::new();
    let session = LiveSession::new(
        Arc::new(transport.clone()),
        Arc::new(devices.clone()),
        observer.clone(),
    );

    Harness {
        session: Arc::new(session),
        transport,
        devices,
        observer,
    }
}

fn harness() -> Harness {
    harness_with(FakeTransport::new())
}

async fn streaming() -> Harness {
    let h = harness();
    h.session.start(SessionConfig::default()).await.unwrap();
    assert_eq!(h.session.state(), SessionState::Streaming);
    h
}

fn assert_released_once(h: &Harness) {
    assert_eq!(h.devices.input_stops(), 1, "capture released once");
    assert_eq!(h.devices.output_closes(), 1, "playback released once");
}

#[tokio::test]
async fn test_start_streams() {
    let h = streaming().await;

    assert_eq!(h.devices.inputs_opened(), 1);
    assert_eq!(h.devices.outputs_opened(), 1);
    assert_eq!(h.transport.opens(), 1);
    assert!(h.devices.is_capturing());
    assert_eq!(
        h.observer.states(),
        vec![SessionState::Connecting, SessionState::Streaming]
    );
    assert_eq!(h.observer.errors(), 0);
}

#[tokio::test]
async fn test_instructions_passed_to_transport() {
    let h = harness();

    h.session
        .start(SessionConfig::with_instructions("Answer in one sentence."))
        .await
        .unwrap();

    assert_eq!(
        h.transport.last_instructions().as_deref(),
        Some("Answer in one sentence.")
    );
}

#[tokio::test]
async fn test_microphone_denied_never_opens_transport() {
    let h = harness();
    h.devices.fail_input(DeviceFailure::PermissionDenied);

    let result = h.session.start(SessionConfig::default()).await;

    assert!(matches!(
        result,
        Err(SessionError::DeviceAcquisition(DeviceError::PermissionDenied(_)))
    ));
    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.transport.opens(), 0);
    assert_eq!(h.devices.outputs_opened(), 0);
    assert_eq!(h.observer.errors(), 1);
}

#[tokio::test]
async fn test_speaker_failure_releases_microphone() {
    let h = harness();
    h.devices.fail_output(DeviceFailure::NotFound);

    let result = h.session.start(SessionConfig::default()).await;

    assert!(matches!(result, Err(SessionError::DeviceAcquisition(_))));
    assert_eq!(h.devices.input_stops(), 1);
    assert_eq!(h.transport.opens(), 0);
    assert_eq!(h.observer.errors(), 1);
}

#[tokio::test]
async fn test_transport_open_failure() {
    let h = harness_with(FakeTransport::with_behavior(OpenBehavior::Fail));

    let result = h.session.start(SessionConfig::default()).await;

    assert!(matches!(
        result,
        Err(SessionError::TransportOpen(TransportError::ConnectionFailed(_)))
    ));
    assert_eq!(h.session.state(), SessionState::Error);
    assert_released_once(&h);
    assert_eq!(h.observer.errors(), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = streaming().await;

    let result = h.session.start(SessionConfig::default()).await;

    assert!(matches!(
        result,
        Err(SessionError::InvalidState {
            state: SessionState::Streaming,
            ..
        })
    ));
    assert_eq!(h.transport.opens(), 1);
}

#[tokio::test]
async fn test_stop_before_start() {
    let h = harness();

    h.session.stop().await;

    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.devices.inputs_opened(), 0);
    assert!(h.session.start(SessionConfig::default()).await.is_err());
}

#[tokio::test]
async fn test_stop_releases_everything_once() {
    let h = streaming().await;

    h.session.stop().await;
    h.session.stop().await;

    assert_eq!(h.session.state(), SessionState::Closed);
    assert_released_once(&h);
    assert_eq!(h.transport.closes(), 1);
    assert_eq!(h.observer.closes(), 1);
    assert_eq!(h.observer.errors(), 0);
    assert_eq!(
        h.observer.states(),
        vec![
            SessionState::Connecting,
            SessionState::Streaming,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
}

#[tokio::test]
async fn test_stop_while_connecting() {
    let h = harness_with(FakeTransport::with_behavior(OpenBehavior::Hang));

    let session = Arc::clone(&h.session);
    let start = tokio::spawn(async move { session.start(SessionConfig::default()).await });

    let transport = h.transport.clone();
    eventually("transport open", || transport.opens() == 1).await;
    assert_eq!(h.session.state(), SessionState::Connecting);

    h.session.stop().await;

    let result = start.await.unwrap();
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_released_once(&h);
    assert_eq!(h.observer.closes(), 1);
    assert_eq!(h.observer.errors(), 0);
}

#[tokio::test]
async fn test_abandoned_start_releases_devices() {
    let h = harness_with(FakeTransport::with_behavior(OpenBehavior::Hang));

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        h.session.start(SessionConfig::default()),
    )
    .await;

    assert!(result.is_err(), "open never resolves");
    assert_eq!(h.transport.opens(), 1);
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_released_once(&h);
    assert_eq!(h.observer.closes(), 1);

    tokio::time::timeout(Duration::from_secs(1), h.session.stop())
        .await
        .expect("stop returns after an abandoned start");
    assert_released_once(&h);
    assert_eq!(h.observer.closes(), 1);
}

#[tokio::test]
async fn test_remote_close_tears_down() {
    let h = streaming().await;

    h.transport
        .emit(TransportEvent::Closed {
            reason: Some("bye".to_string()),
        })
        .await;

    assert_eq!(h.session.closed().await, SessionState::Closed);
    assert_released_once(&h);
    assert_eq!(h.transport.closes(), 1);
    assert_eq!(h.observer.closes(), 1);

    // Nothing left to release
    h.session.stop().await;
    assert_released_once(&h);
    assert_eq!(h.transport.closes(), 1);
    assert_eq!(h.observer.closes(), 1);
}

#[tokio::test]
async fn test_runtime_error_ends_session() {
    let h = streaming().await;

    h.transport
        .emit(TransportEvent::Error(TransportError::WebSocket(
            "connection reset".to_string(),
        )))
        .await;

    assert_eq!(h.session.closed().await, SessionState::Error);
    assert_released_once(&h);
    assert_eq!(h.observer.errors(), 1);
    assert_eq!(h.observer.closes(), 1);

    let events = h.observer.events();
    let error_at = events.iter().position(|e| matches!(e, Observed::Error(_)));
    let close_at = events.iter().position(|e| *e == Observed::Close);
    assert!(error_at < close_at, "error is reported before close");
}

#[tokio::test]
async fn test_captured_frames_are_sent_in_order() {
    let h = streaming().await;

    for i in 1..=3 {
        assert!(h.devices.push_frame(vec![i as f32 * 0.1; 256]));
    }

    let transport = h.transport.clone();
    eventually("three frames sent", || transport.sent().len() == 3).await;

    let firsts: Vec<f32> = h
        .transport
        .sent()
        .iter()
        .map(|blob| codec::decode(&blob.data).unwrap()[0])
        .collect();
    assert!(firsts[0] < firsts[1] && firsts[1] < firsts[2]);
    assert_eq!(h.session.stats().frames_sent, 3);
}

#[tokio::test]
async fn test_frames_dropped_while_transport_not_open() {
    let h = streaming().await;

    h.transport.set_open(false);
    h.devices.push_frame(vec![0.0; 256]);
    h.devices.push_frame(vec![0.0; 256]);

    let session = Arc::clone(&h.session);
    eventually("frames dropped", || session.stats().frames_dropped == 2).await;
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.session.state(), SessionState::Streaming);

    h.transport.set_open(true);
    h.devices.push_frame(vec![0.0; 256]);

    let transport = h.transport.clone();
    eventually("frame sent after reopen", || transport.sent().len() == 1).await;
}

#[tokio::test]
async fn test_inbound_audio_is_scheduled_gaplessly() {
    let h = streaming().await;

    h.transport.emit_message(audio_message(24_000)).await;
    h.transport.emit_message(audio_message(12_000)).await;

    let devices = h.devices.clone();
    eventually("two chunks started", || devices.started_sources().len() == 2).await;

    let started = h.devices.started_sources();
    assert_eq!(started[0].start_at, 0.0);
    assert!((started[1].start_at - 1.0).abs() < 1e-9);
    assert_eq!(h.observer.messages(), 2);
    assert_eq!(h.session.stats().chunks_scheduled, 2);
}

#[tokio::test]
async fn test_interruption_flushes_playback() {
    let h = streaming().await;
    let devices = h.devices.clone();

    h.transport.emit_message(audio_message(48_000)).await;
    eventually("first chunk started", || devices.started_sources().len() == 1).await;

    devices.set_now(0.5);
    h.transport.emit_message(interrupted_message()).await;
    h.transport.emit_message(audio_message(24_000)).await;
    eventually("second chunk started", || devices.started_sources().len() == 2).await;

    assert_eq!(h.devices.stopped_sources(), vec![0]);
    let next = &h.devices.started_sources()[1];
    assert!((next.start_at - 0.5).abs() < 1e-9, "got {}", next.start_at);

    let stats = h.session.stats();
    assert_eq!(stats.interruptions, 1);
    assert_eq!(h.observer.speaking_changes(), vec![true, false, true]);
}

#[tokio::test]
async fn test_undecodable_chunk_is_dropped() {
    let h = streaming().await;

    h.transport
        .emit_message(audio_message_with_data("not audio!!".to_string()))
        .await;
    h.transport.emit_message(audio_message(2_400)).await;

    let devices = h.devices.clone();
    eventually("valid chunk started", || devices.started_sources().len() == 1).await;

    let stats = h.session.stats();
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(stats.chunks_scheduled, 1);
    assert_eq!(h.session.state(), SessionState::Streaming);
    assert_eq!(h.observer.errors(), 0);
}

#[tokio::test]
async fn test_undecodable_chunk_keeps_cursor() {
    let h = streaming().await;
    let devices = h.devices.clone();

    h.transport.emit_message(audio_message(24_000)).await;
    eventually("first chunk started", || devices.started_sources().len() == 1).await;

    h.transport
        .emit_message(audio_message_with_data("@@@".to_string()))
        .await;
    h.transport.emit_message(audio_message(12_000)).await;
    eventually("third chunk started", || devices.started_sources().len() == 2).await;

    let started = h.devices.started_sources();
    assert_eq!(started[1].id, 1);
    assert!(
        (started[1].start_at - (started[0].start_at + started[0].duration)).abs() < 1e-9,
        "got {}",
        started[1].start_at
    );
    assert_eq!(h.session.stats().chunks_dropped, 1);
    assert_eq!(h.session.stats().chunks_scheduled, 2);
}

#[tokio::test]
async fn test_interrupted_message_with_audio() {
    let h = streaming().await;
    let devices = h.devices.clone();

    h.transport.emit_message(audio_message(48_000)).await;
    eventually("first chunk started", || devices.started_sources().len() == 1).await;

    devices.set_now(0.25);
    h.transport.emit_message(interrupted_audio_message(2_400)).await;
    eventually("new chunk started", || devices.started_sources().len() == 2).await;

    // The flush happens before the message's own audio is scheduled
    assert_eq!(h.devices.stopped_sources(), vec![0]);
    let next = &h.devices.started_sources()[1];
    assert!((next.start_at - 0.25).abs() < 1e-9, "got {}", next.start_at);
    assert!(h.session.is_speaking());
    assert_eq!(h.observer.speaking_changes(), vec![true, false, true]);
    assert_eq!(h.session.stats().interruptions, 1);
    assert_eq!(h.observer.messages(), 2);
}

#[tokio::test]
async fn test_turn_complete_waits_for_playback_to_drain() {
    let h = streaming().await;
    let session = Arc::clone(&h.session);

    h.transport.emit_message(audio_message(2_400)).await;
    h.transport.emit_message(turn_complete_message()).await;

    let observer = Arc::clone(&h.observer);
    eventually("turn complete", || observer.turn_completes() == 1).await;
    assert!(h.session.is_speaking(), "audio still playing");

    h.devices.finish(0);
    eventually("speaking ends", || !session.is_speaking()).await;

    assert_eq!(h.observer.speaking_changes(), vec![true, false]);
    assert_eq!(h.session.stats().turns_completed, 1);
}

#[tokio::test]
async fn test_turn_complete_with_nothing_playing() {
    let h = streaming().await;

    h.transport.emit_message(turn_complete_message()).await;

    let observer = Arc::clone(&h.observer);
    eventually("turn complete", || observer.turn_completes() == 1).await;
    assert!(!h.session.is_speaking());
    assert!(h.observer.speaking_changes().is_empty());
}

#[tokio::test]
async fn test_stop_silences_speaker() {
    let h = streaming().await;

    h.transport.emit_message(audio_message(24_000)).await;
    let session = Arc::clone(&h.session);
    eventually("speaking", || session.is_speaking()).await;

    h.session.stop().await;

    assert!(!h.session.is_speaking());
    assert_eq!(h.devices.stopped_sources(), vec![0]);
    assert_eq!(h.observer.speaking_changes(), vec![true, false]);
}

#[tokio::test]
async fn test_stats_report_session() {
    let h = harness();
    let config = SessionConfig {
        session_id: "session-test".to_string(),
        instructions: None,
    };

    h.session.start(config).await.unwrap();
    h.session.stop().await;

    let stats = h.session.stats();
    assert_eq!(stats.session_id, "session-test");
    assert_eq!(stats.state, SessionState::Closed);
    assert!(stats.started_at.is_some());
    assert!(stats.duration_secs >= 0.0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["state"], "closed");
}
