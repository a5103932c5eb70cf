//! End-to-end signaling over a real WebSocket with a mock media engine

mod harness;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use castrec_webrtc::{
    Capabilities, EngineConfig, MediaEngine, ServerMessage, SessionRegistry,
    SignalingLink, SignalingServerConfig, StreamLeg, WebSocketServerHandle,
    WebSocketSignalingServer,
};
use harness::*;

struct TestServer {
    handle: WebSocketServerHandle,
    registry: Arc<SessionRegistry>,
    media: Arc<MockMediaEngine>,
    _recordings: tempfile::TempDir,
}

async fn start_server(max_sessions: usize) -> TestServer {
    init_test_tracing();
    let recordings = tempfile::tempdir().unwrap();
    let media = MockMediaEngine::new();
    let dyn_media: Arc<dyn MediaEngine> = media.clone();
    let config = EngineConfig::default()
        .with_recordings_dir(recordings.path())
        .with_settle_delay(Duration::from_millis(100));
    let registry = Arc::new(
        SessionRegistry::new(
            dyn_media,
            Arc::new(Capabilities::recording_default()),
            config,
            max_sessions,
        )
        .unwrap(),
    );

    let server_config =
        SignalingServerConfig::default().with_bind_addr("127.0.0.1:0".parse().unwrap());
    let handle = WebSocketSignalingServer::new(server_config, Arc::clone(&registry))
        .unwrap()
        .start()
        .await
        .unwrap();

    TestServer {
        handle,
        registry,
        media,
        _recordings: recordings,
    }
}

async fn next_event(link: &SignalingLink) -> ServerMessage {
    timeout(EVENT_TIMEOUT, link.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("signaling link closed")
}

async fn wait_for_session_count(registry: &SessionRegistry, expected: usize) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while registry.session_count().await != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "session count never reached {}",
            expected
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_full_session_over_websocket() {
    let server = start_server(0).await;
    let link = SignalingLink::connect(&server.handle.url()).await.unwrap();

    let session_id = link.wait_until_session_ready().await.unwrap();
    assert!(matches!(
        next_event(&link).await,
        ServerMessage::SessionCreated { session_id: id } if id == session_id
    ));
    assert!(server.registry.has_session(&session_id).await);

    for (n, leg) in StreamLeg::ALL.into_iter().enumerate() {
        link.send_offer(leg, &offer_sdp(leg.as_str())).unwrap();
        let sent = link
            .send_candidate_line(leg, &candidate_line(n as u16 + 1))
            .unwrap();
        assert!(sent);
        // an empty end-of-candidates line is not forwarded
        assert!(!link.send_candidate_line(leg, "").unwrap());
        link.send_gathering_finished(leg).unwrap();
    }

    let mut answered = Vec::new();
    for _ in 0..2 {
        match next_event(&link).await {
            ServerMessage::ServerSdpInfo {
                stream_name,
                sdp_payload,
            } => {
                assert!(sdp_payload.starts_with(&format!("answer-for-{}", stream_name)));
                answered.push(stream_name);
            }
            other => panic!("expected SERVER_SDP_INFO, got {:?}", other),
        }
    }
    answered.sort_by_key(|leg| leg.as_str());
    assert_eq!(answered, vec![StreamLeg::Camera, StreamLeg::Screen]);

    link.start_recording().unwrap();
    let run_id = match next_event(&link).await {
        ServerMessage::StartedRecording { session_id: id, run_id } => {
            assert_eq!(id, session_id);
            run_id
        }
        other => panic!("expected STARTED_RECORDING, got {:?}", other),
    };

    link.stop_recording().unwrap();
    match next_event(&link).await {
        ServerMessage::StoppedRecording {
            run_id: stopped,
            generated_files,
            ..
        } => {
            assert_eq!(stopped, run_id);
            assert_eq!(generated_files.camera_files.len(), 1);
            assert_eq!(generated_files.screen_files.len(), 1);
        }
        other => panic!("expected STOPPED_RECORDING, got {:?}", other),
    }

    link.close().unwrap();
    wait_for_session_count(&server.registry, 0).await;
    assert_eq!(
        server
            .media
            .stats
            .transports_closed
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );

    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_open() {
    let server = start_server(0).await;
    let link = SignalingLink::connect(&server.handle.url()).await.unwrap();
    link.wait_until_session_ready().await.unwrap();
    next_event(&link).await;

    link.send_offer(StreamLeg::Camera, "not an sdp").unwrap();
    match next_event(&link).await {
        ServerMessage::Error {
            code, stream_name, ..
        } => {
            assert_eq!(code, "NEGOTIATION_ERROR");
            assert_eq!(stream_name.as_deref(), Some("camera"));
        }
        other => panic!("expected ERROR, got {:?}", other),
    }

    // the session survives and still negotiates
    for leg in StreamLeg::ALL {
        link.send_offer(leg, &offer_sdp(leg.as_str())).unwrap();
        link.send_gathering_finished(leg).unwrap();
    }
    for _ in 0..2 {
        assert!(matches!(
            next_event(&link).await,
            ServerMessage::ServerSdpInfo { .. }
        ));
    }

    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_identity_query_reaches_media_engine() {
    let server = start_server(0).await;
    let url = format!("{}/?identity=presenter-7", server.handle.url());
    let link = SignalingLink::connect(&url).await.unwrap();
    link.wait_until_session_ready().await.unwrap();

    for leg in StreamLeg::ALL {
        link.send_offer(leg, &offer_sdp(leg.as_str())).unwrap();
        link.send_gathering_finished(leg).unwrap();
    }
    for _ in 0..3 {
        next_event(&link).await;
    }

    let identities = server.media.stats.identities.lock().clone();
    assert_eq!(
        identities,
        vec![Some("presenter-7".to_string()), Some("presenter-7".to_string())]
    );

    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_session_limit_refuses_connection() {
    let server = start_server(1).await;

    let first = SignalingLink::connect(&server.handle.url()).await.unwrap();
    first.wait_until_session_ready().await.unwrap();

    let second = SignalingLink::connect(&server.handle.url()).await.unwrap();
    assert!(second.wait_until_session_ready().await.is_err());
    match next_event(&second).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, "SESSION_LIMIT"),
        other => panic!("expected ERROR, got {:?}", other),
    }
    assert_eq!(server.registry.session_count().await, 1);

    first.close().unwrap();
    wait_for_session_count(&server.registry, 0).await;
    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_tears_down_live_sessions() {
    let server = start_server(0).await;
    let link = SignalingLink::connect(&server.handle.url()).await.unwrap();
    link.wait_until_session_ready().await.unwrap();
    wait_for_session_count(&server.registry, 1).await;

    let registry = Arc::clone(&server.registry);
    server.handle.shutdown().await;
    assert_eq!(registry.session_count().await, 0);
}
