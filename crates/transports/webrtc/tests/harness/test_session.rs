//! ServerSession driven with raw JSON frames

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use castrec_webrtc::{
    Capabilities, EngineConfig, EngineSnapshot, MediaEngine, ServerMessage, ServerSession,
    SessionRegistry, StreamLeg,
};

use super::{
    candidate_json, gathering_finished_json, offer_sdp, sdp_info_json, HarnessError,
    HarnessResult, MockMediaEngine, EVENT_TIMEOUT, START_JSON,
};

pub struct TestSession {
    session: Option<ServerSession>,
    pub rx: mpsc::Receiver<ServerMessage>,
    pub registry: Arc<SessionRegistry>,
    pub media: Arc<MockMediaEngine>,
    pub session_id: String,
    pub recordings_dir: tempfile::TempDir,
}

impl TestSession {
    /// Session with a mock engine and a 1s settle delay
    pub async fn open() -> Self {
        Self::open_with(MockMediaEngine::new(), Duration::from_secs(1), None).await
    }

    pub async fn open_with(
        media: Arc<MockMediaEngine>,
        settle: Duration,
        identity: Option<String>,
    ) -> Self {
        let recordings_dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::default()
            .with_recordings_dir(recordings_dir.path())
            .with_settle_delay(settle);
        let dyn_media: Arc<dyn MediaEngine> = media.clone();
        let registry = Arc::new(
            SessionRegistry::new(
                dyn_media,
                Arc::new(Capabilities::recording_default()),
                config,
                0,
            )
            .expect("registry"),
        );

        let (tx, mut rx) = mpsc::channel(64);
        let session = ServerSession::open(Arc::clone(&registry), identity, tx)
            .await
            .expect("open session");

        let session_id = match rx.recv().await {
            Some(ServerMessage::SessionCreated { session_id }) => session_id,
            other => panic!("expected SESSION_CREATED, got {:?}", other),
        };
        assert_eq!(session_id, session.session_id());

        Self {
            session: Some(session),
            rx,
            registry,
            media,
            session_id,
            recordings_dir,
        }
    }

    pub fn server(&self) -> &ServerSession {
        self.session.as_ref().expect("session already closed")
    }

    pub async fn send(&self, json: &str) {
        self.server().handle_text(json).await;
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.server().engine().snapshot().await
    }

    /// Everything emitted so far, without waiting
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    pub async fn expect_message(&mut self) -> HarnessResult<ServerMessage> {
        match timeout(EVENT_TIMEOUT, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(HarnessError::ChannelClosed),
            Err(_) => Err(HarnessError::Timeout("no server message".to_string())),
        }
    }

    /// Offer, one candidate and gathering-finished for both legs; returns
    /// the two answers
    pub async fn negotiate(&mut self) -> HarnessResult<Vec<ServerMessage>> {
        for (i, leg) in StreamLeg::ALL.iter().enumerate() {
            let name = leg.as_str();
            self.send(&sdp_info_json(name, &offer_sdp(name))).await;
            self.send(&candidate_json(name, i as u16 + 1)).await;
        }
        for leg in StreamLeg::ALL {
            self.send(&gathering_finished_json(leg.as_str())).await;
        }

        let answers = self.drain();
        let all_answers = answers
            .iter()
            .all(|m| matches!(m, ServerMessage::ServerSdpInfo { .. }));
        if answers.len() != 2 || !all_answers {
            return Err(HarnessError::UnexpectedMessage(format!("{:?}", answers)));
        }
        Ok(answers)
    }

    /// Start a run and return its id
    pub async fn start(&mut self) -> HarnessResult<String> {
        self.send(START_JSON).await;
        match self.expect_message().await? {
            ServerMessage::StartedRecording { session_id, run_id } => {
                assert_eq!(session_id, self.session_id);
                Ok(run_id)
            }
            other => Err(HarnessError::UnexpectedMessage(format!("{:?}", other))),
        }
    }

    /// Simulate the client dropping the connection
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}
