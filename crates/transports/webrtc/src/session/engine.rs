//! Per-session negotiation and recording state machine
//!
//! Each leg moves `Pending → Offered → GatheringIce → Ready`. Once both
//! legs are Ready the engine creates both transports and emits both
//! answers back to back; neither answer is sent on its own. Recording runs
//! are layered on top of the negotiated legs.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::run::RecordingRun;
use crate::config::EngineConfig;
use crate::leg::{LegMap, StreamLeg};
use crate::media::{
    Capabilities, FlushHandle, IncomingStream, MediaEngine, MediaTransport, Recorder,
    SessionContext,
};
use crate::signaling::protocol::{CandidateData, GeneratedFiles, ServerMessage};
use crate::signaling::sdp::Offer;
use crate::{Error, Result};

/// Negotiation progress of a single leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegPhase {
    /// No offer yet
    Pending,
    /// Offer stored, no candidates
    Offered,
    /// Offer stored, candidates arriving
    GatheringIce,
    /// Client finished gathering
    Ready,
}

/// Composite session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// At least one leg is not Ready
    Negotiating,
    /// Both answers sent, no run yet
    Negotiated,
    /// A run is active
    Recording,
    /// Last run stopped; another may start
    Idle,
    /// Media Engine failed; the session is unusable
    Failed,
    /// Client disconnected
    Closed,
}

/// Point-in-time view of an engine
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub phase: SessionPhase,
    pub legs: LegMap<LegPhase>,
    pub candidates: LegMap<usize>,
    pub active_run: Option<RecordingRun>,
    pub completed_runs: usize,
}

#[derive(Default)]
struct LegState {
    offer: Option<Offer>,
    candidates: Vec<CandidateData>,
    gathering_complete: bool,
    transport: Option<Box<dyn MediaTransport>>,
    incoming: Option<Box<dyn IncomingStream>>,
    recorder: Option<Box<dyn Recorder>>,
}

impl LegState {
    fn phase(&self) -> LegPhase {
        match (&self.offer, self.gathering_complete) {
            (None, _) => LegPhase::Pending,
            (Some(_), true) => LegPhase::Ready,
            (Some(_), false) if self.candidates.is_empty() => LegPhase::Offered,
            (Some(_), false) => LegPhase::GatheringIce,
        }
    }
}

#[derive(Default)]
struct EngineState {
    legs: LegMap<LegState>,
    answered: bool,
    failed: bool,
    run: Option<RecordingRun>,
    completed_runs: usize,
}

/// Coordinates both legs of one session against a Media Engine
pub struct NegotiationEngine {
    ctx: SessionContext,
    media: Arc<dyn MediaEngine>,
    capabilities: Arc<Capabilities>,
    config: EngineConfig,
    outbound: mpsc::Sender<ServerMessage>,
    state: Mutex<EngineState>,
    torn_down: Arc<AtomicBool>,
}

impl NegotiationEngine {
    pub fn new(
        ctx: SessionContext,
        media: Arc<dyn MediaEngine>,
        capabilities: Arc<Capabilities>,
        config: EngineConfig,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            ctx,
            media,
            capabilities,
            config,
            outbound,
            state: Mutex::new(EngineState::default()),
            torn_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.ctx.session_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock().await;
        let phase = if self.is_torn_down() {
            SessionPhase::Closed
        } else if state.failed {
            SessionPhase::Failed
        } else if state.run.is_some() {
            SessionPhase::Recording
        } else if state.answered && state.completed_runs > 0 {
            SessionPhase::Idle
        } else if state.answered {
            SessionPhase::Negotiated
        } else {
            SessionPhase::Negotiating
        };
        EngineSnapshot {
            phase,
            legs: LegMap::from_fn(|leg| state.legs[leg].phase()),
            candidates: LegMap::from_fn(|leg| state.legs[leg].candidates.len()),
            active_run: state.run.clone(),
            completed_runs: state.completed_runs,
        }
    }

    /// Store the offer for `leg`.
    ///
    /// A malformed offer is rejected with [`Error::NegotiationError`] and
    /// leaves the leg untouched. A replacement offer before answers are
    /// produced discards the leg's candidates and gathering flag.
    pub async fn on_sdp_offer(&self, leg: StreamLeg, sdp: &str) -> Result<()> {
        let offer = Offer::parse(sdp)
            .map_err(|e| Error::NegotiationError(format!("{} offer rejected: {}", leg, e)))?;

        let mut state = self.state.lock().await;
        if let Err(e) = self.check_negotiating(&state) {
            debug!(session_id = %self.ctx.session_id, leg = %leg, "offer ignored: {}", e);
            return Ok(());
        }

        let slot = &mut state.legs[leg];
        if slot.offer.is_some() {
            info!(session_id = %self.ctx.session_id, leg = %leg, "replacing offer");
            slot.candidates.clear();
            slot.gathering_complete = false;
        }
        debug!(
            session_id = %self.ctx.session_id,
            leg = %leg,
            "stored offer with {} media sections",
            offer.media().len()
        );
        slot.offer = Some(offer);
        Ok(())
    }

    /// Append a remote candidate to the leg's buffer. Order is kept and
    /// duplicates are not removed.
    pub async fn on_ice_candidate(&self, leg: StreamLeg, candidate: CandidateData) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Err(e) = self.check_negotiating(&state) {
            debug!(session_id = %self.ctx.session_id, leg = %leg, "candidate ignored: {}", e);
            return Ok(());
        }
        let slot = &mut state.legs[leg];
        slot.candidates.push(candidate);
        debug!(
            session_id = %self.ctx.session_id,
            leg = %leg,
            "buffered candidate #{}",
            slot.candidates.len()
        );
        Ok(())
    }

    /// Mark `leg` Ready; when its sibling is Ready too, produce and emit
    /// both answers.
    pub async fn on_ice_gathering_finished(&self, leg: StreamLeg) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Err(e) = self.check_negotiating(&state) {
            debug!(session_id = %self.ctx.session_id, leg = %leg, "gathering-finished ignored: {}", e);
            return Ok(());
        }

        let slot = &mut state.legs[leg];
        if slot.offer.is_none() {
            warn!(session_id = %self.ctx.session_id, leg = %leg, "gathering finished before any offer, ignoring");
            return Ok(());
        }
        if slot.gathering_complete {
            debug!(session_id = %self.ctx.session_id, leg = %leg, "leg already ready");
            return Ok(());
        }
        slot.gathering_complete = true;
        info!(
            session_id = %self.ctx.session_id,
            leg = %leg,
            "leg ready with {} candidates",
            slot.candidates.len()
        );

        if !state.legs.all(|l| l.gathering_complete) {
            return Ok(());
        }

        self.answer_both(&mut state).await
    }

    async fn answer_both(&self, state: &mut EngineState) -> Result<()> {
        let offers = LegMap::try_from_pairs(
            state
                .legs
                .iter()
                .filter_map(|(leg, slot)| slot.offer.as_ref().map(|offer| (leg, offer))),
        )
        .map_err(|e| Error::ResourceError(format!("cannot answer without both offers: {}", e)))?;

        let mut transports: Vec<(StreamLeg, Box<dyn MediaTransport>)> = Vec::with_capacity(2);
        for leg in StreamLeg::ALL {
            match self
                .media
                .create_transport(&self.ctx, leg, offers[leg], &state.legs[leg].candidates, &self.capabilities)
                .await
            {
                Ok(transport) => transports.push((leg, transport)),
                Err(e) => {
                    warn!(session_id = %self.ctx.session_id, leg = %leg, "transport creation failed: {}", e);
                    for (created_leg, transport) in transports {
                        if let Err(e) = transport.close().await {
                            warn!(session_id = %self.ctx.session_id, leg = %created_leg, "failed to release transport: {}", e);
                        }
                    }
                    if !e.is_fatal_to_session() {
                        // leg stays open for a replacement offer
                        return Err(e);
                    }
                    state.failed = true;
                    return Err(Error::ResourceError(format!(
                        "transport creation failed for {}: {}",
                        leg, e
                    )));
                }
            }
        }

        let mut answers = Vec::with_capacity(2);
        for (leg, transport) in transports {
            answers.push(ServerMessage::ServerSdpInfo {
                stream_name: leg,
                sdp_payload: transport.answer_sdp().to_string(),
            });
            state.legs[leg].transport = Some(transport);
        }
        state.answered = true;

        info!(session_id = %self.ctx.session_id, "both legs negotiated, sending answers");
        for answer in answers {
            self.emit(answer).await;
        }
        Ok(())
    }

    /// Begin a run. Silently ignored unless negotiated and idle.
    pub async fn on_recording_start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match self.start_run(&mut state).await {
            Err(e) if e.is_silent() => {
                debug!(session_id = %self.ctx.session_id, "start ignored: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    async fn start_run(&self, state: &mut EngineState) -> Result<()> {
        self.check_usable(state)?;
        if !state.answered {
            return Err(Error::LifecycleError("negotiation incomplete".to_string()));
        }
        if let Some(run) = &state.run {
            return Err(Error::LifecycleError(format!(
                "run {} already active",
                run.run_id()
            )));
        }

        let run = RecordingRun::begin(
            &self.config.recordings_dir,
            &self.ctx.session_id,
            &self.config.file_extension,
        );

        for leg in StreamLeg::ALL {
            if let Err(e) = self.start_leg(state, leg, &run).await {
                warn!(session_id = %self.ctx.session_id, leg = %leg, run_id = %run.run_id(), "recorder setup failed: {}", e);
                self.stop_recorders(state).await;
                if !e.is_fatal_to_session() {
                    return Err(e);
                }
                state.failed = true;
                return Err(Error::ResourceError(format!(
                    "recorder setup failed for {}: {}",
                    leg, e
                )));
            }
        }

        info!(session_id = %self.ctx.session_id, run_id = %run.run_id(), "recording started");
        let started = ServerMessage::StartedRecording {
            session_id: self.ctx.session_id.clone(),
            run_id: run.run_id().to_string(),
        };
        state.run = Some(run);
        self.emit(started).await;
        Ok(())
    }

    async fn start_leg(&self, state: &mut EngineState, leg: StreamLeg, run: &RecordingRun) -> Result<()> {
        let slot = &mut state.legs[leg];

        if slot.incoming.is_none() {
            let transport = slot
                .transport
                .as_ref()
                .ok_or_else(|| Error::ResourceError(format!("no transport for {}", leg)))?;
            slot.incoming = Some(transport.create_incoming_stream().await?);
            debug!(session_id = %self.ctx.session_id, leg = %leg, "incoming stream created");
        }

        let incoming = slot
            .incoming
            .as_ref()
            .ok_or_else(|| Error::ResourceError(format!("no incoming stream for {}", leg)))?;
        let mut recorder = incoming.create_recorder(&run.files()[leg]).await?;
        recorder.start().await?;
        slot.recorder = Some(recorder);
        Ok(())
    }

    /// Stop the active run. The manifest is announced after the flush
    /// handles resolve or the settle delay elapses, whichever is first.
    pub async fn on_recording_stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(run) = state.run.take() else {
            debug!(session_id = %self.ctx.session_id, "stop ignored: no active run");
            return Ok(());
        };
        state.completed_runs += 1;

        let (handles, complete) = self.stop_recorders(&mut state).await;
        drop(state);

        info!(session_id = %self.ctx.session_id, run_id = %run.run_id(), "recording stopped, settling");

        let settle = self.config.settle_delay();
        let torn_down = Arc::clone(&self.torn_down);
        let outbound = self.outbound.clone();
        let session_id = self.ctx.session_id.clone();

        tokio::spawn(async move {
            if complete && !handles.is_empty() {
                if tokio::time::timeout(settle, join_all(handles)).await.is_err() {
                    warn!(session_id = %session_id, run_id = %run.run_id(), "recorders did not flush within settle delay");
                }
            } else {
                tokio::time::sleep(settle).await;
            }

            if torn_down.load(Ordering::SeqCst) {
                debug!(session_id = %session_id, run_id = %run.run_id(), "session closed during settle, not announcing");
                return;
            }

            let stopped = ServerMessage::StoppedRecording {
                session_id: session_id.clone(),
                run_id: run.run_id().to_string(),
                generated_files: GeneratedFiles::from_manifest(run.files()),
            };
            if outbound.send(stopped).await.is_err() {
                debug!(session_id = %session_id, "outbound channel closed before manifest");
            }
        });

        Ok(())
    }

    /// Stop every recorder, continuing past failures. Returns the flush
    /// handles and whether every leg produced one.
    async fn stop_recorders(&self, state: &mut EngineState) -> (Vec<FlushHandle>, bool) {
        let mut handles = Vec::new();
        let mut complete = true;

        for (leg, slot) in state.legs.iter_mut() {
            let Some(mut recorder) = slot.recorder.take() else {
                continue;
            };
            match recorder.stop().await {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => complete = false,
                Err(e) => {
                    warn!(session_id = %self.ctx.session_id, leg = %leg, "failed to stop recorder: {}", e);
                    complete = false;
                }
            }
        }

        (handles, complete)
    }

    /// Tear down the session: force-stop any run without announcing it and
    /// release every leg's resources. Safe to call more than once.
    pub async fn on_client_disconnected(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock().await;
        if let Some(run) = state.run.take() {
            info!(session_id = %self.ctx.session_id, run_id = %run.run_id(), "stopping run on disconnect");
            // flushes are not awaited on teardown
            self.stop_recorders(&mut state).await;
        }

        for (leg, slot) in state.legs.iter_mut() {
            if let Some(incoming) = slot.incoming.take() {
                if let Err(e) = incoming.release().await {
                    warn!(session_id = %self.ctx.session_id, leg = %leg, "failed to release incoming stream: {}", e);
                }
            }
            if let Some(transport) = slot.transport.take() {
                if let Err(e) = transport.close().await {
                    warn!(session_id = %self.ctx.session_id, leg = %leg, "failed to close transport: {}", e);
                }
            }
        }

        info!(session_id = %self.ctx.session_id, "session torn down");
    }

    fn check_usable(&self, state: &EngineState) -> Result<()> {
        if self.is_torn_down() {
            return Err(Error::LifecycleError("session closed".to_string()));
        }
        if state.failed {
            return Err(Error::LifecycleError("session failed".to_string()));
        }
        Ok(())
    }

    fn check_negotiating(&self, state: &EngineState) -> Result<()> {
        self.check_usable(state)?;
        if state.answered {
            return Err(Error::LifecycleError("answers already sent".to_string()));
        }
        Ok(())
    }

    async fn emit(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(session_id = %self.ctx.session_id, "outbound channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 98\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:98 VP9/90000\r\n";

    #[derive(Default)]
    struct CountingMedia {
        transports: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MediaEngine for CountingMedia {
        async fn create_transport(
            &self,
            _ctx: &SessionContext,
            leg: StreamLeg,
            _offer: &Offer,
            _candidates: &[CandidateData],
            _capabilities: &Capabilities,
        ) -> Result<Box<dyn MediaTransport>> {
            self.transports.fetch_add(1, Ordering::SeqCst);
            Err(Error::ResourceError(format!("no media for {}", leg)))
        }
    }

    #[tokio::test]
    async fn test_answer_requires_both_offers() {
        let media = Arc::new(CountingMedia::default());
        let (tx, mut rx) = mpsc::channel(8);
        let engine = NegotiationEngine::new(
            SessionContext::new("s1".to_string()),
            media.clone(),
            Arc::new(Capabilities::recording_default()),
            EngineConfig::default(),
            tx,
        );

        let mut state = engine.state.lock().await;
        state.legs[StreamLeg::Camera].offer = Some(Offer::parse(OFFER).unwrap());
        for leg in StreamLeg::ALL {
            state.legs[leg].gathering_complete = true;
        }

        let result = engine.answer_both(&mut state).await;
        assert!(matches!(result, Err(Error::ResourceError(_))));
        assert!(!state.answered);
        assert!(!state.failed);
        assert_eq!(media.transports.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }
}
