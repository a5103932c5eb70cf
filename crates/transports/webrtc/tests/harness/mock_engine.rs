//! In-memory Media Engine

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use castrec_webrtc::signaling::sdp::Offer;
use castrec_webrtc::{
    CandidateData, Capabilities, Error, FlushHandle, IncomingStream, LegMap, MediaEngine,
    MediaTransport, Recorder, Result, SessionContext, StreamLeg,
};

/// How mock recorders report completion on stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Return a handle that is already resolved
    Immediate,
    /// Return no handle; the engine falls back to the settle delay
    NoSignal,
    /// Return a handle that never resolves
    Never,
}

/// Counters shared by every object the mock hands out
#[derive(Default)]
pub struct MockStats {
    pub transports_created: LegMap<AtomicUsize>,
    pub transports_closed: AtomicUsize,
    pub streams_created: LegMap<AtomicUsize>,
    pub streams_released: AtomicUsize,
    pub recorders_started: LegMap<AtomicUsize>,
    pub recorders_stopped: LegMap<AtomicUsize>,
    pub recorder_paths: Mutex<Vec<PathBuf>>,
    pub candidates_seen: Mutex<Vec<(StreamLeg, Vec<CandidateData>)>>,
    pub identities: Mutex<Vec<Option<String>>>,
    pending_flushes: Mutex<Vec<oneshot::Sender<()>>>,
}

impl MockStats {
    pub fn transports(&self, leg: StreamLeg) -> usize {
        self.transports_created[leg].load(Ordering::SeqCst)
    }

    pub fn streams(&self, leg: StreamLeg) -> usize {
        self.streams_created[leg].load(Ordering::SeqCst)
    }

    pub fn started(&self, leg: StreamLeg) -> usize {
        self.recorders_started[leg].load(Ordering::SeqCst)
    }

    pub fn stopped(&self, leg: StreamLeg) -> usize {
        self.recorders_stopped[leg].load(Ordering::SeqCst)
    }

    pub fn total_started(&self) -> usize {
        StreamLeg::ALL.iter().map(|leg| self.started(*leg)).sum()
    }
}

#[derive(Default)]
struct Knobs {
    fail_transport: Mutex<Option<StreamLeg>>,
    reject_offer: Mutex<Option<StreamLeg>>,
    fail_recorder_start: Mutex<Option<StreamLeg>>,
    fail_recorder_stop: Mutex<Option<StreamLeg>>,
    flush_mode: Mutex<Option<FlushMode>>,
}

impl Knobs {
    fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            fail_start: *self.fail_recorder_start.lock(),
            fail_stop: *self.fail_recorder_stop.lock(),
            flush_mode: self.flush_mode.lock().unwrap_or(FlushMode::NoSignal),
        }
    }
}

#[derive(Clone, Copy)]
struct RecorderSettings {
    fail_start: Option<StreamLeg>,
    fail_stop: Option<StreamLeg>,
    flush_mode: FlushMode,
}

pub struct MockMediaEngine {
    pub stats: Arc<MockStats>,
    knobs: Arc<Knobs>,
}

impl MockMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(MockStats::default()),
            knobs: Arc::new(Knobs::default()),
        })
    }

    pub fn fail_transport_for(&self, leg: StreamLeg) {
        *self.knobs.fail_transport.lock() = Some(leg);
    }

    /// Reject the next offer for `leg` as unsupported
    pub fn reject_offer_once_for(&self, leg: StreamLeg) {
        *self.knobs.reject_offer.lock() = Some(leg);
    }

    pub fn fail_recorder_start_for(&self, leg: StreamLeg) {
        *self.knobs.fail_recorder_start.lock() = Some(leg);
    }

    pub fn fail_recorder_stop_for(&self, leg: StreamLeg) {
        *self.knobs.fail_recorder_stop.lock() = Some(leg);
    }

    pub fn set_flush_mode(&self, mode: FlushMode) {
        *self.knobs.flush_mode.lock() = Some(mode);
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_transport(
        &self,
        ctx: &SessionContext,
        leg: StreamLeg,
        offer: &Offer,
        candidates: &[CandidateData],
        _capabilities: &Capabilities,
    ) -> Result<Box<dyn MediaTransport>> {
        tokio::task::yield_now().await;
        if *self.knobs.fail_transport.lock() == Some(leg) {
            return Err(Error::ResourceError(format!("no ports left for {}", leg)));
        }
        {
            let mut reject = self.knobs.reject_offer.lock();
            if *reject == Some(leg) {
                *reject = None;
                return Err(Error::NegotiationError(format!("no common codec for {}", leg)));
            }
        }
        self.stats.transports_created[leg].fetch_add(1, Ordering::SeqCst);
        self.stats
            .candidates_seen
            .lock()
            .push((leg, candidates.to_vec()));
        self.stats.identities.lock().push(ctx.identity.clone());

        Ok(Box::new(MockTransport {
            leg,
            answer: format!("answer-for-{}-{}", leg, offer.media().len()),
            stats: Arc::clone(&self.stats),
            knobs: Arc::clone(&self.knobs),
        }))
    }
}

struct MockTransport {
    leg: StreamLeg,
    answer: String,
    stats: Arc<MockStats>,
    knobs: Arc<Knobs>,
}

#[async_trait]
impl MediaTransport for MockTransport {
    fn answer_sdp(&self) -> &str {
        &self.answer
    }

    async fn create_incoming_stream(&self) -> Result<Box<dyn IncomingStream>> {
        self.stats.streams_created[self.leg].fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            leg: self.leg,
            stats: Arc::clone(&self.stats),
            knobs: Arc::clone(&self.knobs),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.stats.transports_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStream {
    leg: StreamLeg,
    stats: Arc<MockStats>,
    knobs: Arc<Knobs>,
}

#[async_trait]
impl IncomingStream for MockStream {
    async fn create_recorder(&self, path: &Path) -> Result<Box<dyn Recorder>> {
        self.stats.recorder_paths.lock().push(path.to_path_buf());
        Ok(Box::new(MockRecorder {
            leg: self.leg,
            settings: self.knobs.recorder_settings(),
            stats: Arc::clone(&self.stats),
        }))
    }

    async fn release(&self) -> Result<()> {
        self.stats.streams_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockRecorder {
    leg: StreamLeg,
    settings: RecorderSettings,
    stats: Arc<MockStats>,
}

#[async_trait]
impl Recorder for MockRecorder {
    async fn start(&mut self) -> Result<()> {
        if self.settings.fail_start == Some(self.leg) {
            return Err(Error::ResourceError(format!("cannot open file for {}", self.leg)));
        }
        self.stats.recorders_started[self.leg].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<Option<FlushHandle>> {
        self.stats.recorders_stopped[self.leg].fetch_add(1, Ordering::SeqCst);
        if self.settings.fail_stop == Some(self.leg) {
            return Err(Error::ResourceError(format!("muxer crashed for {}", self.leg)));
        }
        match self.settings.flush_mode {
            FlushMode::NoSignal => Ok(None),
            FlushMode::Immediate => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(());
                Ok(Some(rx))
            }
            FlushMode::Never => {
                let (tx, rx) = oneshot::channel();
                self.stats.pending_flushes.lock().push(tx);
                Ok(Some(rx))
            }
        }
    }
}
