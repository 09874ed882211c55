//! In-process stand-ins for the microphone, speaker, channel and service.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use viva_session::{
    ChannelEvent, Connector, CreatedSession, DuplexChannel, InterviewConfig, InterviewRequest,
    InterviewSession, InterviewSessionController, OutboundFrame, SessionDevices, SessionError,
    SessionLifecycle, SessionResult,
};
use viva_voice::{
    AudioSink, InputTap, Microphone, PlaybackController, PlaybackEvent, PlaybackId, VoiceError,
    VoiceResult, ANALYSIS_WINDOW,
};

pub const SESSION_ID: &str = "session-42";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub struct FakeMicrophone {
    live: Arc<AtomicBool>,
    fail: bool,
}

impl Microphone for FakeMicrophone {
    fn acquire(&mut self, _tap: InputTap) -> VoiceResult<()> {
        if self.fail {
            return Err(VoiceError::AudioDevice("permission denied".to_string()));
        }
        self.live.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct FakeSink {
    plays: UnboundedSender<(PlaybackId, Vec<u8>)>,
    stops: Arc<AtomicUsize>,
    fail: bool,
}

impl AudioSink for FakeSink {
    fn play(&mut self, id: PlaybackId, bytes: Vec<u8>) -> VoiceResult<()> {
        if self.fail {
            return Err(VoiceError::Playback("autoplay blocked".to_string()));
        }
        let _ = self.plays.send((id, bytes));
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct RecordingLifecycle {
    deletes: UnboundedSender<String>,
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionLifecycle for RecordingLifecycle {
    async fn create(&self, _request: &InterviewRequest) -> SessionResult<CreatedSession> {
        Err(SessionError::InvalidState("not used in tests".to_string()))
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let _ = self.deletes.send(session_id.to_string());
        Ok(())
    }
}

pub fn recording_lifecycle(deletes: UnboundedSender<String>) -> Arc<dyn SessionLifecycle> {
    Arc::new(RecordingLifecycle {
        deletes,
        count: Arc::new(AtomicUsize::new(0)),
    })
}

/// Hands out a pre-built channel whose far ends the test holds.
pub struct LoopbackConnector {
    channel: Option<DuplexChannel>,
}

impl Connector for LoopbackConnector {
    fn open(&mut self, session_id: &str) -> DuplexChannel {
        self.channel.take().unwrap_or_else(|| {
            let (tx, _) = mpsc::unbounded_channel();
            let (_, rx) = mpsc::unbounded_channel();
            DuplexChannel::from_parts(session_id, tx, rx)
        })
    }
}

/// Everything on the far side of the controller.
pub struct Peer {
    pub tap: InputTap,
    pub wire: UnboundedReceiver<OutboundFrame>,
    pub transport: UnboundedSender<ChannelEvent>,
    pub plays: UnboundedReceiver<(PlaybackId, Vec<u8>)>,
    pub playback_events: UnboundedSender<PlaybackEvent>,
    pub sink_stops: Arc<AtomicUsize>,
    pub deletes: UnboundedReceiver<String>,
    pub delete_count: Arc<AtomicUsize>,
    pub mic_live: Arc<AtomicBool>,
}

impl Peer {
    pub fn speak(&self) {
        self.tap.push(&vec![0.5; ANALYSIS_WINDOW]);
    }

    pub fn hush(&self) {
        self.tap.push(&vec![0.0; ANALYSIS_WINDOW]);
    }

    pub fn send(&self, event: ChannelEvent) {
        self.transport.send(event).expect("controller gone");
    }

    pub async fn next_frame(&mut self) -> OutboundFrame {
        tokio::time::timeout(Duration::from_secs(120), self.wire.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("wire closed")
    }

    pub fn drain_wire(&mut self) -> Vec<OutboundFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.wire.try_recv() {
            out.push(frame);
        }
        out
    }

    pub async fn next_play(&mut self) -> (PlaybackId, Vec<u8>) {
        tokio::time::timeout(Duration::from_secs(120), self.plays.recv())
            .await
            .expect("timed out waiting for playback")
            .expect("sink gone")
    }
}

pub struct Options {
    pub budget_secs: u64,
    pub greeting: Vec<u8>,
    pub mic_fails: bool,
    pub sink_fails: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            budget_secs: 600,
            greeting: Vec::new(),
            mic_fails: false,
            sink_fails: false,
        }
    }
}

pub fn controller(opts: Options) -> (InterviewSessionController, Peer) {
    init_tracing();
    let config = InterviewConfig {
        time_budget_secs: opts.budget_secs,
        ..Default::default()
    };

    let tap = InputTap::new();
    let mic_live = Arc::new(AtomicBool::new(false));
    let (plays_tx, plays) = mpsc::unbounded_channel();
    let (playback_events, playback_rx) = mpsc::unbounded_channel();
    let sink_stops = Arc::new(AtomicUsize::new(0));
    let sink = FakeSink {
        plays: plays_tx,
        stops: Arc::clone(&sink_stops),
        fail: opts.sink_fails,
    };

    let (writer_tx, wire) = mpsc::unbounded_channel();
    let (transport, events_rx) = mpsc::unbounded_channel();
    let channel = DuplexChannel::from_parts(SESSION_ID, writer_tx, events_rx);

    let (deletes_tx, deletes) = mpsc::unbounded_channel();
    let delete_count = Arc::new(AtomicUsize::new(0));
    let lifecycle = RecordingLifecycle {
        deletes: deletes_tx,
        count: Arc::clone(&delete_count),
    };

    let session = InterviewSession::new(
        CreatedSession {
            session_id: SESSION_ID.to_string(),
            greeting: opts.greeting,
            created_at: chrono::Utc::now(),
        },
        config.time_budget(),
    );
    let devices = SessionDevices {
        tap: tap.clone(),
        microphone: Box::new(FakeMicrophone {
            live: Arc::clone(&mic_live),
            fail: opts.mic_fails,
        }),
        playback: PlaybackController::new(Box::new(sink), playback_rx),
    };
    let controller = InterviewSessionController::new(
        session,
        &config,
        devices,
        Box::new(LoopbackConnector {
            channel: Some(channel),
        }),
        Arc::new(lifecycle),
    );

    (
        controller,
        Peer {
            tap,
            wire,
            transport,
            plays,
            playback_events,
            sink_stops,
            deletes,
            delete_count,
            mic_live,
        },
    )
}

pub fn identify() -> OutboundFrame {
    OutboundFrame::Identify {
        session_id: SESSION_ID.to_string(),
    }
}
