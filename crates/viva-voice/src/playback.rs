//! Interviewer audio playback.
//!
//! [`PlaybackController`] guarantees at most one clip plays at a time and
//! reports completion once per clip. The rodio sink lives on its own thread
//! because `OutputStream` is not `Send`; completion is detected by polling
//! `Sink::empty()` and delivered as a [`PlaybackEvent`].

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SINK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Identifies one started playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(u64);

impl PlaybackId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// How a playback ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Finished(PlaybackId),
    Failed(PlaybackId, String),
}

impl PlaybackEvent {
    pub fn id(&self) -> PlaybackId {
        match self {
            PlaybackEvent::Finished(id) | PlaybackEvent::Failed(id, _) => *id,
        }
    }
}

/// Output device that plays encoded audio (WAV/MP3/OGG) and reports when each clip ends.
pub trait AudioSink: Send {
    /// Begin playing `bytes`. The sink must later report `Finished(id)` or `Failed(id, _)`
    /// unless [`AudioSink::stop`] is called first.
    fn play(&mut self, id: PlaybackId, bytes: Vec<u8>) -> VoiceResult<()>;

    /// Silence output immediately. No event is reported for the interrupted clip.
    fn stop(&mut self);
}

enum SinkCommand {
    Play { id: PlaybackId, bytes: Vec<u8> },
    Stop,
}

/// Default output device through rodio.
pub struct RodioSink {
    cmd_tx: std_mpsc::Sender<SinkCommand>,
    handle: Option<JoinHandle<()>>,
}

impl RodioSink {
    /// Open the default output device. Completion events are sent on `events`.
    pub fn spawn(events: mpsc::UnboundedSender<PlaybackEvent>) -> VoiceResult<Self> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();

        let handle = thread::Builder::new()
            .name("viva-playback".to_string())
            .spawn(move || sink_thread(cmd_rx, ready_tx, events))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::ThreadGone(
                "playback thread exited before reporting".to_string(),
            )),
        }
    }
}

impl AudioSink for RodioSink {
    fn play(&mut self, id: PlaybackId, bytes: Vec<u8>) -> VoiceResult<()> {
        self.cmd_tx
            .send(SinkCommand::Play { id, bytes })
            .map_err(|_| VoiceError::ThreadGone("playback thread not responding".to_string()))
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Stop);
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        // Replacing the sender disconnects the thread's receiver.
        let (dead_tx, _) = std_mpsc::channel();
        drop(std::mem::replace(&mut self.cmd_tx, dead_tx));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sink_thread(
    cmd_rx: std_mpsc::Receiver<SinkCommand>,
    ready_tx: std_mpsc::Sender<VoiceResult<()>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
            return;
        }
    };
    let new_sink = || Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()));
    let mut sink = match new_sink() {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    info!("🔊 Playback sink ready");

    let mut current: Option<PlaybackId> = None;
    loop {
        match cmd_rx.recv_timeout(SINK_POLL_INTERVAL) {
            Ok(SinkCommand::Play { id, bytes }) => {
                if bytes.is_empty() {
                    let _ = events.send(PlaybackEvent::Finished(id));
                    continue;
                }
                match rodio::Decoder::new(Cursor::new(bytes)) {
                    Ok(source) => {
                        sink.append(source.convert_samples::<f32>());
                        current = Some(id);
                    }
                    Err(e) => {
                        let _ = events.send(PlaybackEvent::Failed(id, format!("Decode failed: {}", e)));
                    }
                }
            }
            Ok(SinkCommand::Stop) => {
                sink.stop();
                current = None;
                // A stopped sink stays stopped; start fresh for the next clip.
                match new_sink() {
                    Ok(fresh) => sink = fresh,
                    Err(e) => {
                        warn!("failed to recreate playback sink: {}", e);
                        break;
                    }
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if let Some(id) = current {
                    if sink.empty() {
                        current = None;
                        let _ = events.send(PlaybackEvent::Finished(id));
                    }
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    sink.stop();
    debug!("playback thread exiting");
}

/// Single-occupancy playback with completion tracking.
pub struct PlaybackController {
    sink: Box<dyn AudioSink>,
    events: mpsc::UnboundedReceiver<PlaybackEvent>,
    active: Option<PlaybackId>,
    next_id: u64,
}

impl PlaybackController {
    /// `events` must be the receiver the sink reports on.
    pub fn new(sink: Box<dyn AudioSink>, events: mpsc::UnboundedReceiver<PlaybackEvent>) -> Self {
        Self {
            sink,
            events,
            active: None,
            next_id: 0,
        }
    }

    /// Start a clip. `Ok(None)` means another clip is still playing and this one was rejected.
    pub fn play(&mut self, bytes: Vec<u8>) -> VoiceResult<Option<PlaybackId>> {
        if let Some(active) = self.active {
            debug!("playback {:?} still active; rejecting new clip", active);
            return Ok(None);
        }
        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        let len = bytes.len();
        self.sink.play(id, bytes)?;
        self.active = Some(id);
        info!("▶️ Playback {:?} started ({} bytes)", id, len);
        Ok(Some(id))
    }

    /// Next raw event from the sink.
    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }

    /// Match an event against the active clip. Events for anything else are stale and dropped.
    pub fn complete(&mut self, event: PlaybackEvent) -> Option<PlaybackEvent> {
        if self.active != Some(event.id()) {
            debug!("ignoring stale playback event {:?}", event);
            return None;
        }
        self.active = None;
        match &event {
            PlaybackEvent::Finished(id) => info!("⏹️ Playback {:?} finished", id),
            PlaybackEvent::Failed(id, reason) => warn!("Playback {:?} failed: {}", id, reason),
        }
        Some(event)
    }

    /// Interrupt the active clip, if any.
    pub fn stop(&mut self) {
        if let Some(id) = self.active.take() {
            self.sink.stop();
            info!("Playback {:?} stopped", id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<PlaybackId> {
        self.active
    }
}
