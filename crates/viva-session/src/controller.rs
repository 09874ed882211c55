//! The interview session controller.
//!
//! One task owns the whole session. Every input (volume ticks, slice ticks,
//! the VAD silence timer, channel traffic, playback completions, the
//! countdown and user commands) arrives through a single `tokio::select!`
//! and is handled to completion before the next, so session state needs no
//! locks. [`InterviewSessionController::dispatch`] is the whole state
//! machine; [`InterviewSessionController::run`] only turns timers and
//! channels into [`SessionEvent`]s.

use crate::channel::{ChannelEvent, ChannelState, DuplexChannel};
use crate::config::InterviewConfig;
use crate::countdown::{format_clock, Countdown, CountdownTick};
use crate::error::{SessionError, SessionResult};
use crate::lifecycle::SessionLifecycle;
use crate::protocol::{ControlSignal, InboundMessage, OutboundFrame};
use crate::session::{InterviewSession, SessionCommand, SessionOutcome, SessionStatus, TurnState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use viva_voice::{
    CaptureStream, ClipArchive, InputTap, Microphone, PlaybackController, PlaybackEvent,
    TimerSlot, TimerToken, VadDecision, VoiceActivityDetector, VolumeSampler,
};

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Opens the duplex channel for a session.
pub trait Connector: Send {
    fn open(&mut self, session_id: &str) -> DuplexChannel;
}

/// Connects to the interview service over a websocket.
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WebSocketConnector {
    fn open(&mut self, session_id: &str) -> DuplexChannel {
        info!("🔌 Connecting to {}", self.url);
        DuplexChannel::connect(&self.url, session_id)
    }
}

/// Audio endpoints handed to the controller.
pub struct SessionDevices {
    /// Must be the tap the microphone feeds.
    pub tap: InputTap,
    pub microphone: Box<dyn Microphone>,
    pub playback: PlaybackController,
}

#[derive(Debug)]
pub enum SessionEvent {
    VolumeTick,
    SliceTick,
    SilenceElapsed(TimerToken),
    CountdownTick,
    Channel(ChannelEvent),
    Playback(PlaybackEvent),
    Command(SessionCommand),
    EndingTimeout,
}

pub struct InterviewSessionController {
    session: InterviewSession,
    state: TurnState,

    tap: InputTap,
    microphone: Box<dyn Microphone>,
    sampler: VolumeSampler,
    vad: VoiceActivityDetector,
    silence_rx: mpsc::UnboundedReceiver<TimerToken>,
    capture: CaptureStream,
    chunk_interval: Duration,
    archive: Option<ClipArchive>,

    connector: Box<dyn Connector>,
    channel: Option<DuplexChannel>,
    playback: PlaybackController,
    lifecycle: Arc<dyn SessionLifecycle>,

    countdown: Countdown,
    end_confirmation_timeout: Duration,
    ending_deadline: Option<Instant>,

    status_tx: watch::Sender<SessionStatus>,
    volume: f32,
    turns: u64,
    outcome: Option<SessionOutcome>,
    cleanup_claimed: bool,
}

impl InterviewSessionController {
    pub fn new(
        session: InterviewSession,
        config: &InterviewConfig,
        devices: SessionDevices,
        connector: Box<dyn Connector>,
        lifecycle: Arc<dyn SessionLifecycle>,
    ) -> Self {
        let (silence, silence_rx) = TimerSlot::channel();
        let countdown = Countdown::new(session.time_budget);
        let (status_tx, _) = watch::channel(SessionStatus {
            state: TurnState::NotStarted,
            remaining_secs: countdown.remaining_secs(),
            countdown_running: false,
            volume: 0.0,
            turns: 0,
        });
        let SessionDevices {
            tap,
            microphone,
            playback,
        } = devices;

        Self {
            state: TurnState::NotStarted,
            sampler: VolumeSampler::new(tap.clone()),
            vad: VoiceActivityDetector::new(config.vad.clone(), silence),
            silence_rx,
            capture: CaptureStream::new(tap.clone()),
            chunk_interval: config.chunk_interval(),
            archive: config.capture.archive_dir.clone().map(ClipArchive::new),
            tap,
            microphone,
            connector,
            channel: None,
            playback,
            lifecycle,
            countdown,
            end_confirmation_timeout: config.end_confirmation_timeout(),
            ending_deadline: None,
            status_tx,
            volume: 0.0,
            turns: 0,
            outcome: None,
            cleanup_claimed: false,
            session,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(DuplexChannel::state)
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_active()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_active()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            remaining_secs: self.countdown.remaining_secs(),
            countdown_running: self.countdown.is_running(),
            volume: self.volume,
            turns: self.turns,
        }
    }

    /// Status updates, one per handled event.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Acquire the microphone, open the channel and play the greeting.
    ///
    /// On microphone failure the session stays `NotStarted` and can be retried or abandoned.
    pub fn start(&mut self) -> SessionResult<()> {
        if self.state != TurnState::NotStarted {
            return Err(SessionError::InvalidState(format!(
                "cannot start a session that is {}",
                self.state
            )));
        }
        self.microphone
            .acquire(self.tap.clone())
            .map_err(SessionError::Microphone)?;
        info!(session_id = %self.session.id, "🎬 Interview starting");

        self.channel = Some(self.connector.open(&self.session.id));
        let greeting = std::mem::take(&mut self.session.greeting);
        if greeting.is_empty() {
            self.resume_listening();
        } else {
            self.start_playback(greeting);
        }
        self.publish();
        Ok(())
    }

    /// Leave a session that was never started: delete it on the service and wait for the answer.
    pub async fn abandon(mut self) -> SessionResult<SessionOutcome> {
        if self.state != TurnState::NotStarted {
            return Err(SessionError::InvalidState(format!(
                "cannot abandon a session that is {}",
                self.state
            )));
        }
        self.cleanup_claimed = true;
        info!(session_id = %self.session.id, "🧹 Abandoning session before start");
        let deleted = self.lifecycle.delete(&self.session.id).await;
        self.outcome = Some(SessionOutcome::Abandoned);
        self.state = TurnState::Ended;
        deleted.map(|_| SessionOutcome::Abandoned)
    }

    /// Drive the session until it ends.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> SessionResult<SessionOutcome> {
        if self.state == TurnState::NotStarted {
            return Err(SessionError::InvalidState(
                "session must be started before it can run".to_string(),
            ));
        }
        let sample_interval = self.vad.config().sample_interval();
        let mut volume_ticker: Option<Interval> = None;
        let mut slice_ticker: Option<Interval> = None;
        let mut countdown_ticker: Option<Interval> = None;

        while self.state != TurnState::Ended {
            sync_ticker(
                &mut volume_ticker,
                self.state.is_listening_phase() && self.microphone.is_live(),
                sample_interval,
            );
            sync_ticker(&mut slice_ticker, self.capture.is_active(), self.chunk_interval);
            sync_ticker(
                &mut countdown_ticker,
                self.countdown.is_running() && !self.state.is_terminal(),
                COUNTDOWN_PERIOD,
            );

            let event = tokio::select! {
                Some(command) = commands.recv() => SessionEvent::Command(command),
                Some(token) = self.silence_rx.recv() => SessionEvent::SilenceElapsed(token),
                Some(event) = next_channel_event(self.channel.as_mut()) => SessionEvent::Channel(event),
                Some(event) = self.playback.next_event() => SessionEvent::Playback(event),
                _ = tick(&mut countdown_ticker) => SessionEvent::CountdownTick,
                _ = tick(&mut slice_ticker) => SessionEvent::SliceTick,
                _ = tick(&mut volume_ticker) => SessionEvent::VolumeTick,
                _ = wait_deadline(self.ending_deadline) => SessionEvent::EndingTimeout,
            };
            self.dispatch(event);
        }

        Ok(self.outcome.clone().unwrap_or(SessionOutcome::Completed))
    }

    /// Apply one event to the session.
    pub fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::VolumeTick => self.on_volume_tick(),
            SessionEvent::SliceTick => self.on_slice_tick(),
            SessionEvent::SilenceElapsed(token) => {
                if self.vad.on_silence_elapsed(token) == Some(VadDecision::SpeechEnd) {
                    self.finish_turn();
                }
            }
            SessionEvent::CountdownTick => self.on_countdown_tick(),
            SessionEvent::Channel(event) => self.on_channel_event(event),
            SessionEvent::Playback(event) => self.on_playback_event(event),
            SessionEvent::Command(SessionCommand::End) => self.begin_ending("requested by user"),
            SessionEvent::EndingTimeout => {
                if self.state == TurnState::Ending {
                    warn!(session_id = %self.session.id, "⏱️ No end confirmation from service; giving up");
                    self.finish(SessionOutcome::TimedOut);
                }
            }
        }
        debug_assert!(
            !(self.capture.is_active() && self.playback.is_active()),
            "capture and playback active together"
        );
        self.publish();
    }

    fn on_volume_tick(&mut self) {
        if !self.state.is_listening_phase() || !self.microphone.is_live() {
            return;
        }
        self.volume = self.sampler.sample();
        if self.vad.observe(self.volume) == Some(VadDecision::SpeechStart) {
            self.begin_recording();
        }
    }

    fn begin_recording(&mut self) {
        if self.state != TurnState::Listening {
            return;
        }
        if self.playback.is_active() {
            warn!("speech detected while playback is active; not recording");
            return;
        }
        if self.capture.start() {
            self.transition(TurnState::Recording);
        }
    }

    fn on_slice_tick(&mut self) {
        if self.state != TurnState::Recording {
            return;
        }
        if let Some(chunk) = self.capture.slice() {
            debug!(seq = chunk.seq, bytes = chunk.bytes.len(), "audio chunk");
            self.forward(OutboundFrame::Audio(chunk));
        }
    }

    fn finish_turn(&mut self) {
        if self.state != TurnState::Recording {
            return;
        }
        let Some(mut turn) = self.capture.stop() else {
            return;
        };
        if let Some(chunk) = turn.final_chunk.take() {
            debug!(seq = chunk.seq, bytes = chunk.bytes.len(), "final audio chunk");
            self.forward(OutboundFrame::Audio(chunk));
        }
        self.forward(OutboundFrame::EndOfTurn);
        self.turns += 1;
        info!(
            session_id = %self.session.id,
            turn = self.turns,
            "🗣️ Turn sent ({:.1}s, {} chunk(s))",
            turn.duration.as_secs_f32(),
            turn.chunk_count
        );
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.store(self.turns, &turn) {
                warn!("failed to archive turn {}: {}", self.turns, e);
            }
        }
        self.vad.reset();
        self.transition(TurnState::AwaitingReply);
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                let Some(channel) = self.channel.as_mut() else {
                    return;
                };
                if let Err(e) = channel.on_opened() {
                    self.channel_lost(e.to_string());
                }
            }
            ChannelEvent::Inbound(InboundMessage::Reply(bytes)) => self.on_reply(bytes),
            ChannelEvent::Inbound(InboundMessage::Control(ControlSignal::InterviewEnded)) => {
                self.on_remote_completed()
            }
            ChannelEvent::Inbound(InboundMessage::Control(ControlSignal::Other(text))) => {
                warn!(session_id = %self.session.id, "ignoring service message: {}", text);
            }
            ChannelEvent::Closed { reason } => {
                self.on_transport_gone(reason.unwrap_or_else(|| "closed by service".to_string()))
            }
            ChannelEvent::Failed(reason) => self.on_transport_gone(reason),
        }
    }

    fn on_transport_gone(&mut self, reason: String) {
        if let Some(channel) = self.channel.as_mut() {
            channel.on_closed();
        }
        match self.state {
            TurnState::Ended => {}
            TurnState::Ending => {
                info!(session_id = %self.session.id, "channel closed while ending ({})", reason);
                self.finish(SessionOutcome::Completed);
            }
            _ => self.channel_lost(reason),
        }
    }

    fn on_reply(&mut self, bytes: Vec<u8>) {
        match self.state {
            TurnState::AwaitingReply | TurnState::Listening => self.start_playback(bytes),
            TurnState::Recording | TurnState::Playing => {
                warn!(
                    "dropping interviewer reply ({} bytes) received while {}",
                    bytes.len(),
                    self.state
                );
            }
            TurnState::NotStarted | TurnState::Ending | TurnState::Ended => {
                debug!("ignoring reply while {}", self.state);
            }
        }
    }

    fn start_playback(&mut self, bytes: Vec<u8>) {
        if self.capture.is_active() {
            warn!("refusing playback while recording");
            return;
        }
        self.vad.reset();
        match self.playback.play(bytes) {
            Ok(Some(_)) => self.transition(TurnState::Playing),
            Ok(None) => debug!("playback busy; reply dropped"),
            Err(e) => {
                warn!("⚠️ Playback failed ({}); listening again", e);
                self.resume_listening();
            }
        }
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        let Some(event) = self.playback.complete(event) else {
            return;
        };
        if self.state != TurnState::Playing {
            debug!("playback ended while {}; not re-arming", self.state);
            return;
        }
        if let PlaybackEvent::Failed(_, reason) = &event {
            warn!("interviewer audio could not be played: {}", reason);
        }
        self.resume_listening();
    }

    fn resume_listening(&mut self) {
        self.vad.reset();
        self.transition(TurnState::Listening);
        if self.countdown.start() {
            info!(
                session_id = %self.session.id,
                "⏱️ Countdown started ({})",
                format_clock(self.countdown.remaining_secs())
            );
        }
    }

    fn on_countdown_tick(&mut self) {
        if self.state == TurnState::NotStarted || self.state.is_terminal() {
            return;
        }
        if let Some(CountdownTick::Expired) = self.countdown.tick() {
            info!(session_id = %self.session.id, "⌛ Time is up");
            self.begin_ending("time budget exhausted");
        }
    }

    fn begin_ending(&mut self, reason: &str) {
        match self.state {
            TurnState::NotStarted => {
                warn!("end requested before the session started; ignoring");
                return;
            }
            TurnState::Ending | TurnState::Ended => {
                debug!("already {}; end request ignored", self.state);
                return;
            }
            _ => {}
        }
        info!(session_id = %self.session.id, "⏹️ Ending interview ({})", reason);
        self.quiesce();
        self.forward(OutboundFrame::EndInterview);
        self.ending_deadline = Some(Instant::now() + self.end_confirmation_timeout);
        self.transition(TurnState::Ending);
    }

    fn on_remote_completed(&mut self) {
        if self.state == TurnState::Ended {
            return;
        }
        info!(session_id = %self.session.id, "🏁 Interview ended by service");
        self.quiesce();
        self.transition(TurnState::Ending);
        self.finish(SessionOutcome::Completed);
    }

    fn channel_lost(&mut self, reason: String) {
        if self.state == TurnState::Ended {
            return;
        }
        error!(session_id = %self.session.id, "❌ Channel lost: {}", reason);
        self.finish(SessionOutcome::ChannelLost(reason));
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        self.ending_deadline = None;
        self.outcome = Some(outcome);
        self.transition(TurnState::Ended);
        self.release();
    }

    /// Stop anything that makes or consumes sound.
    fn quiesce(&mut self) {
        self.capture.discard();
        self.playback.stop();
        self.vad.reset();
    }

    fn release(&mut self) {
        self.quiesce();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.microphone.release();
        self.volume = 0.0;
    }

    fn forward(&mut self, frame: OutboundFrame) {
        let kind = frame.kind();
        match self.channel.as_mut() {
            Some(channel) => {
                if let Err(e) = channel.send(frame) {
                    warn!("could not send {} frame: {}", kind, e);
                }
            }
            None => warn!("no channel; dropping {} frame", kind),
        }
    }

    fn transition(&mut self, to: TurnState) {
        if self.state == to {
            return;
        }
        info!(session_id = %self.session.id, "{} → {}", self.state, to);
        self.state = to;
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    fn spawn_abandon_cleanup(&mut self) {
        if self.cleanup_claimed {
            return;
        }
        self.cleanup_claimed = true;
        let lifecycle = Arc::clone(&self.lifecycle);
        let session_id = self.session.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!(session_id = %session_id, "🧹 Session abandoned before start; deleting");
                handle.spawn(async move {
                    if let Err(e) = lifecycle.delete(&session_id).await {
                        warn!("failed to delete abandoned session {}: {}", session_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "no async runtime; abandoned session {} left on the service",
                session_id
            ),
        }
    }
}

impl Drop for InterviewSessionController {
    fn drop(&mut self) {
        if self.state == TurnState::NotStarted {
            self.spawn_abandon_cleanup();
        }
        self.release();
    }
}

/// Keep `ticker` running exactly while `active`. A fresh ticker first fires one period from now.
fn sync_ticker(ticker: &mut Option<Interval>, active: bool, period: Duration) {
    match (active, ticker.is_some()) {
        (true, false) => {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *ticker = Some(interval);
        }
        (false, true) => *ticker = None,
        _ => {}
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_channel_event(channel: Option<&mut DuplexChannel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
