//! Session data model.

use crate::countdown::format_clock;
use crate::lifecycle::CreatedSession;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// One interview as issued by the service.
#[derive(Debug, Clone)]
pub struct InterviewSession {
    pub id: String,
    pub time_budget: Duration,
    pub created_at: DateTime<Utc>,
    /// Greeting audio to play when the interview starts. Consumed on start.
    pub greeting: Vec<u8>,
}

impl InterviewSession {
    pub fn new(created: CreatedSession, time_budget: Duration) -> Self {
        Self {
            id: created.session_id,
            time_budget,
            created_at: created.created_at,
            greeting: created.greeting,
        }
    }
}

/// Where the conversation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    NotStarted,
    /// Waiting for the user to speak.
    Listening,
    /// The user is speaking and audio is streaming out.
    Recording,
    /// The user's turn is sent; waiting for the interviewer.
    AwaitingReply,
    /// Interviewer audio is playing.
    Playing,
    /// An end was requested; waiting for the service to confirm.
    Ending,
    Ended,
}

impl TurnState {
    /// Capture and detection are only meaningful here.
    pub fn is_listening_phase(self) -> bool {
        matches!(self, TurnState::Listening | TurnState::Recording)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Ending | TurnState::Ended)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TurnState::NotStarted => "not started",
            TurnState::Listening => "listening",
            TurnState::Recording => "recording",
            TurnState::AwaitingReply => "awaiting reply",
            TurnState::Playing => "interviewer speaking",
            TurnState::Ending => "ending",
            TurnState::Ended => "ended",
        };
        f.write_str(label)
    }
}

/// How a session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The service confirmed the end.
    Completed,
    /// An end was requested but never confirmed in time.
    TimedOut,
    /// The channel dropped mid-interview.
    ChannelLost(String),
    /// The user left before starting; the session was deleted.
    Abandoned,
}

/// User intents delivered to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    End,
}

/// Snapshot published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: TurnState,
    pub remaining_secs: u64,
    pub countdown_running: bool,
    pub volume: f32,
    pub turns: u64,
}

impl SessionStatus {
    pub fn clock(&self) -> String {
        format_clock(self.remaining_secs)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | turns: {} | level: {:>3.0}%",
            self.clock(),
            self.state,
            self.turns,
            self.volume * 100.0
        )
    }
}
