//! # Viva Session - voice interview sessions
//!
//! Creates an interview on the service, then runs the conversation: listen
//! for the candidate, stream each turn over a duplex channel, play the
//! interviewer's reply, repeat until the time budget runs out or either side
//! ends the interview.
//!
//! ```text
//!  SessionLifecycleClient ──create──▶ InterviewSession
//!                                          │
//!                              InterviewSessionController
//!        ┌──────────────┬──────────────┬───┴──────────┬──────────────┐
//!   viva-voice VAD   CaptureStream   DuplexChannel   PlaybackController  Countdown
//!                         └──chunks──▶ (websocket) ──replies──┘
//! ```

pub mod channel;
pub mod config;
pub mod controller;
pub mod countdown;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod session;

pub use channel::{ChannelEvent, ChannelState, DuplexChannel};
pub use config::{CaptureConfig, InterviewConfig};
pub use controller::{
    Connector, InterviewSessionController, SessionDevices, SessionEvent, WebSocketConnector,
};
pub use countdown::{format_clock, Countdown, CountdownTick};
pub use error::{ChannelError, SessionError, SessionResult};
pub use lifecycle::{
    CreatedSession, InterviewRequest, Portfolio, SessionLifecycle, SessionLifecycleClient,
};
pub use protocol::{ControlSignal, InboundMessage, OutboundFrame, INTERVIEW_ENDED_SIGNAL};
pub use session::{InterviewSession, SessionCommand, SessionOutcome, SessionStatus, TurnState};
