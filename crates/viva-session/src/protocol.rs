//! Wire format of the interview audio channel.
//!
//! Outbound control frames are small JSON text messages; audio chunks go out
//! as binary. Inbound binary frames are interviewer replies, inbound text is
//! a control signal.

use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;
use viva_voice::AudioChunk;

/// Text the server sends once it has closed the interview.
pub const INTERVIEW_ENDED_SIGNAL: &str = "Interview ended successfully.";

#[derive(Serialize)]
struct Identify<'a> {
    session_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndOfMessage {
    end_of_message: bool,
}

#[derive(Serialize)]
struct EndInterview {
    end_interview: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Always the first frame after the channel opens.
    Identify { session_id: String },
    Audio(AudioChunk),
    /// The user's turn is complete.
    EndOfTurn,
    /// The user (or the time budget) asked to finish the interview.
    EndInterview,
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Identify { .. } => "identify",
            OutboundFrame::Audio(_) => "audio",
            OutboundFrame::EndOfTurn => "end-of-turn",
            OutboundFrame::EndInterview => "end-interview",
        }
    }

    pub fn to_message(&self) -> serde_json::Result<Message> {
        let text = match self {
            OutboundFrame::Identify { session_id } => serde_json::to_string(&Identify { session_id })?,
            OutboundFrame::Audio(chunk) => return Ok(Message::Binary(chunk.bytes.clone().into())),
            OutboundFrame::EndOfTurn => serde_json::to_string(&EndOfMessage { end_of_message: true })?,
            OutboundFrame::EndInterview => serde_json::to_string(&EndInterview { end_interview: true })?,
        };
        Ok(Message::Text(text.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    InterviewEnded,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Encoded interviewer audio.
    Reply(Vec<u8>),
    Control(ControlSignal),
}

/// Classify a received frame. Ping/pong/close frames carry no interview content.
pub fn decode_inbound(message: Message) -> Option<InboundMessage> {
    match message {
        Message::Binary(bytes) => Some(InboundMessage::Reply(bytes.to_vec())),
        Message::Text(text) => {
            let text = text.as_str();
            let signal = if text.trim() == INTERVIEW_ENDED_SIGNAL {
                ControlSignal::InterviewEnded
            } else {
                ControlSignal::Other(text.to_string())
            };
            Some(InboundMessage::Control(signal))
        }
        _ => None,
    }
}
