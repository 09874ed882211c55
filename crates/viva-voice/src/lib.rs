//! # Viva Voice - audio side of a spoken interview
//!
//! Microphone input, loudness sampling, voice activity detection, turn
//! recording and interviewer playback. Nothing here knows about sessions or
//! the network; the session crate drives these pieces from its event loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Microphone (cpal thread) ──push──▶ InputTap                  │
//! │                                      │          │             │
//! │                          VolumeSampler      CaptureStream      │
//! │                                │          (chunks + WAV clip)  │
//! │                    VoiceActivityDetector                       │
//! │                      (threshold + TimerSlot)                   │
//! │                                                                │
//! │  PlaybackController ──▶ AudioSink (rodio thread)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod error;
pub mod microphone;
pub mod playback;
pub mod sampler;
pub mod tap;
pub mod timer;
pub mod vad;

pub use capture::{AudioChunk, CaptureStream, CapturedTurn, ClipArchive};
pub use error::{VoiceError, VoiceResult};
pub use microphone::{CpalMicrophone, Microphone};
pub use playback::{AudioSink, PlaybackController, PlaybackEvent, PlaybackId, RodioSink};
pub use sampler::VolumeSampler;
pub use tap::{InputTap, ANALYSIS_WINDOW, MAX_TURN_SAMPLES, TAP_SAMPLE_RATE};
pub use timer::{TimerSlot, TimerToken};
pub use vad::{VadConfig, VadDecision, VadState, VoiceActivityDetector};
