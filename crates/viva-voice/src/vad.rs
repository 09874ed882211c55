//! Threshold voice activity detection with a silence hold-off.
//!
//! Speech starts the moment a sample rises strictly above the threshold.
//! It ends only after the input has stayed at or below the threshold for the
//! whole silence window: the first quiet sample arms a timer, later quiet
//! samples leave it alone, and any loud sample cancels it.

use crate::error::{VoiceError, VoiceResult};
use crate::timer::{TimerSlot, TimerToken};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for VAD detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Loudness a sample must exceed to count as speech (default: 0.1)
    pub threshold: f32,

    /// Quiet time that ends a turn, in milliseconds (default: 2000)
    pub silence_ms: u64,

    /// How often the input volume is sampled, in milliseconds (default: 16)
    pub sample_interval_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            silence_ms: 2000,
            sample_interval_ms: 16,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> VoiceResult<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(VoiceError::Config(format!(
                "VAD threshold must be within (0, 1), got {}",
                self.threshold
            )));
        }
        if self.silence_ms == 0 {
            return Err(VoiceError::Config("VAD silence window must be non-zero".to_string()));
        }
        if self.sample_interval_ms == 0 || self.sample_interval_ms >= self.silence_ms {
            return Err(VoiceError::Config(format!(
                "VAD sample interval must be non-zero and shorter than the silence window, got {}ms",
                self.sample_interval_ms
            )));
        }
        Ok(())
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Whether the detector currently believes the user is talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speaking,
}

/// Edge reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    SpeechStart,
    SpeechEnd,
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    silence: TimerSlot,
}

impl VoiceActivityDetector {
    /// Expiries of the silence window arrive on the receiver paired with `silence`
    /// and must be fed back through [`Self::on_silence_elapsed`].
    pub fn new(config: VadConfig, silence: TimerSlot) -> Self {
        info!(
            "🎙️ VAD ready (threshold: {}, silence: {}ms)",
            config.threshold, config.silence_ms
        );
        Self {
            config,
            state: VadState::Silence,
            silence,
        }
    }

    /// Feed one volume sample.
    pub fn observe(&mut self, volume: f32) -> Option<VadDecision> {
        let loud = volume > self.config.threshold;
        match (self.state, loud) {
            (VadState::Silence, true) => {
                self.silence.cancel();
                self.state = VadState::Speaking;
                debug!("VAD: speech start (volume {:.3})", volume);
                Some(VadDecision::SpeechStart)
            }
            (VadState::Silence, false) => None,
            (VadState::Speaking, true) => {
                if self.silence.is_armed() {
                    debug!("VAD: silence interrupted (volume {:.3})", volume);
                    self.silence.cancel();
                }
                None
            }
            (VadState::Speaking, false) => {
                if !self.silence.is_armed() {
                    self.silence.schedule(self.config.silence_duration());
                }
                None
            }
        }
    }

    /// Handle an expired silence timer.
    pub fn on_silence_elapsed(&mut self, token: TimerToken) -> Option<VadDecision> {
        if !self.silence.take_fired(token) {
            debug!("VAD: ignoring stale silence timer {:?}", token);
            return None;
        }
        if self.state != VadState::Speaking {
            return None;
        }
        self.state = VadState::Silence;
        debug!("VAD: speech end after {}ms of silence", self.config.silence_ms);
        Some(VadDecision::SpeechEnd)
    }

    /// Return to silence and disarm the timer.
    pub fn reset(&mut self) {
        self.silence.cancel();
        self.state = VadState::Silence;
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_silence_pending(&self) -> bool {
        self.silence.is_armed()
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}
