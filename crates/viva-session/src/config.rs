//! Interview client configuration.
//!
//! Layered the usual way: built-in defaults, then an optional TOML file
//! (`VIVA_CONFIG`, default `config/viva`), then `VIVA_*` environment
//! variables with `__` between nested keys (e.g. `VIVA_VAD__THRESHOLD=0.2`).

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use viva_voice::VadConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/viva";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Slice period while recording, in milliseconds (default: 1000)
    pub chunk_interval_ms: u64,

    /// Keep a WAV copy of every finished turn here
    pub archive_dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 1000,
            archive_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub time_budget_secs: u64,
    /// How long to wait for the service to confirm an ending before giving up
    pub end_confirmation_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub vad: VadConfig,
    pub capture: CaptureConfig,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_url: "ws://localhost:8000/ws/audio".to_string(),
            time_budget_secs: 600,
            end_confirmation_timeout_secs: 30,
            http_timeout_secs: 120,
            vad: VadConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl InterviewConfig {
    /// Load from `VIVA_CONFIG` (or the default path) plus environment overrides.
    pub fn load() -> SessionResult<Self> {
        let path = std::env::var("VIVA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (extension optional; a missing file is fine) plus environment overrides.
    pub fn load_from(path: &str) -> SessionResult<Self> {
        let d = Self::default();
        let built = config::Config::builder()
            .set_default("api_base_url", d.api_base_url)?
            .set_default("ws_url", d.ws_url)?
            .set_default("time_budget_secs", d.time_budget_secs)?
            .set_default("end_confirmation_timeout_secs", d.end_confirmation_timeout_secs)?
            .set_default("http_timeout_secs", d.http_timeout_secs)?
            .set_default("vad.threshold", d.vad.threshold as f64)?
            .set_default("vad.silence_ms", d.vad.silence_ms)?
            .set_default("vad.sample_interval_ms", d.vad.sample_interval_ms)?
            .set_default("capture.chunk_interval_ms", d.capture.chunk_interval_ms)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VIVA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> SessionResult<()> {
        self.vad
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
        if self.time_budget_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "time_budget_secs must be positive".to_string(),
            ));
        }
        if self.end_confirmation_timeout_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "end_confirmation_timeout_secs must be positive".to_string(),
            ));
        }
        if self.capture.chunk_interval_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "capture.chunk_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(SessionError::InvalidConfig(format!(
                "ws_url must be a ws:// or wss:// URL, got {}",
                self.ws_url
            )));
        }
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(SessionError::InvalidConfig(format!(
                "api_base_url must be an http(s) URL, got {}",
                self.api_base_url
            )));
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn end_confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.end_confirmation_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.capture.chunk_interval_ms)
    }
}
