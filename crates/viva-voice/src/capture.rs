//! Turn recording: slices the armed input into ordered chunks for streaming
//! and finalizes a standalone WAV clip when the turn ends.
//!
//! Chunks are mono 16-bit PCM at 16 kHz. The first chunk of every turn opens
//! with a streaming WAV header (sizes unknown), so concatenating a turn's
//! chunks in order yields a playable stream.

use crate::error::VoiceResult;
use crate::tap::{InputTap, MAX_TURN_SAMPLES, TAP_SAMPLE_RATE};
use chrono::{DateTime, Local, Utc};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const BITS_PER_SAMPLE: u16 = 16;
const CHANNELS: u16 = 1;

/// One encoded piece of a turn, tagged with its emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Monotonic across the whole session.
    pub seq: u64,
    pub bytes: Vec<u8>,
}

/// Result of stopping a recording.
#[derive(Debug, Clone)]
pub struct CapturedTurn {
    /// Audio recorded after the last slice, if any.
    pub final_chunk: Option<AudioChunk>,
    /// The whole turn as a finalized WAV file.
    pub clip: Vec<u8>,
    /// Chunks emitted for this turn, including `final_chunk`.
    pub chunk_count: u64,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

pub fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: CHANNELS,
        sample_rate: TAP_SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    }
}

/// 44-byte RIFF header with the size fields set to `0xFFFFFFFF` (length not known yet).
pub fn streaming_wav_header() -> Vec<u8> {
    let spec = wav_spec();
    let block_align = spec.channels * spec.bits_per_sample / 8;
    let byte_rate = spec.sample_rate * block_align as u32;

    let mut h = Vec::with_capacity(44);
    h.extend_from_slice(b"RIFF");
    h.extend_from_slice(&u32::MAX.to_le_bytes());
    h.extend_from_slice(b"WAVE");
    h.extend_from_slice(b"fmt ");
    h.extend_from_slice(&16u32.to_le_bytes());
    h.extend_from_slice(&1u16.to_le_bytes());
    h.extend_from_slice(&spec.channels.to_le_bytes());
    h.extend_from_slice(&spec.sample_rate.to_le_bytes());
    h.extend_from_slice(&byte_rate.to_le_bytes());
    h.extend_from_slice(&block_align.to_le_bytes());
    h.extend_from_slice(&spec.bits_per_sample.to_le_bytes());
    h.extend_from_slice(b"data");
    h.extend_from_slice(&u32::MAX.to_le_bytes());
    h
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Little-endian 16-bit PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| to_i16(s).to_le_bytes())
        .collect()
}

/// Encode samples as a complete WAV file.
pub fn finalize_clip(samples: &[f32]) -> VoiceResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec())?;
        for &s in samples {
            writer.write_sample(to_i16(s))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Records from the input tap between `start` and `stop`.
pub struct CaptureStream {
    tap: InputTap,
    active: bool,
    next_seq: u64,
    header_sent: bool,
    turn_samples: Vec<f32>,
    turn_len: usize,
    turn_chunks: u64,
}

impl CaptureStream {
    pub fn new(tap: InputTap) -> Self {
        Self {
            tap,
            active: false,
            next_seq: 0,
            header_sent: false,
            turn_samples: Vec::new(),
            turn_len: 0,
            turn_chunks: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin a recording. Returns false (and does nothing) if one is already active.
    pub fn start(&mut self) -> bool {
        if self.active {
            debug!("capture already active; start ignored");
            return false;
        }
        self.tap.arm();
        self.active = true;
        self.header_sent = false;
        self.turn_samples.clear();
        self.turn_len = 0;
        self.turn_chunks = 0;
        info!("🔴 Recording started");
        true
    }

    /// Emit everything recorded since the previous slice. None when inactive or nothing new arrived.
    pub fn slice(&mut self) -> Option<AudioChunk> {
        if !self.active {
            return None;
        }
        let pcm = self.tap.take_pending();
        self.encode_chunk(&pcm)
    }

    /// End the recording. None when no recording was active.
    pub fn stop(&mut self) -> Option<CapturedTurn> {
        if !self.active {
            return None;
        }
        let trailing = self.tap.disarm();
        let final_chunk = self.encode_chunk(&trailing);
        self.active = false;

        let samples = std::mem::take(&mut self.turn_samples);
        let clip = finalize_clip(&samples).unwrap_or_else(|e| {
            warn!("failed to finalize turn clip: {}", e);
            Vec::new()
        });
        let duration = Duration::from_secs_f64(self.turn_len as f64 / TAP_SAMPLE_RATE as f64);
        info!(
            "⏹️ Recording stopped ({:.1}s, {} chunk(s))",
            duration.as_secs_f32(),
            self.turn_chunks
        );
        Some(CapturedTurn {
            final_chunk,
            clip,
            chunk_count: self.turn_chunks,
            duration,
            completed_at: Utc::now(),
        })
    }

    /// Drop an active recording without producing a turn.
    pub fn discard(&mut self) {
        if self.active {
            self.tap.disarm();
            self.active = false;
            self.turn_samples.clear();
            debug!("recording discarded");
        }
    }

    fn encode_chunk(&mut self, pcm: &[f32]) -> Option<AudioChunk> {
        if pcm.is_empty() {
            return None;
        }
        // The clip keeps the first MAX_TURN_SAMPLES; chunks keep streaming past it.
        let room = MAX_TURN_SAMPLES - self.turn_samples.len();
        if room > 0 && room < pcm.len() {
            warn!(
                "turn longer than {}s; archived clip is truncated",
                MAX_TURN_SAMPLES / TAP_SAMPLE_RATE as usize
            );
        }
        self.turn_samples.extend_from_slice(&pcm[..pcm.len().min(room)]);
        self.turn_len += pcm.len();
        let mut bytes = Vec::with_capacity(44 + pcm.len() * 2);
        if !self.header_sent {
            bytes.extend(streaming_wav_header());
            self.header_sent = true;
        }
        bytes.extend(encode_pcm16(pcm));

        let seq = self.next_seq;
        self.next_seq += 1;
        self.turn_chunks += 1;
        Some(AudioChunk { seq, bytes })
    }
}

/// Writes finalized turn clips to a directory.
#[derive(Debug, Clone)]
pub struct ClipArchive {
    dir: PathBuf,
}

impl ClipArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store `turn` as `turn-<index>-<YYYYmmdd_HHMMSS>.wav`.
    pub fn store(&self, index: u64, turn: &CapturedTurn) -> VoiceResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = turn.completed_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("turn-{}-{}.wav", index, stamp));
        std::fs::write(&path, &turn.clip)?;
        debug!("archived turn clip to {}", path.display());
        Ok(path)
    }
}
