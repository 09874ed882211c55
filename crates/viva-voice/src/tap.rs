//! Shared input buffer between the device thread and the session.
//!
//! The device callback pushes mono 16 kHz samples. Two readers consume them:
//! the volume sampler looks at the most recent analysis window, and the
//! capture stream drains everything recorded since it was armed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Sample rate every tap consumer works in.
pub const TAP_SAMPLE_RATE: u32 = 16_000;

/// Number of samples in one volume analysis window.
pub const ANALYSIS_WINDOW: usize = 1024;

/// Upper bound on audio buffered for one turn (five minutes at 16 kHz).
pub const MAX_TURN_SAMPLES: usize = 5 * 60 * TAP_SAMPLE_RATE as usize;

struct TapBuffer {
    window: VecDeque<f32>,
    recording: bool,
    pending: Vec<f32>,
}

/// Cloneable handle on the live input buffer.
#[derive(Clone)]
pub struct InputTap {
    inner: Arc<Mutex<TapBuffer>>,
}

impl Default for InputTap {
    fn default() -> Self {
        Self::new()
    }
}

impl InputTap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TapBuffer {
                window: VecDeque::with_capacity(ANALYSIS_WINDOW),
                recording: false,
                pending: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TapBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append mono f32 samples (must already be 16 kHz).
    pub fn push(&self, samples: &[f32]) {
        let mut g = self.lock();
        for &s in samples {
            if g.window.len() == ANALYSIS_WINDOW {
                g.window.pop_front();
            }
            g.window.push_back(s);
        }
        if g.recording {
            g.pending.extend_from_slice(samples);
            let len = g.pending.len();
            if len > MAX_TURN_SAMPLES {
                g.pending.drain(..len - MAX_TURN_SAMPLES);
            }
        }
    }

    /// Run `f` over the current analysis window (oldest sample first).
    pub fn with_window<R>(&self, f: impl FnOnce(&[f32]) -> R) -> R {
        let mut g = self.lock();
        f(g.window.make_contiguous())
    }

    /// Start accumulating samples for a recording. Anything pushed earlier is not included.
    pub fn arm(&self) {
        let mut g = self.lock();
        g.pending.clear();
        g.recording = true;
    }

    /// Drain samples recorded since the last take.
    pub fn take_pending(&self) -> Vec<f32> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Stop accumulating and return whatever was still unread.
    pub fn disarm(&self) -> Vec<f32> {
        let mut g = self.lock();
        g.recording = false;
        std::mem::take(&mut g.pending)
    }

    pub fn is_armed(&self) -> bool {
        self.lock().recording
    }

    /// Forget the analysis window (device released).
    pub fn clear(&self) {
        let mut g = self.lock();
        g.window.clear();
        g.pending.clear();
        g.recording = false;
    }
}
