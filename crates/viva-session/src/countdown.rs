//! Interview time budget.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Running(u64),
    Expired,
}

/// Whole-second countdown. Starts once and expires once.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining_secs: u64,
    started: bool,
    expired: bool,
}

impl Countdown {
    pub fn new(budget: Duration) -> Self {
        Self {
            remaining_secs: budget.as_secs(),
            started: false,
            expired: false,
        }
    }

    /// True the first time only.
    pub fn start(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        true
    }

    /// Advance by one second. None before start and after expiry.
    pub fn tick(&mut self) -> Option<CountdownTick> {
        if !self.is_running() {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.expired = true;
            Some(CountdownTick::Expired)
        } else {
            Some(CountdownTick::Running(self.remaining_secs))
        }
    }

    pub fn is_running(&self) -> bool {
        self.started && !self.expired
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }
}

/// `MM:SS`
pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
