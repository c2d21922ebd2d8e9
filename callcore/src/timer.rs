//! Elapsed call-time display.

use chrono::{DateTime, Utc};

pub const IDLE_DISPLAY: &str = "00:00";

/// Format whole seconds as `MM:SS`. Minutes keep counting past 99.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Restartable display timer. Started on entering Active, reset on any exit.
#[derive(Debug, Clone, Default)]
pub struct ElapsedTimer {
    started_at: Option<DateTime<Utc>>,
    display: Option<String>,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.display = None;
    }

    /// Recompute the display from `now`. Returns the new text while running.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<&str> {
        let started_at = self.started_at?;
        let elapsed_ms = now.signed_duration_since(started_at).num_milliseconds();
        self.display = Some(format_elapsed(elapsed_ms.div_euclid(1000)));
        self.display.as_deref()
    }

    pub fn stop(&mut self) {
        self.started_at = None;
        self.display = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn display(&self) -> &str {
        self.display.as_deref().unwrap_or(IDLE_DISPLAY)
    }
}
