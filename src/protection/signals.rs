//! Recognition of client-side circumvention signals.
//!
//! These run wherever the viewer runs. They deter casual capture and
//! inspection; they cannot prevent it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use gatehouse_db::models::ViolationKind;

/// Default outer/inner window delta that suggests a docked inspector.
pub const DEVTOOLS_THRESHOLD_PX: u32 = 160;

/// A keyboard event as reported by the viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key name, e.g. `"PrintScreen"`, `"F12"`, `"s"`, `"3"`.
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    /// Cmd on macOS, Win on Windows.
    pub meta: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

/// Classify a key combination.
pub fn classify_key(event: &KeyEvent) -> Option<ViolationKind> {
    let key = event.key.to_ascii_lowercase();

    match key.as_str() {
        "printscreen" | "print" | "snapshot" => return Some(ViolationKind::Screenshot),
        "f12" => return Some(ViolationKind::DevTools),
        _ => {}
    }

    if event.shift && event.meta && matches!(key.as_str(), "s" | "3" | "4" | "5") {
        // Win+Shift+S snipping, Cmd+Shift+3/4/5 capture.
        return Some(ViolationKind::Screenshot);
    }

    if event.shift && (event.ctrl || event.meta) && matches!(key.as_str(), "i" | "j" | "c") {
        return Some(ViolationKind::DevTools);
    }

    None
}

/// Outer and inner window dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMetrics {
    pub outer_width: u32,
    pub inner_width: u32,
    pub outer_height: u32,
    pub inner_height: u32,
}

/// Whether the outer/inner delta suggests docked developer tools.
pub fn devtools_suspected(metrics: &WindowMetrics, threshold_px: u32) -> bool {
    metrics.outer_width.saturating_sub(metrics.inner_width) > threshold_px
        || metrics.outer_height.saturating_sub(metrics.inner_height) > threshold_px
}

/// Sliding-window counter of visibility changes.
#[derive(Debug, Clone)]
pub struct VisibilityTracker {
    window: Duration,
    max_changes: usize,
    changes: VecDeque<Instant>,
}

impl VisibilityTracker {
    pub fn new(window: Duration, max_changes: usize) -> Self {
        Self {
            window,
            max_changes: max_changes.max(1),
            changes: VecDeque::new(),
        }
    }

    /// Record one change. Returns true when the changes inside the window
    /// reach `max_changes`; the window is then cleared.
    pub fn record(&mut self, at: Instant) -> bool {
        while let Some(&oldest) = self.changes.front() {
            if at.duration_since(oldest) > self.window {
                self.changes.pop_front();
            } else {
                break;
            }
        }
        self.changes.push_back(at);

        if self.changes.len() >= self.max_changes {
            self.changes.clear();
            true
        } else {
            false
        }
    }
}

impl Default for VisibilityTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 6)
    }
}
