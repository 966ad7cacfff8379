//! Viewer-side protection monitor.
//!
//! Turns raw signals into violations, obscures the content, reports each
//! violation and tracks the strike state. Obscuring and reporting are
//! injected so the monitor runs the same against a real viewer or a test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_common::{Result, UserId};
use gatehouse_db::models::ViolationKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use super::signals::{
    classify_key, devtools_suspected, KeyEvent, VisibilityTracker, WindowMetrics,
    DEVTOOLS_THRESHOLD_PX,
};

/// Where a locked-out viewer is sent.
pub const LOGIN_REDIRECT: &str = "/login";

/// A raw observation from the viewer.
#[derive(Debug, Clone)]
pub enum Signal {
    Key(KeyEvent),
    Window(WindowMetrics),
    VisibilityChange(Instant),
}

/// Escalation state of one viewing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "strikes", rename_all = "lowercase")]
pub enum StrikeState {
    Clean,
    Warned(u32),
    Locked,
}

impl StrikeState {
    /// State after `strikes` recorded violations.
    pub fn after(strikes: u32, threshold: u32) -> Self {
        match strikes {
            0 => StrikeState::Clean,
            n if n >= threshold => StrikeState::Locked,
            n => StrikeState::Warned(n),
        }
    }

    fn strikes(self, threshold: u32) -> u32 {
        match self {
            StrikeState::Clean => 0,
            StrikeState::Warned(n) => n,
            StrikeState::Locked => threshold,
        }
    }

    /// Combine two observations of the same session. Acknowledgements can
    /// arrive out of order, so the state only moves forward and `Locked` is
    /// final.
    fn merge(self, other: StrikeState) -> StrikeState {
        match (self, other) {
            (StrikeState::Locked, _) | (_, StrikeState::Locked) => StrikeState::Locked,
            (StrikeState::Warned(a), StrikeState::Warned(b)) => StrikeState::Warned(a.max(b)),
            (StrikeState::Clean, s) | (s, StrikeState::Clean) => s,
        }
    }
}

/// Body of `POST /violations`, as sent by the monitor and read by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub user_id: UserId,
    pub resource_id: Uuid,
    /// When the viewer saw it. The ledger uses its own clock if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Server acknowledgement of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportAck {
    pub strikes: u32,
    pub locked: bool,
}

/// Blanks or blurs the protected content.
pub trait ContentShield: Send + Sync {
    fn obscure(&self, kind: ViolationKind);

    /// End the session and leave the page.
    fn lock_out(&self, redirect: &str);
}

/// Delivers violations to the ledger.
#[async_trait]
pub trait ViolationReporter: Send + Sync {
    async fn report(&self, report: &ViolationReport) -> Result<ReportAck>;
}

struct MonitorState {
    strikes: StrikeState,
    visibility: VisibilityTracker,
    devtools_open: bool,
}

pub struct ProtectionMonitor<S, R> {
    shield: S,
    reporter: R,
    user_id: UserId,
    resource_id: Uuid,
    threshold: u32,
    state: Mutex<MonitorState>,
}

impl<S: ContentShield, R: ViolationReporter> ProtectionMonitor<S, R> {
    pub fn new(shield: S, reporter: R, user_id: UserId, resource_id: Uuid, threshold: u32) -> Self {
        Self {
            shield,
            reporter,
            user_id,
            resource_id,
            threshold: threshold.max(1),
            state: Mutex::new(MonitorState {
                strikes: StrikeState::Clean,
                visibility: VisibilityTracker::default(),
                devtools_open: false,
            }),
        }
    }

    pub fn state(&self) -> StrikeState {
        self.state.lock().strikes
    }

    /// Process one signal and return the resulting state.
    pub async fn handle(&self, signal: Signal) -> StrikeState {
        let (kind, current) = {
            let mut state = self.state.lock();
            if state.strikes == StrikeState::Locked {
                return StrikeState::Locked;
            }
            let kind = match signal {
                Signal::Key(event) => classify_key(&event),
                Signal::Window(metrics) => {
                    let open = devtools_suspected(&metrics, DEVTOOLS_THRESHOLD_PX);
                    let opened = open && !state.devtools_open;
                    state.devtools_open = open;
                    opened.then_some(ViolationKind::DevTools)
                }
                Signal::VisibilityChange(at) => state
                    .visibility
                    .record(at)
                    .then_some(ViolationKind::VisibilityCycling),
            };
            (kind, state.strikes)
        };

        let Some(kind) = kind else {
            return current;
        };

        self.shield.obscure(kind);

        let report = ViolationReport {
            kind,
            user_id: self.user_id,
            resource_id: self.resource_id,
            timestamp: Some(Utc::now()),
        };
        let next = match self.reporter.report(&report).await {
            Ok(ack) if ack.locked => StrikeState::Locked,
            Ok(ack) => StrikeState::after(ack.strikes, self.threshold),
            Err(e) => {
                tracing::warn!(error = %e, "Violation report failed, counting locally");
                StrikeState::after(current.strikes(self.threshold) + 1, self.threshold)
            }
        };

        let (before, after) = {
            let mut state = self.state.lock();
            let before = state.strikes;
            state.strikes = before.merge(next);
            (before, state.strikes)
        };
        if after == StrikeState::Locked && before != StrikeState::Locked {
            self.shield.lock_out(LOGIN_REDIRECT);
        }
        after
    }
}
